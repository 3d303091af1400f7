//! Resumable progress tracking.
//!
//! The [`ProgressRecord`] is the single source of truth for what has been
//! done. It is reloaded on start and diffed against the full item list;
//! only units that are not `completed` are worked on again.

use crate::error::Result;
use crate::item::{Language, QueryType, WorkItem, unit_id};
use crate::persist;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Format version written to new progress files.
pub const PROGRESS_VERSION: &str = "1.0";

/// Assumed price per 1000 tokens, for the cost estimate only.
pub const COST_PER_1K_TOKENS: f64 = 0.0001;

/// State of one `(item, query type)` unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    /// Never attempted. Not stored; absence means unstarted.
    #[default]
    Unstarted,
    /// Content was generated and stored.
    Completed,
    /// The last attempt failed; will be retried on the next run.
    Failed,
}

/// Stored status of one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitStatus {
    /// Current state.
    pub state: UnitState,
    /// When the state was last set.
    pub timestamp: DateTime<Utc>,
    /// Error message of the last failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate counters kept for operator visibility.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    /// Units completed.
    pub success_count: u64,
    /// Units failed.
    pub failure_count: u64,
    /// Requests spent on completed units.
    #[serde(rename = "totalAPIRequests")]
    pub total_api_requests: u64,
    /// Estimated tokens generated.
    pub total_tokens_used: u64,
    /// Estimated cost in dollars.
    pub estimated_cost: f64,
}

/// The persisted progress document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Format version.
    pub version: String,
    /// Vocabulary book identifier.
    pub book_id: String,
    /// Vocabulary language.
    pub language: Language,
    /// When this job was first started.
    pub start_time: DateTime<Utc>,
    /// Last mutation time.
    pub last_update_time: DateTime<Utc>,
    /// Items in the job.
    pub total_items: usize,
    /// Items whose every query type is completed.
    pub completed_items: usize,
    /// `"key:type"` ids of units whose last attempt failed.
    #[serde(default)]
    pub failed_units: BTreeSet<String>,
    /// Per item, per query type status.
    #[serde(default)]
    pub unit_status: BTreeMap<String, BTreeMap<QueryType, UnitStatus>>,
    /// Aggregate counters.
    #[serde(default)]
    pub statistics: Statistics,
}

impl ProgressRecord {
    /// An empty record for a new job.
    pub fn new(book_id: impl Into<String>, language: Language) -> Self {
        let now = Utc::now();
        Self {
            version: PROGRESS_VERSION.to_string(),
            book_id: book_id.into(),
            language,
            start_time: now,
            last_update_time: now,
            total_items: 0,
            completed_items: 0,
            failed_units: BTreeSet::new(),
            unit_status: BTreeMap::new(),
            statistics: Statistics::default(),
        }
    }
}

/// Per-unit figures passed to [`ProgressStore::mark_query_completed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitStats {
    /// Estimated tokens of the generated content.
    pub tokens: u64,
    /// Requests spent on the unit.
    pub requests: u32,
}

/// Derived view of the record for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressStatistics {
    /// Completed items.
    pub completed: usize,
    /// Total items.
    pub total: usize,
    /// `completed / total` as a percentage.
    pub percent: f64,
    /// Units currently in the failed set.
    pub failed: usize,
    /// Units completed.
    pub success_count: u64,
    /// Units failed.
    pub failure_count: u64,
    /// Requests spent on completed units.
    pub total_api_requests: u64,
    /// Estimated tokens.
    pub total_tokens_used: u64,
    /// Estimated cost in dollars.
    pub estimated_cost: f64,
}

/// Owner of the progress record and its file.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    record: ProgressRecord,
}

impl ProgressStore {
    /// A store with a fresh record; nothing is read from disk.
    pub fn new(path: impl Into<PathBuf>, book_id: &str, language: Language) -> Self {
        Self {
            path: path.into(),
            record: ProgressRecord::new(book_id, language),
        }
    }

    /// Load the record at `path`, or start a fresh one.
    ///
    /// A missing, unreadable or corrupt file is never fatal: the job simply
    /// starts over.
    pub async fn init(path: impl Into<PathBuf>, book_id: &str, language: Language) -> Self {
        let path = path.into();
        let record = match persist::read_json::<ProgressRecord>(&path).await {
            Ok(Some(mut record)) => {
                if record.book_id != book_id {
                    warn!(
                        stored = %record.book_id,
                        requested = book_id,
                        "Progress file belongs to a different book id"
                    );
                }
                record.completed_items = count_completed(&record.unit_status);
                info!(
                    path = %path.display(),
                    completed = record.completed_items,
                    total = record.total_items,
                    failed = record.failed_units.len(),
                    "Loaded existing progress"
                );
                record
            }
            Ok(None) => {
                info!(path = %path.display(), "Starting new progress file");
                ProgressRecord::new(book_id, language)
            }
            Err(e) => {
                warn!(error = %e, "Could not load progress, starting over");
                ProgressRecord::new(book_id, language)
            }
        };

        Self { path, record }
    }

    /// Path of the progress file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying record.
    pub fn record(&self) -> &ProgressRecord {
        &self.record
    }

    /// Set the number of items in the job.
    pub fn set_total_items(&mut self, total: usize) {
        self.record.total_items = total;
    }

    /// State of one unit.
    pub fn unit_state(&self, key: &str, query: QueryType) -> UnitState {
        self.record
            .unit_status
            .get(key)
            .and_then(|types| types.get(&query))
            .map_or(UnitState::Unstarted, |status| status.state)
    }

    /// Whether the unit has been completed.
    pub fn is_query_completed(&self, key: &str, query: QueryType) -> bool {
        self.unit_state(key, query) == UnitState::Completed
    }

    /// Whether every query type of the item has been completed.
    pub fn is_item_completed(&self, key: &str) -> bool {
        self.record
            .unit_status
            .get(key)
            .is_some_and(all_completed)
    }

    /// Record a completed unit.
    ///
    /// `completed_items` grows only when this completes the item's last
    /// outstanding query type, so repeated completions never double-count.
    pub fn mark_query_completed(&mut self, key: &str, query: QueryType, stats: UnitStats) {
        let was_complete = self.is_item_completed(key);
        self.set_status(key, query, UnitState::Completed, None);
        self.record.failed_units.remove(&unit_id(key, query));

        if !was_complete && self.is_item_completed(key) {
            self.record.completed_items += 1;
        }

        let statistics = &mut self.record.statistics;
        statistics.success_count += 1;
        statistics.total_api_requests += u64::from(stats.requests);
        statistics.total_tokens_used += stats.tokens;
        #[allow(clippy::cast_precision_loss)]
        let cost = stats.tokens as f64 / 1000.0 * COST_PER_1K_TOKENS;
        statistics.estimated_cost += cost;
    }

    /// Record a failed unit.
    pub fn mark_query_failed(&mut self, key: &str, query: QueryType, error: &str) {
        let was_complete = self.is_item_completed(key);
        self.set_status(key, query, UnitState::Failed, Some(error.to_string()));
        self.record.failed_units.insert(unit_id(key, query));

        if was_complete {
            self.record.completed_items -= 1;
        }
        self.record.statistics.failure_count += 1;
    }

    /// Items with at least one query type not yet completed, in input order.
    pub fn work_to_process<'a>(&self, items: &'a [WorkItem]) -> Vec<&'a WorkItem> {
        items
            .iter()
            .filter(|item| !self.is_item_completed(&item.key))
            .collect()
    }

    /// Query types of `key` still to run, in processing order.
    pub fn pending_query_types(&self, key: &str) -> Vec<QueryType> {
        QueryType::ALL
            .into_iter()
            .filter(|&query| !self.is_query_completed(key, query))
            .collect()
    }

    /// Reset completed units for which `has_output` returns false.
    ///
    /// Returns the number of units reset.
    pub fn invalidate_missing(&mut self, has_output: impl Fn(&str, QueryType) -> bool) -> usize {
        let mut reset = 0;
        for (key, types) in &mut self.record.unit_status {
            types.retain(|&query, status| {
                let keep =
                    status.state != UnitState::Completed || has_output(key.as_str(), query);
                if !keep {
                    reset += 1;
                }
                keep
            });
        }
        self.record.unit_status.retain(|_, types| !types.is_empty());

        if reset > 0 {
            self.record.completed_items = count_completed(&self.record.unit_status);
            self.touch();
        }
        reset
    }

    /// Atomically write the record to disk.
    pub async fn save(&self) -> Result<()> {
        persist::write_json_atomic(&self.path, &self.record).await
    }

    /// Summary numbers for display.
    pub fn statistics(&self) -> ProgressStatistics {
        let record = &self.record;
        #[allow(clippy::cast_precision_loss)]
        let percent = if record.total_items > 0 {
            record.completed_items as f64 / record.total_items as f64 * 100.0
        } else {
            0.0
        };

        ProgressStatistics {
            completed: record.completed_items,
            total: record.total_items,
            percent,
            failed: record.failed_units.len(),
            success_count: record.statistics.success_count,
            failure_count: record.statistics.failure_count,
            total_api_requests: record.statistics.total_api_requests,
            total_tokens_used: record.statistics.total_tokens_used,
            estimated_cost: record.statistics.estimated_cost,
        }
    }

    fn set_status(&mut self, key: &str, query: QueryType, state: UnitState, error: Option<String>) {
        let now = Utc::now();
        self.record
            .unit_status
            .entry(key.to_string())
            .or_default()
            .insert(
                query,
                UnitStatus {
                    state,
                    timestamp: now,
                    error,
                },
            );
        self.record.last_update_time = now;
    }

    fn touch(&mut self) {
        self.record.last_update_time = Utc::now();
    }
}

fn all_completed(types: &BTreeMap<QueryType, UnitStatus>) -> bool {
    QueryType::ALL.iter().all(|query| {
        types
            .get(query)
            .is_some_and(|status| status.state == UnitState::Completed)
    })
}

fn count_completed(status: &BTreeMap<String, BTreeMap<QueryType, UnitStatus>>) -> usize {
    status.values().filter(|types| all_completed(types)).count()
}
