//! Run orchestration.
//!
//! One run walks `Initializing → Loading → Generating → Saving` and ends in
//! `Done` or `Interrupted`. Units are processed one at a time; the
//! cancellation token is checked before each unit, and both stores are
//! flushed every `batch_size` successes and once more at the end.

use crate::config::{Config, JobConfig};
use crate::error::Result;
use crate::generator::ContentGenerator;
use crate::item::{QueryType, WorkItem};
use crate::output::OutputStore;
use crate::persist;
use crate::progress::{COST_PER_1K_TOKENS, ProgressStatistics, ProgressStore, UnitStats};
use crate::tracker::{SessionSnapshot, SessionTracker};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tokens assumed per unit by the dry-run estimate.
pub const ESTIMATED_TOKENS_PER_UNIT: u64 = 1500;

/// Run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Building collaborators.
    Initializing,
    /// Loading state and computing pending work.
    Loading,
    /// Calling the model.
    Generating,
    /// Final flush.
    Saving,
    /// Every pending unit was attempted.
    Done,
    /// Stopped early by the cancellation token.
    Interrupted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Loading => "loading",
            Self::Generating => "generating",
            Self::Saving => "saving",
            Self::Done => "done",
            Self::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every unit attempted this run succeeded.
    Done,
    /// Some units failed; they stay in the failed set for the next run.
    Partial,
    /// Stopped early; the next run resumes where this one stopped.
    Interrupted,
    /// No items were selected.
    NothingToDo,
}

/// Result of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Totals across all runs, from the progress file.
    pub progress: ProgressStatistics,
    /// What this run did.
    pub session: SessionSnapshot,
    /// Units scheduled at the start of the run.
    pub scheduled_units: usize,
    /// Completed units reset because their output was missing.
    pub reset_units: usize,
    /// Output file.
    pub output_path: PathBuf,
    /// Progress file.
    pub progress_path: PathBuf,
}

impl RunReport {
    /// Whether a later run has work left.
    pub fn is_resumable(&self) -> bool {
        matches!(self.outcome, RunOutcome::Interrupted | RunOutcome::Partial)
    }

    /// Print a summary of the run.
    pub fn print_summary(&self) {
        let title = match self.outcome {
            RunOutcome::Done => style("GENERATION COMPLETE").green().bold(),
            RunOutcome::Partial => style("GENERATION FINISHED WITH FAILURES").yellow().bold(),
            RunOutcome::Interrupted => style("GENERATION INTERRUPTED").yellow().bold(),
            RunOutcome::NothingToDo => style("NOTHING TO DO").cyan().bold(),
        };
        let p = &self.progress;
        let s = &self.session;

        println!("\n{}", "═".repeat(60));
        println!("                    {title}");
        println!("{}", "═".repeat(60));
        println!(
            "  Items:            {}/{} ({:.1}%)",
            p.completed, p.total, p.percent
        );
        println!(
            "  This Run:         {} ok, {} failed of {} scheduled ({:.1}% success)",
            s.success_count,
            s.failure_count,
            self.scheduled_units,
            s.success_rate()
        );
        println!(
            "  All Runs:         {} ok, {} failed",
            p.success_count, p.failure_count
        );
        println!("  API Requests:     {}", p.total_api_requests);
        println!("  Tokens (est.):    {}", p.total_tokens_used);
        println!("  Cost (est.):      ${:.4}", p.estimated_cost);
        println!("  Elapsed Time:     {:.1}s", s.elapsed.as_secs_f64());
        if s.success_count > 0 {
            println!("  Avg Latency:      {:.1}s", s.avg_latency_ms / 1000.0);
        }
        if self.reset_units > 0 {
            println!("  Reset Units:      {}", self.reset_units);
        }
        if p.failed > 0 {
            println!(
                "  Failed Units:     {} (listed in {})",
                p.failed,
                self.progress_path.display()
            );
        }
        println!("{}", "═".repeat(60));
    }
}

/// Dry-run numbers for a vocabulary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    /// Items considered.
    pub items: usize,
    /// `items × query types`.
    pub units: usize,
    /// Assumed tokens.
    pub tokens: u64,
    /// Dollars at the fixed unit price.
    pub cost: f64,
    /// Wall time at the configured rate.
    pub duration: Duration,
}

impl CostEstimate {
    /// Estimate a job over `items` items at `rpm` requests per minute.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(items: usize, rpm: u32) -> Self {
        let units = items * QueryType::ALL.len();
        let tokens = units as u64 * ESTIMATED_TOKENS_PER_UNIT;
        let seconds = units as u64 * 60 / u64::from(rpm.max(1));
        Self {
            items,
            units,
            tokens,
            cost: tokens as f64 / 1000.0 * COST_PER_1K_TOKENS,
            duration: Duration::from_secs(seconds),
        }
    }

    /// Print the estimate.
    pub fn print(&self) {
        println!("{}", style("Estimate:").bold());
        println!("  Items:      {}", self.items);
        println!("  Queries:    {}", self.units);
        println!("  Tokens:     ~{}", self.tokens);
        println!("  Cost:       ~${:.4}", self.cost);
        println!(
            "  Time:       ~{:.1} min",
            self.duration.as_secs_f64() / 60.0
        );
    }
}

/// Drives one generation job.
pub struct Orchestrator {
    job: JobConfig,
    generator: ContentGenerator,
    cancel: CancellationToken,
    tracker: SessionTracker,
    phase: Phase,
}

impl Orchestrator {
    /// Create an orchestrator from its collaborators.
    pub fn new(job: JobConfig, generator: ContentGenerator, cancel: CancellationToken) -> Self {
        Self {
            job,
            generator,
            cancel,
            tracker: SessionTracker::new(),
            phase: Phase::Initializing,
        }
    }

    /// Build the generator from configuration.
    ///
    /// Fails on missing credentials or an invalid endpoint, before any
    /// request is made.
    pub fn from_config(
        config: &Config,
        job: JobConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let generator = ContentGenerator::from_config(config, job.language)?;
        Ok(Self::new(job, generator, cancel))
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = %self.phase, to = %phase, "Phase change");
        self.phase = phase;
    }

    /// Run the job over `items`.
    ///
    /// Per-unit failures are recorded and skipped. Only persistence errors
    /// end the run early.
    pub async fn run(&mut self, items: &[WorkItem]) -> Result<RunReport> {
        self.enter(Phase::Loading);

        if self.job.force {
            let removed_output = persist::remove_if_exists(&self.job.output).await?;
            let removed_progress = persist::remove_if_exists(&self.job.progress).await?;
            if removed_output || removed_progress {
                warn!("Force mode: discarded existing output and progress");
            }
        }

        let mut progress =
            ProgressStore::init(&self.job.progress, &self.job.book_id, self.job.language).await;
        let mut output = OutputStore::load(&self.job.output).await?;

        if items.is_empty() {
            info!("No items selected, nothing to do");
            self.enter(Phase::Done);
            return Ok(self.report(RunOutcome::NothingToDo, &progress, &output, 0, 0));
        }

        let reset_units = progress.invalidate_missing(|key, query| output.contains(key, query));
        if reset_units > 0 {
            warn!(
                units = reset_units,
                "Completed units missing from output were reset to pending"
            );
        }
        progress.set_total_items(items.len());

        let work: Vec<(&WorkItem, Vec<QueryType>)> = progress
            .work_to_process(items)
            .into_iter()
            .map(|item| (item, progress.pending_query_types(&item.key)))
            .collect();
        let scheduled: usize = work.iter().map(|(_, queries)| queries.len()).sum();
        self.tracker.set_total_units(scheduled);

        info!(
            items = items.len(),
            pending_items = work.len(),
            pending_units = scheduled,
            already_completed = progress.record().completed_items,
            "Computed pending work"
        );

        self.enter(Phase::Generating);
        let bar = self.progress_bar(scheduled);
        let mut interrupted = false;
        let mut since_flush = 0usize;

        'items: for (item, queries) in &work {
            for &query in queries {
                if self.cancel.is_cancelled() {
                    interrupted = true;
                    break 'items;
                }

                let started = Instant::now();
                match self.generator.generate_query(item, query).await {
                    Ok(generated) => {
                        output.insert(&item.key, query, generated.content);
                        progress.mark_query_completed(
                            &item.key,
                            query,
                            UnitStats {
                                tokens: generated.estimated_tokens,
                                requests: generated.attempts,
                            },
                        );
                        self.tracker.record_success(
                            started.elapsed(),
                            generated.estimated_tokens,
                            generated.attempts,
                        );
                        debug!(
                            key = %item.key,
                            %query,
                            tokens = generated.estimated_tokens,
                            finish_reason = %generated.finish_reason,
                            "Unit completed"
                        );

                        since_flush += 1;
                        if since_flush >= self.job.batch_size {
                            flush(&output, &progress).await?;
                            since_flush = 0;
                        }
                    }
                    Err(e) => {
                        progress.mark_query_failed(&item.key, query, &e.to_string());
                        self.tracker.record_failure();
                        warn!(key = %item.key, %query, error = %e, "Unit failed");
                        let line = format!(
                            "{} {} [{}]: {}",
                            style("✗").red().bold(),
                            item.key,
                            query,
                            e
                        );
                        match &bar {
                            Some(bar) => bar.println(line),
                            None => eprintln!("{line}"),
                        }
                    }
                }

                if let Some(bar) = &bar {
                    bar.set_message(self.tracker.snapshot().summary());
                    bar.inc(1);
                }
            }
        }

        if let Some(bar) = &bar {
            if interrupted {
                bar.abandon_with_message("Interrupted");
            } else {
                bar.finish_with_message("Complete");
            }
        }

        self.enter(Phase::Saving);
        flush(&output, &progress).await?;

        let outcome = if interrupted {
            self.enter(Phase::Interrupted);
            info!("Interrupted, state saved");
            RunOutcome::Interrupted
        } else {
            self.enter(Phase::Done);
            if self.tracker.snapshot().failure_count > 0 {
                RunOutcome::Partial
            } else {
                RunOutcome::Done
            }
        };

        let limiter = self.generator.limiter().snapshot();
        info!(
            outcome = ?outcome,
            delay_ms = limiter.current_delay.as_millis() as u64,
            recent_requests = limiter.recent_requests,
            "Run finished"
        );

        Ok(self.report(outcome, &progress, &output, scheduled, reset_units))
    }

    fn progress_bar(&self, units: usize) -> Option<ProgressBar> {
        if !self.job.show_progress || units == 0 {
            return None;
        }

        let bar = ProgressBar::new(units as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Some(bar)
    }

    fn report(
        &self,
        outcome: RunOutcome,
        progress: &ProgressStore,
        output: &OutputStore,
        scheduled_units: usize,
        reset_units: usize,
    ) -> RunReport {
        RunReport {
            outcome,
            progress: progress.statistics(),
            session: self.tracker.snapshot(),
            scheduled_units,
            reset_units,
            output_path: output.path().to_path_buf(),
            progress_path: progress.path().to_path_buf(),
        }
    }
}

/// Output first: a crash between the two writes leaves content without a
/// progress entry, which the next run redoes, never the reverse.
async fn flush(output: &OutputStore, progress: &ProgressStore) -> Result<()> {
    output.save().await?;
    progress.save().await?;
    debug!(
        entries = output.entry_count(),
        completed = progress.record().completed_items,
        "Flushed state"
    );
    Ok(())
}
