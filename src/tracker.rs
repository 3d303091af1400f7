//! Per-session statistics.
//!
//! The progress file carries totals across runs; this tracks what the
//! current process did, for the progress bar and the final report.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Statistics tracker for units processed in this run.
#[derive(Debug)]
pub struct SessionTracker {
    /// Start time of the session.
    start_time: Instant,
    /// Units processed this session.
    processed: AtomicU64,
    /// Successful units.
    success_count: AtomicU64,
    /// Failed units.
    failure_count: AtomicU64,
    /// Requests made, retries included.
    requests: AtomicU64,
    /// Estimated tokens generated.
    tokens: AtomicU64,
    /// Total latency of successful units in microseconds.
    total_latency_us: AtomicU64,
    /// Completion times within the last minute.
    recent: Mutex<VecDeque<Instant>>,
    /// Units scheduled for this session.
    total_units: AtomicUsize,
}

impl SessionTracker {
    /// Create a new tracker.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            processed: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            tokens: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            recent: Mutex::new(VecDeque::new()),
            total_units: AtomicUsize::new(0),
        }
    }

    /// Set the number of units scheduled for this session.
    pub fn set_total_units(&self, total: usize) {
        self.total_units.store(total, Ordering::Relaxed);
    }

    /// Record a completed unit.
    pub fn record_success(&self, latency: Duration, tokens: u64, requests: u32) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.requests.fetch_add(u64::from(requests), Ordering::Relaxed);
        self.tokens.fetch_add(tokens, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.record_recent();
    }

    /// Record a failed unit.
    pub fn record_failure(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.record_recent();
    }

    fn record_recent(&self) {
        let now = Instant::now();
        let mut recent = self.recent.lock();
        recent.push_back(now);
        prune(&mut recent, now);
    }

    /// Units finished within the last minute.
    pub fn units_per_minute(&self) -> usize {
        let mut recent = self.recent.lock();
        prune(&mut recent, Instant::now());
        recent.len()
    }

    /// Get the current statistics snapshot.
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> SessionSnapshot {
        let elapsed = self.start_time.elapsed();
        let processed = self.processed.load(Ordering::Relaxed);
        let success = self.success_count.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);

        let avg_latency_ms = if success > 0 {
            (total_latency as f64 / success as f64) / 1000.0
        } else {
            0.0
        };

        let minutes = elapsed.as_secs_f64() / 60.0;
        let overall_upm = if minutes > 0.0 {
            processed as f64 / minutes
        } else {
            0.0
        };

        SessionSnapshot {
            elapsed,
            processed,
            success_count: success,
            failure_count: self.failure_count.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            tokens: self.tokens.load(Ordering::Relaxed),
            avg_latency_ms,
            current_upm: self.units_per_minute(),
            overall_upm,
            total_units: self.total_units.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn prune(recent: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = recent.front() {
        if now.duration_since(*front) > RATE_WINDOW {
            recent.pop_front();
        } else {
            break;
        }
    }
}

/// A snapshot of session statistics.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Elapsed time since start.
    pub elapsed: Duration,
    /// Units processed.
    pub processed: u64,
    /// Successful units.
    pub success_count: u64,
    /// Failed units.
    pub failure_count: u64,
    /// Requests spent on successful units.
    pub requests: u64,
    /// Estimated tokens generated.
    pub tokens: u64,
    /// Average latency of successful units in milliseconds.
    pub avg_latency_ms: f64,
    /// Units finished in the last minute.
    pub current_upm: usize,
    /// Units per minute since start.
    pub overall_upm: f64,
    /// Units scheduled for the session.
    pub total_units: usize,
}

impl SessionSnapshot {
    /// Success rate as a percentage.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.processed > 0 {
            (self.success_count as f64 / self.processed as f64) * 100.0
        } else {
            100.0
        }
    }

    /// Estimated time until every scheduled unit is processed.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn eta(&self) -> Option<Duration> {
        if self.overall_upm > 0.0 && self.total_units > 0 {
            let remaining = self.total_units.saturating_sub(self.processed as usize);
            Some(Duration::from_secs_f64(
                remaining as f64 / self.overall_upm * 60.0,
            ))
        } else {
            None
        }
    }

    /// One-line summary for the progress bar.
    pub fn summary(&self) -> String {
        let eta = self.eta().map_or_else(
            || "--".to_string(),
            |eta| {
                let secs = eta.as_secs();
                format!("{}m{:02}s", secs / 60, secs % 60)
            },
        );
        format!(
            "ok {} | failed {} | ~{} tokens | {}/min | avg {:.1}s | eta {}",
            self.success_count,
            self.failure_count,
            self.tokens,
            self.current_upm,
            self.avg_latency_ms / 1000.0,
            eta
        )
    }
}
