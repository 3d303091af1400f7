//! Adaptive request pacing.
//!
//! Two rules gate every request:
//!
//! 1. **Sliding window**: at most `rpm` requests start in any 60 seconds.
//! 2. **Adaptive delay**: consecutive requests are at least `current_delay`
//!    apart. The delay doubles (or jumps to the server's `Retry-After`) on a
//!    429 and shrinks by 10% after every run of ten successes.
//!
//! [`RateLimiter::wait`] is the single serialization point: concurrent
//! callers queue on an async gate, so the window and delay are always
//! evaluated against one request stream.

use crate::config::RateLimitConfig;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// Length of the sliding window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Extra wait once the window is full, so the oldest entry has surely left it.
pub const WINDOW_MARGIN: Duration = Duration::from_millis(100);

/// Successes needed before the delay is reduced.
pub const SPEEDUP_AFTER: u32 = 10;

const SPEEDUP_FACTOR: f64 = 0.9;

#[derive(Debug)]
struct LimiterState {
    current_delay: Duration,
    last_request: Option<Instant>,
    window: VecDeque<Instant>,
    consecutive_successes: u32,
    consecutive_failures: u32,
}

/// Sliding-window limiter with adaptive backoff and speed-up.
#[derive(Debug)]
pub struct RateLimiter {
    rpm: u32,
    min_delay: Duration,
    max_delay: Duration,
    gate: tokio::sync::Mutex<()>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter for `rpm` requests per minute with the default
    /// 1s..60s delay bounds.
    pub fn new(rpm: u32) -> Self {
        Self::from_config(&RateLimitConfig {
            rpm,
            ..RateLimitConfig::default()
        })
    }

    /// Create a limiter from configuration.
    ///
    /// The initial delay is `max(min_delay, 60s / rpm)`, clamped to
    /// `max_delay`. An `rpm` of zero is treated as one.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let rpm = config.rpm.max(1);
        let min_delay = config.min_delay;
        let max_delay = config.max_delay.max(min_delay);
        let initial = (WINDOW / rpm).clamp(min_delay, max_delay);

        Self {
            rpm,
            min_delay,
            max_delay,
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(LimiterState {
                current_delay: initial,
                last_request: None,
                window: VecDeque::new(),
                consecutive_successes: 0,
                consecutive_failures: 0,
            }),
        }
    }

    /// Wait until the next request may start, then claim the slot.
    pub async fn wait(&self) {
        let _turn = self.gate.lock().await;

        loop {
            let pause = {
                let mut state = self.state.lock();
                let now = Instant::now();
                prune(&mut state.window, now);

                if state.window.len() < self.rpm as usize {
                    break;
                }
                state
                    .window
                    .front()
                    .map(|&oldest| (oldest + WINDOW + WINDOW_MARGIN).saturating_duration_since(now))
                    .unwrap_or_default()
            };

            info!(
                wait_secs = pause.as_secs_f64(),
                rpm = self.rpm,
                "Request window full, waiting"
            );
            sleep(pause).await;
        }

        let pause = {
            let state = self.state.lock();
            state
                .last_request
                .map(|last| (last + state.current_delay).saturating_duration_since(Instant::now()))
                .unwrap_or_default()
        };
        if !pause.is_zero() {
            sleep(pause).await;
        }

        let mut state = self.state.lock();
        let now = Instant::now();
        state.last_request = Some(now);
        state.window.push_back(now);
    }

    /// Record a successful request.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;

        if state.consecutive_successes >= SPEEDUP_AFTER {
            state.consecutive_successes = 0;
            let reduced = state.current_delay.mul_f64(SPEEDUP_FACTOR);
            state.current_delay = reduced.max(self.min_delay);
            debug!(
                delay_ms = state.current_delay.as_millis() as u64,
                "Sustained success, reducing delay"
            );
        }
    }

    /// Record a rate-limit rejection.
    ///
    /// With a `Retry-After` hint the delay becomes the hint; otherwise it
    /// doubles. Either way it stays within the configured bounds.
    pub fn record_failure(&self, retry_after: Option<Duration>) {
        let mut state = self.state.lock();
        state.consecutive_successes = 0;
        state.consecutive_failures += 1;

        let next = match retry_after {
            Some(hint) => hint,
            None => state.current_delay.saturating_mul(2),
        };
        state.current_delay = next.clamp(self.min_delay, self.max_delay);

        info!(
            delay_ms = state.current_delay.as_millis() as u64,
            retry_after_secs = retry_after.map(|d| d.as_secs()),
            "Rate limited, backing off"
        );
    }

    /// Record a failure that says nothing about rate limits.
    pub fn record_error(&self) {
        self.state.lock().consecutive_successes = 0;
    }

    /// Current inter-request delay.
    pub fn current_delay(&self) -> Duration {
        self.state.lock().current_delay
    }

    /// Lower delay bound.
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Upper delay bound.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Point-in-time view for display.
    pub fn snapshot(&self) -> LimiterSnapshot {
        let mut state = self.state.lock();
        prune(&mut state.window, Instant::now());
        LimiterSnapshot {
            rpm: self.rpm,
            current_delay: state.current_delay,
            recent_requests: state.window.len(),
            consecutive_successes: state.consecutive_successes,
            consecutive_failures: state.consecutive_failures,
        }
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&front) = window.front() {
        if now.saturating_duration_since(front) >= WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Limiter state at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSnapshot {
    /// Configured requests per minute.
    pub rpm: u32,
    /// Current inter-request delay.
    pub current_delay: Duration,
    /// Requests started in the last 60 seconds.
    pub recent_requests: usize,
    /// Successes since the last failure or speed-up.
    pub consecutive_successes: u32,
    /// Rate-limit rejections since the last success.
    pub consecutive_failures: u32,
}
