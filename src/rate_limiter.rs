//! Fixed-window quota gate for Gmail API calls
//!
//! Gmail charges every call against a per-user quota measured in "quota units".
//! Two policies are used:
//! - light: single list/get calls, a couple of calls per one-second window
//! - heavy: grouped fetches, `quota_limit` units per two-second window, each
//!   batch charged `cost_per_batch` units no matter how full it is
//!
//! A window starts with the first admitted call after the previous one expired.
//! When the next call does not fit, the caller sleeps until the window rolls
//! over and tries again. Calls are never rejected.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Quota cost of one outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCost {
    /// A single list or get call under the light policy
    Call,
    /// A grouped fetch, charged its configured cost regardless of fill
    Batch(u32),
}

impl QuotaCost {
    pub fn units(&self) -> u32 {
        match self {
            QuotaCost::Call => 1,
            QuotaCost::Batch(units) => *units,
        }
    }
}

/// Allowance per window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    /// Quota units admitted per window
    pub budget: u32,
    pub window: Duration,
}

impl RatePolicy {
    pub fn new(budget: u32, window: Duration) -> Self {
        Self { budget, window }
    }

    /// `calls` single calls per window
    pub fn light(calls: u32, window: Duration) -> Self {
        Self::new(calls * QuotaCost::Call.units(), window)
    }

    /// `quota_limit` units per window, spent by batch calls
    pub fn heavy(quota_limit: u32, window: Duration) -> Self {
        Self::new(quota_limit, window)
    }

    /// How many calls of `cost` fit in one window
    pub fn calls_per_window(&self, cost: QuotaCost) -> u32 {
        (self.budget / cost.units().max(1)).max(1)
    }
}

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    used: u32,
    /// Total units consumed (for stats)
    total_consumed: u64,
    /// Total admitted calls (for stats)
    total_operations: u64,
    /// Times a caller had to sleep for the next window
    total_waits: u64,
}

/// Fixed-window counter shared by every clone
#[derive(Debug, Clone)]
pub struct FixedWindowLimiter {
    policy: RatePolicy,
    inner: Arc<Mutex<WindowState>>,
}

impl FixedWindowLimiter {
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            policy,
            inner: Arc::new(Mutex::new(WindowState {
                window_start: Instant::now(),
                used: 0,
                total_consumed: 0,
                total_operations: 0,
                total_waits: 0,
            })),
        }
    }

    pub fn policy(&self) -> RatePolicy {
        self.policy
    }

    /// Wait until `cost` fits in the current window, then reserve it
    ///
    /// A cost larger than the whole budget is admitted alone at the start of a
    /// fresh window. The lock is released before sleeping so other callers are
    /// never blocked behind a waiting one.
    pub async fn acquire(&self, cost: QuotaCost) -> QuotaPermit {
        let units = cost.units();

        loop {
            let wait_time = {
                let mut state = self.inner.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.window_start);

                if elapsed >= self.policy.window {
                    state.window_start = now;
                    state.used = 0;
                }

                trace!(
                    "Window state: {}/{} units used, requesting {}",
                    state.used,
                    self.policy.budget,
                    units
                );

                if state.used == 0 || state.used + units <= self.policy.budget {
                    state.used += units;
                    state.total_consumed += units as u64;
                    state.total_operations += 1;

                    debug!(
                        "Acquired {} quota units, {}/{} used in window",
                        units, state.used, self.policy.budget
                    );

                    return QuotaPermit { units };
                }

                state.total_waits += 1;
                self.policy
                    .window
                    .saturating_sub(now.duration_since(state.window_start))
            };

            debug!(
                "Quota window full, waiting {:.2}s for {} units",
                wait_time.as_secs_f64(),
                units
            );
            tokio::time::sleep(wait_time).await;
        }
    }

    pub async fn stats(&self) -> QuotaStats {
        let state = self.inner.lock().await;
        QuotaStats {
            used_in_window: state.used,
            budget: self.policy.budget,
            total_consumed: state.total_consumed,
            total_operations: state.total_operations,
            total_waits: state.total_waits,
        }
    }
}

/// Proof that quota was reserved
#[derive(Debug)]
pub struct QuotaPermit {
    units: u32,
}

impl QuotaPermit {
    pub fn units(&self) -> u32 {
        self.units
    }
}

#[derive(Debug, Clone)]
pub struct QuotaStats {
    pub used_in_window: u32,
    pub budget: u32,
    pub total_consumed: u64,
    pub total_operations: u64,
    pub total_waits: u64,
}
