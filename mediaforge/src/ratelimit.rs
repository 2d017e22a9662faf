//! Per-key fixed-window admission control.
//!
//! Each `(api key, budget class)` pair owns one counter. A window is identified
//! by `floor(now / window_size)`; the first request observed in a new window
//! resets the counter. Rejected requests do not consume quota.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Named quota bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BudgetClass {
    General,
    Upload,
}

/// Limit and window size of one budget class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub limit: u32,
    pub window: Duration,
}

impl Budget {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    fn window_ms(&self) -> u64 {
        (self.window.as_millis() as u64).max(1)
    }
}

/// Outcome of one admission check, including the quota state for headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Whole seconds until the current window rolls over (rounded up).
    pub reset_seconds: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    index: u64,
    count: u32,
}

/// Shared rate limiter for all request handlers.
#[derive(Debug)]
pub struct RateLimiter {
    general: Budget,
    upload: Budget,
    windows: Mutex<HashMap<(String, BudgetClass), RateWindow>>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl RateLimiter {
    pub fn new(general: Budget, upload: Budget) -> Self {
        Self {
            general,
            upload,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn budget(&self, class: BudgetClass) -> Budget {
        match class {
            BudgetClass::General => self.general,
            BudgetClass::Upload => self.upload,
        }
    }

    /// Check and, if admitted, count one request for `key` in `class`.
    pub fn admit(&self, key: &str, class: BudgetClass) -> Decision {
        self.admit_at(key, class, now_ms())
    }

    fn admit_at(&self, key: &str, class: BudgetClass, now_ms: u64) -> Decision {
        let budget = self.budget(class);
        let window_ms = budget.window_ms();
        let index = now_ms / window_ms;
        let window_end = (index + 1) * window_ms;
        let reset_seconds = (window_end - now_ms).div_ceil(1000);

        let mut windows = self.windows.lock();
        let window = windows
            .entry((key.to_string(), class))
            .or_insert(RateWindow { index, count: 0 });
        if window.index != index {
            *window = RateWindow { index, count: 0 };
        }

        if window.count >= budget.limit {
            return Decision {
                allowed: false,
                limit: budget.limit,
                remaining: 0,
                reset_seconds,
            };
        }

        window.count += 1;
        Decision {
            allowed: true,
            limit: budget.limit,
            remaining: budget.limit - window.count,
            reset_seconds,
        }
    }

    /// Drop counters whose window has already rolled over.
    pub fn prune(&self) -> usize {
        self.prune_at(now_ms())
    }

    fn prune_at(&self, now_ms: u64) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|(_, class), window| {
            let current = now_ms / self.budget(*class).window_ms();
            window.index >= current
        });
        before - windows.len()
    }

    /// Number of live `(key, class)` counters.
    pub fn tracked(&self) -> usize {
        self.windows.lock().len()
    }

    /// Prune stale counters every `interval` until `cancel_token` fires.
    pub fn start_pruner(
        self: &Arc<Self>,
        cancel_token: CancellationToken,
        interval: Duration,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("rate window pruner shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let removed = limiter.prune();
                        if removed > 0 {
                            debug!(removed, "pruned stale rate windows");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(
            Budget::new(3, Duration::from_secs(60)),
            Budget::new(1, Duration::from_secs(60)),
        )
    }

    #[test]
    fn fourth_call_in_window_is_rejected() {
        let limiter = limiter();
        let t0 = 1_200_000; // window boundary

        for expected_remaining in [2, 1, 0] {
            let d = limiter.admit_at("key", BudgetClass::General, t0 + 1_000);
            assert!(d.allowed);
            assert_eq!(d.limit, 3);
            assert_eq!(d.remaining, expected_remaining);
        }

        let rejected = limiter.admit_at("key", BudgetClass::General, t0 + 20_500);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.reset_seconds, 40);

        // Rejections do not consume quota, and the next window starts fresh.
        let fresh = limiter.admit_at("key", BudgetClass::General, t0 + 60_000);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
        assert_eq!(fresh.reset_seconds, 60);
    }

    #[test]
    fn classes_and_keys_are_independent() {
        let limiter = limiter();
        let now = 5_000;
        assert!(limiter.admit_at("a", BudgetClass::Upload, now).allowed);
        assert!(!limiter.admit_at("a", BudgetClass::Upload, now).allowed);
        assert!(limiter.admit_at("a", BudgetClass::General, now).allowed);
        assert!(limiter.admit_at("b", BudgetClass::Upload, now).allowed);
    }

    #[test]
    fn reset_rounds_up_to_whole_seconds() {
        let limiter = limiter();
        let d = limiter.admit_at("k", BudgetClass::General, 59_999);
        assert_eq!(d.reset_seconds, 1);
    }

    #[test]
    fn prune_drops_rolled_over_windows() {
        let limiter = limiter();
        limiter.admit_at("old", BudgetClass::General, 10_000);
        limiter.admit_at("new", BudgetClass::General, 70_000);
        assert_eq!(limiter.tracked(), 2);
        assert_eq!(limiter.prune_at(70_000), 1);
        assert_eq!(limiter.tracked(), 1);
    }
}
