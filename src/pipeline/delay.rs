//! Delay policy.
//!
//! Picks the wait before each action from the recent error count:
//!
//! | error count        | range                               |
//! |--------------------|-------------------------------------|
//! | 0                  | fast path, `min(fast_path_cap, min)` |
//! | 1..=threshold      | nominal `[min, max]`                |
//! | > threshold        | backoff `[backoff_min, backoff_max]` |
//!
//! The nominal range is tuned by the success rate of each observation
//! window when adaptive tuning is on.

use std::time::Duration;

use crate::models::{AdaptiveConfig, DelayConfig};
use crate::utils::random_between;

/// Lower and upper wait bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayBounds {
    pub min: Duration,
    pub max: Duration,
}

impl DelayBounds {
    pub fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max.max(min)),
        }
    }

    fn scaled(self, factor: f64) -> Self {
        Self {
            min: self.min.mul_f64(factor),
            max: self.max.mul_f64(factor),
        }
    }
}

/// Change made to the nominal range by one observation window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    /// Success rate was high, range shrank
    Shrunk { rate: f64, bounds: DelayBounds },
    /// Success rate was low, range grew
    Grown { rate: f64, bounds: DelayBounds },
    /// Rate within the comfort band
    Unchanged { rate: f64 },
}

/// Delay policy with optional success-rate tuning.
#[derive(Debug, Clone)]
pub struct DelayPolicy {
    nominal: DelayBounds,
    backoff: DelayBounds,
    threshold: u32,
    fast_path_cap: Duration,
    adaptive: AdaptiveConfig,
    attempts: u32,
    successes: u32,
}

impl DelayPolicy {
    /// `threshold` is the error count above which the backoff range applies.
    pub fn new(delays: &DelayConfig, adaptive: &AdaptiveConfig, threshold: u32) -> Self {
        Self {
            nominal: DelayBounds::from_millis(delays.min_ms, delays.max_ms),
            backoff: DelayBounds::from_millis(delays.backoff_min_ms, delays.backoff_max_ms),
            threshold,
            fast_path_cap: Duration::from_millis(delays.fast_path_cap_ms),
            adaptive: adaptive.clone(),
            attempts: 0,
            successes: 0,
        }
    }

    /// Bounds to use for the given error count.
    pub fn current_delays(&self, error_count: u32) -> DelayBounds {
        if error_count > self.threshold {
            self.backoff
        } else {
            self.nominal
        }
    }

    /// The nominal range as currently tuned.
    pub fn nominal(&self) -> DelayBounds {
        self.nominal
    }

    /// Wait before acting on a fresh entry.
    pub fn pacing_delay(&self, error_count: u32) -> Duration {
        let bounds = self.current_delays(error_count);
        if error_count == 0 {
            self.fast_path_cap.min(bounds.min)
        } else {
            random_between(bounds.min, bounds.max)
        }
    }

    /// Wait before re-driving a failed attempt. Twice the usual ceiling.
    pub fn retry_delay(&self, error_count: u32) -> Duration {
        let bounds = self.current_delays(error_count);
        random_between(bounds.min, bounds.max * 2)
    }

    /// Count one attempt for the current observation window.
    pub fn record(&mut self, success: bool) {
        self.attempts += 1;
        if success {
            self.successes += 1;
        }
    }

    /// Close the observation window.
    ///
    /// Returns `None` when tuning is off or too few attempts were seen; the
    /// tallies then keep accumulating into the next window.
    pub fn adjust(&mut self) -> Option<Adjustment> {
        if !self.adaptive.enabled || self.attempts < self.adaptive.min_attempts {
            return None;
        }

        let rate = self.successes as f64 / self.attempts as f64;
        self.attempts = 0;
        self.successes = 0;

        let adjustment = if rate > self.adaptive.shrink_above {
            let scaled = self.nominal.scaled(self.adaptive.shrink_factor);
            self.nominal = DelayBounds {
                min: scaled
                    .min
                    .max(Duration::from_millis(self.adaptive.floor_min_ms)),
                max: scaled
                    .max
                    .max(Duration::from_millis(self.adaptive.floor_max_ms)),
            };
            Adjustment::Shrunk {
                rate,
                bounds: self.nominal,
            }
        } else if rate < self.adaptive.grow_below {
            let scaled = self.nominal.scaled(self.adaptive.grow_factor);
            self.nominal = DelayBounds {
                min: scaled.min.min(self.backoff.min),
                max: scaled.max.min(self.backoff.max),
            };
            Adjustment::Grown {
                rate,
                bounds: self.nominal,
            }
        } else {
            Adjustment::Unchanged { rate }
        };

        if self.nominal.max < self.nominal.min {
            self.nominal.max = self.nominal.min;
        }
        Some(adjustment)
    }
}
