//! Rate-limit guard.
//!
//! Halts every action once failures pile up, assuming the remote side is
//! throttling.
//!
//! ```text
//! Normal --(error count > threshold)--> Paused --(expiry | cancel)--> Normal
//! ```
//!
//! The transition into `Paused` is edge-triggered: further failures while
//! paused do not open a second window.

use chrono::{DateTime, Utc};

use crate::models::{GuardConfig, PauseWindow};

/// Guard state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Normal,
    Paused(PauseWindow),
}

/// Result of feeding an error count to the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Below the threshold
    Clear,
    /// Threshold crossed, a pause window was just opened
    Tripped(PauseWindow),
    /// Already paused, nothing new to do
    AlreadyPaused,
}

/// Rate-limit guard state machine.
#[derive(Debug, Clone)]
pub struct RateLimitGuard {
    threshold: u32,
    cooldown: chrono::Duration,
    state: GuardState,
}

impl RateLimitGuard {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            threshold: config.error_threshold,
            cooldown: config.cooldown_span().unwrap_or(chrono::Duration::MAX),
            state: GuardState::Normal,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// Whether the given error count is over the threshold.
    pub fn exceeds(&self, error_count: u32) -> bool {
        error_count > self.threshold
    }

    /// Feed the current error count.
    pub fn observe(&mut self, error_count: u32, now: DateTime<Utc>) -> GuardDecision {
        match self.state {
            GuardState::Paused(_) => GuardDecision::AlreadyPaused,
            GuardState::Normal if self.exceeds(error_count) => {
                let window = PauseWindow {
                    pause_until: now
                        .checked_add_signed(self.cooldown)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                };
                self.state = GuardState::Paused(window);
                GuardDecision::Tripped(window)
            }
            GuardState::Normal => GuardDecision::Clear,
        }
    }

    /// Re-enter a pause window loaded from storage. Expired windows are
    /// ignored.
    pub fn restore(&mut self, window: PauseWindow, now: DateTime<Utc>) -> bool {
        if window.is_active(now) {
            self.state = GuardState::Paused(window);
            true
        } else {
            false
        }
    }

    /// The open pause window, if any.
    pub fn window(&self) -> Option<PauseWindow> {
        match self.state {
            GuardState::Paused(window) => Some(window),
            GuardState::Normal => None,
        }
    }

    /// Whether actions are suspended right now.
    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.window().is_some_and(|w| w.is_active(now))
    }

    /// Whether a window is open but already over.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.window().is_some_and(|w| !w.is_active(now))
    }

    /// Back to `Normal`. Returns the window that was closed.
    pub fn resume(&mut self) -> Option<PauseWindow> {
        let window = self.window();
        self.state = GuardState::Normal;
        window
    }
}
