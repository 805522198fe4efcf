// src/models/mod.rs

//! Domain models for the kudos engine.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod entry;
mod selectors;
mod state;

// Re-export all public types
pub use config::{
    AdaptiveConfig, Config, DelayConfig, GuardConfig, IndicatorConfig, LoggingConfig,
    PageConfig, RetryConfig, SchedulerConfig, SessionConfig, StorageConfig,
};
pub use entry::{EntryId, EntryKind, FeedEntry, Outcome, PageEntry, TargetRef, TargetState};
pub use selectors::FeedSelectors;
pub use state::{FailedAttempt, PauseWindow, ProcessedSet, RunState};
