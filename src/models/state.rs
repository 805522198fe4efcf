// src/models/state.rs

//! Mutable per-session state.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EntryId, TargetRef};

/// Counters and flags of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    /// User-controlled on/off switch
    pub enabled: bool,
    /// Set while a scan pass runs
    pub is_processing: bool,
    /// Recent failures, decremented on success
    pub error_count: u32,
    /// Kudos given, for display
    pub kudos_count: u64,
    /// Set while a retry drain is scheduled or running
    pub retry_active: bool,
}

impl RunState {
    /// Apply a success to the error counter. Never goes below zero.
    pub fn record_success(&mut self) {
        self.error_count = self.error_count.saturating_sub(1);
        self.kudos_count += 1;
    }

    /// Apply a failure to the error counter.
    pub fn record_failure(&mut self) {
        self.error_count += 1;
    }
}

/// Entries already attempted during this page lifetime.
#[derive(Debug, Clone, Default)]
pub struct ProcessedSet {
    ids: HashSet<EntryId>,
}

impl ProcessedSet {
    /// Add an id. Returns false if it was already present.
    pub fn insert(&mut self, id: EntryId) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

/// A kudos that did not register and is waiting for another try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub entry: EntryId,
    pub target: TargetRef,
    /// Failed tries so far, including the first one
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl FailedAttempt {
    pub fn new(target: TargetRef, now: DateTime<Utc>) -> Self {
        Self {
            entry: target.entry.clone(),
            target,
            attempts: 1,
            timestamp: now,
        }
    }

    /// Count another failed try. Returns true while the attempt may be
    /// queued again.
    pub fn record_failure(&mut self, max_attempts: u32, now: DateTime<Utc>) -> bool {
        self.attempts = (self.attempts + 1).min(max_attempts);
        self.timestamp = now;
        self.attempts < max_attempts
    }
}

/// Time until which every action is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseWindow {
    pub pause_until: DateTime<Utc>,
}

impl PauseWindow {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.pause_until
    }

    /// Time left, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.pause_until - now).to_std().unwrap_or_default()
    }
}
