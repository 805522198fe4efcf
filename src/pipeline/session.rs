// src/pipeline/session.rs

//! The session context.
//!
//! One `Session` is built per page session and shared by every component.
//! It owns the configuration, the collaborators and all mutable run state.
//! State sits behind a single mutex that is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::{
    Config, EntryId, FailedAttempt, Outcome, PauseWindow, ProcessedSet, RunState, TargetRef,
};
use crate::pipeline::delay::DelayPolicy;
use crate::pipeline::executor::ActionExecutor;
use crate::pipeline::guard::{GuardDecision, RateLimitGuard};
use crate::pipeline::retry::RetryQueue;
use crate::pipeline::scanner::EntryScanner;
use crate::services::{Notifier, PageAdapter};
use crate::storage::KeyValueStore;

/// Mutable state of a session.
pub(crate) struct SessionState {
    pub run: RunState,
    pub processed: ProcessedSet,
    pub failed: Vec<FailedAttempt>,
    pub delays: DelayPolicy,
    pub guard: RateLimitGuard,
}

impl SessionState {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.run.enabled && !self.guard.is_paused(now)
    }
}

/// Why a pause ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumeReason {
    Expired,
    Cancelled,
}

/// Shared context of one page session.
pub struct Session {
    config: Arc<Config>,
    page: Arc<dyn PageAdapter>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn KeyValueStore>,
    state: Mutex<SessionState>,
    pause_timer: Mutex<Option<JoinHandle<()>>>,
}

/// Releases the scan mutex when dropped, whatever way the pass ends.
pub(crate) struct ProcessingGuard<'a> {
    session: &'a Session,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.session.lock().run.is_processing = false;
    }
}

/// Assembles a session from its collaborators.
#[derive(Default)]
pub struct SessionBuilder {
    config: Option<Arc<Config>>,
    page: Option<Arc<dyn PageAdapter>>,
    notifier: Option<Arc<dyn Notifier>>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn page(mut self, page: Arc<dyn PageAdapter>) -> Self {
        self.page = Some(page);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Check collaborators, restore persisted flags and start the session.
    ///
    /// Fails with `MissingDependency` if a collaborator was not provided;
    /// nothing is started in that case.
    pub async fn start(self) -> Result<Arc<Session>> {
        let page = self.page.ok_or_else(|| AppError::missing("page adapter"))?;
        let notifier = self.notifier.ok_or_else(|| AppError::missing("notifier"))?;
        let store = self.store.ok_or_else(|| AppError::missing("storage"))?;
        let config = self.config.unwrap_or_default();
        let keys = &config.storage;

        let first_run: bool = store.load(&keys.key_first_run, true).await;
        let enabled = if first_run {
            let enabled = config.session.enable_on_first_run;
            log::info!(
                "First run, starting {}",
                if enabled { "enabled" } else { "disabled" }
            );
            persist(&*store, &keys.key_enabled, &enabled).await;
            persist(&*store, &keys.key_first_run, &false).await;
            enabled
        } else {
            store.load(&keys.key_enabled, false).await
        };
        let kudos_count: u64 = store.load(&keys.key_kudos_count, 0).await;
        let pause_until: Option<DateTime<Utc>> = store.load(&keys.key_pause_until, None).await;

        let state = SessionState {
            run: RunState {
                enabled,
                kudos_count,
                ..RunState::default()
            },
            processed: ProcessedSet::default(),
            failed: Vec::new(),
            delays: DelayPolicy::new(
                &config.delays,
                &config.adaptive,
                config.guard.error_threshold,
            ),
            guard: RateLimitGuard::new(&config.guard),
        };

        let session = Arc::new(Session {
            config,
            page,
            notifier,
            store,
            state: Mutex::new(state),
            pause_timer: Mutex::new(None),
        });

        if let Some(pause_until) = pause_until {
            session.restore_pause(PauseWindow { pause_until }).await;
        }

        log::info!(
            "Session started ({}, {} kudos so far)",
            if session.is_active() { "active" } else { "inactive" },
            kudos_count
        );
        session.notifier.update_enabled_indicator(session.is_active());
        session.notifier.update_counter(kudos_count);

        Ok(session)
    }
}

/// Save a value, logging instead of failing.
async fn persist<T: serde::Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) {
    if let Err(e) = store.save(key, value).await {
        log::warn!("Failed to save '{}': {}", key, e);
    }
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn page(&self) -> &dyn PageAdapter {
        &*self.page
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Queries ---

    /// Copy of the run counters and flags.
    pub fn run_state(&self) -> RunState {
        self.lock().run.clone()
    }

    /// Enabled and not inside a pause window.
    pub fn is_active(&self) -> bool {
        self.lock().is_active(Utc::now())
    }

    pub fn is_processing(&self) -> bool {
        self.lock().run.is_processing
    }

    pub fn pause_window(&self) -> Option<PauseWindow> {
        self.lock().guard.window()
    }

    pub fn is_processed(&self, id: &EntryId) -> bool {
        self.lock().processed.contains(id)
    }

    pub fn processed_count(&self) -> usize {
        self.lock().processed.len()
    }

    /// Snapshot of the retry queue.
    pub fn failed_attempts(&self) -> Vec<FailedAttempt> {
        self.lock().failed.clone()
    }

    /// Whether failures have piled up past the guard threshold.
    pub fn is_rate_limited(&self) -> bool {
        let state = self.lock();
        state.guard.exceeds(state.run.error_count) || state.guard.is_paused(Utc::now())
    }

    // --- Bookkeeping used by the components ---

    /// Record an id as attempted. Returns false if it already was.
    pub(crate) fn mark_processed(&self, id: &EntryId) -> bool {
        self.lock().processed.insert(id.clone())
    }

    pub(crate) fn try_begin_processing(&self) -> Option<ProcessingGuard<'_>> {
        let mut state = self.lock();
        if state.run.is_processing {
            return None;
        }
        state.run.is_processing = true;
        Some(ProcessingGuard { session: self })
    }

    pub(crate) fn pacing_delay(&self) -> Duration {
        let state = self.lock();
        state.delays.pacing_delay(state.run.error_count)
    }

    pub(crate) fn retry_delay(&self) -> Duration {
        let state = self.lock();
        state.delays.retry_delay(state.run.error_count)
    }

    /// Apply the side effects of a successful kudos.
    pub(crate) async fn record_success(&self, target: &TargetRef) {
        let count = {
            let mut state = self.lock();
            state.run.record_success();
            state.delays.record(true);
            state.run.kudos_count
        };

        self.notifier.notify_success(target);
        self.notifier.update_counter(count);
        persist(&*self.store, &self.config.storage.key_kudos_count, &count).await;
    }

    /// Apply the side effects of a failed kudos and queue it for retry.
    ///
    /// Returns true when the failure opened a pause window.
    pub(crate) async fn record_failure(self: &Arc<Self>, target: TargetRef) -> bool {
        let now = Utc::now();
        let decision = {
            let mut state = self.lock();
            state.run.record_failure();
            state.delays.record(false);
            state.failed.push(FailedAttempt::new(target, now));
            let error_count = state.run.error_count;
            let decision = state.guard.observe(error_count, now);
            if let GuardDecision::Tripped(_) = decision {
                state.run.enabled = false;
            }
            decision
        };

        self.notifier.notify_failure();
        match decision {
            GuardDecision::Tripped(window) => {
                self.enter_pause(window).await;
                true
            }
            GuardDecision::Clear | GuardDecision::AlreadyPaused => false,
        }
    }

    /// A retry did not register. Counts toward the delay tuning only.
    pub(crate) fn record_retry_failure(&self) {
        self.lock().delays.record(false);
        self.notifier.notify_failure();
    }

    /// Close the delay tuning window.
    pub fn adjust_delays(&self) {
        if let Some(adjustment) = self.lock().delays.adjust() {
            log::debug!("Delay tuning: {:?}", adjustment);
        }
    }

    // --- Pause handling ---

    async fn enter_pause(self: &Arc<Self>, window: PauseWindow) {
        log::warn!(
            "Too many errors, pausing until {}",
            window.pause_until.format("%Y-%m-%d %H:%M:%S UTC")
        );
        persist(
            &*self.store,
            &self.config.storage.key_pause_until,
            &window.pause_until,
        )
        .await;

        self.notifier.show_rate_limit_alert();
        self.notifier.update_enabled_indicator(false);
        self.notifier.show_countdown(window.pause_until);
        self.arm_pause_timer(window.remaining(Utc::now()));
    }

    async fn restore_pause(self: &Arc<Self>, window: PauseWindow) {
        let now = Utc::now();
        let restored = {
            let mut state = self.lock();
            let restored = state.guard.restore(window, now);
            if restored {
                state.run.enabled = false;
            }
            restored
        };
        if restored {
            log::info!(
                "Resuming earlier pause until {}",
                window.pause_until.format("%H:%M:%S")
            );
            self.notifier.show_countdown(window.pause_until);
            self.arm_pause_timer(window.remaining(now));
        } else if let Err(e) = self.store.remove(&self.config.storage.key_pause_until).await {
            log::warn!("Failed to clear expired pause: {}", e);
        }
    }

    fn arm_pause_timer(self: &Arc<Self>, after: Duration) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            session.resume(ResumeReason::Expired).await;
        });

        let previous = self
            .pause_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// End the pause window early. Returns false if there was none.
    pub async fn cancel_pause(self: &Arc<Self>) -> bool {
        if self.pause_window().is_none() {
            return false;
        }
        let timer = self
            .pause_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
        self.resume(ResumeReason::Cancelled).await
    }

    /// Close a pause window whose time is up but whose timer has not fired.
    pub(crate) async fn expire_pause_if_due(self: &Arc<Self>) {
        let expired = self.lock().guard.is_expired(Utc::now());
        if expired {
            self.resume(ResumeReason::Expired).await;
        }
    }

    async fn resume(self: &Arc<Self>, reason: ResumeReason) -> bool {
        {
            let mut state = self.lock();
            if state.guard.resume().is_none() {
                return false;
            }
            state.run.error_count = 0;
            state.run.enabled = true;
        }

        match reason {
            ResumeReason::Expired => log::info!("Pause expired, resuming"),
            ResumeReason::Cancelled => log::info!("Pause cancelled, resuming"),
        }
        self.notifier.clear_countdown();
        self.notifier.update_enabled_indicator(true);

        let keys = &self.config.storage;
        if let Err(e) = self.store.remove(&keys.key_pause_until).await {
            log::warn!("Failed to clear pause: {}", e);
        }
        persist(&*self.store, &keys.key_enabled, &true).await;

        RetryQueue::new(self).schedule();
        true
    }

    // --- User controls ---

    /// Flip the enabled flag and return the new value. While paused this
    /// cancels the pause instead.
    pub async fn toggle(self: &Arc<Self>) -> bool {
        if self.pause_window().is_some() {
            return self.cancel_pause().await;
        }

        let enabled = {
            let mut state = self.lock();
            state.run.enabled = !state.run.enabled;
            state.run.enabled
        };
        log::info!("Auto kudos {}", if enabled { "enabled" } else { "disabled" });
        self.notifier.update_enabled_indicator(enabled);
        persist(&*self.store, &self.config.storage.key_enabled, &enabled).await;

        if enabled {
            RetryQueue::new(self).schedule();
        }
        enabled
    }

    /// Navigate to a longer feed. Every entry becomes eligible again.
    pub async fn load_more(&self) -> Result<()> {
        self.lock().processed.clear();
        self.page.load_more().await
    }

    // --- Scan entry point ---

    /// Run one scan pass: scan the feed, then attempt each new entry.
    ///
    /// Returns the number of entries attempted. A pass that finds another
    /// one running, or the session inactive, does nothing.
    pub async fn scan_pass(self: &Arc<Self>) -> Result<usize> {
        self.expire_pause_if_due().await;
        if !self.is_active() {
            return Ok(0);
        }
        let Some(_processing) = self.try_begin_processing() else {
            log::debug!("Scan already in progress, skipped");
            return Ok(0);
        };

        let entries = EntryScanner::new(self).scan()?;
        let executor = ActionExecutor::new(self);
        let mut attempted = 0;

        for entry in &entries {
            if !self.is_active() {
                log::debug!("Disabled during the pass, stopping");
                break;
            }
            if !self.mark_processed(&entry.id) {
                continue;
            }
            attempted += 1;

            let outcome = executor.attempt(entry).await;
            if outcome == Outcome::Failure && self.is_rate_limited() {
                log::info!("Too many errors, abandoning the rest of this pass");
                break;
            }
        }

        if attempted > 0 {
            log::info!("Scan finished, {} new entries processed", attempted);
        }

        RetryQueue::new(self).schedule();
        Ok(attempted)
    }
}
