//! Scripted collaborators for pipeline tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{Config, EntryId, EntryKind, PageEntry, TargetRef, TargetState};
use crate::pipeline::session::Session;
use crate::services::{Notifier, PageAdapter};
use crate::storage::{KeyValueStore, MemoryStore};

/// One feed item of a `FakePage`.
#[derive(Debug, Clone)]
pub struct FakeEntry {
    id: String,
    owner: Option<String>,
    kind: EntryKind,
    position: Option<usize>,
    has_button: bool,
    state: TargetState,
    /// Whether each click registers; clicks past the end succeed
    script: VecDeque<bool>,
    confirm_late: bool,
    erroring: bool,
    checks_until_done: Option<u32>,
}

impl FakeEntry {
    pub fn new(id: &str, owner: &str) -> Self {
        Self {
            id: id.to_string(),
            owner: Some(owner.to_string()),
            kind: EntryKind::Regular,
            position: None,
            has_button: true,
            state: TargetState::Pending,
            script: VecDeque::new(),
            confirm_late: false,
            erroring: false,
            checks_until_done: None,
        }
    }

    pub fn kind(mut self, kind: EntryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    pub fn script(mut self, results: &[bool]) -> Self {
        self.script = results.iter().copied().collect();
        self
    }

    pub fn without_button(mut self) -> Self {
        self.has_button = false;
        self
    }

    pub fn without_owner(mut self) -> Self {
        self.owner = None;
        self
    }

    /// The page shows the kudos only at the second check.
    pub fn confirm_late(mut self) -> Self {
        self.confirm_late = true;
        self
    }

    /// Invoking the action returns an error.
    pub fn erroring(mut self) -> Self {
        self.erroring = true;
        self
    }
}

#[derive(Default)]
struct FakeState {
    user: Option<String>,
    entries: Vec<FakeEntry>,
    detached: Vec<String>,
    fail_listing: bool,
    invocations: Vec<String>,
    listing_calls: usize,
    load_more_calls: usize,
}

impl FakeState {
    fn entry_mut(&mut self, id: &str) -> Option<&mut FakeEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }
}

/// In-memory page with scripted click results.
#[derive(Default)]
pub struct FakePage {
    state: Mutex<FakeState>,
}

impl FakePage {
    pub fn new(user: &str, entries: Vec<FakeEntry>) -> Self {
        let page = Self::default();
        {
            let mut state = page.lock();
            state.user = Some(user.to_string());
        }
        for entry in entries {
            page.push_entry(entry);
        }
        page
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn push_entry(&self, mut entry: FakeEntry) {
        let mut state = self.lock();
        entry.position = entry.position.or(Some(state.entries.len()));
        state.entries.push(entry);
    }

    pub fn sign_out(&self) {
        self.lock().user = None;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.lock().fail_listing = fail;
    }

    fn set_state(&self, id: &str, target_state: TargetState) {
        let mut state = self.lock();
        let entry = state.entry_mut(id).unwrap();
        entry.state = target_state;
        entry.checks_until_done = None;
    }

    pub fn reset_entry(&self, id: &str) {
        self.set_state(id, TargetState::Pending);
    }

    pub fn complete_entry(&self, id: &str) {
        self.set_state(id, TargetState::Done);
    }

    pub fn detach_entry(&self, id: &str) {
        self.lock().detached.push(id.to_string());
    }

    pub fn invocations(&self) -> usize {
        self.lock().invocations.len()
    }

    pub fn invocations_for(&self, id: &str) -> usize {
        self.lock().invocations.iter().filter(|i| *i == id).count()
    }

    pub fn listing_calls(&self) -> usize {
        self.lock().listing_calls
    }

    pub fn load_more_calls(&self) -> usize {
        self.lock().load_more_calls
    }
}

#[async_trait]
impl PageAdapter for FakePage {
    fn find_current_user_id(&self) -> Option<String> {
        self.lock().user.clone()
    }

    fn find_feed_entries(&self) -> Result<Vec<PageEntry>> {
        let mut state = self.lock();
        state.listing_calls += 1;
        if state.fail_listing {
            return Err(AppError::page("feed", "listing failed"));
        }

        Ok(state
            .entries
            .iter()
            .filter(|e| !state.detached.contains(&e.id))
            .map(|e| PageEntry {
                kind: e.kind,
                dom_id: Some(e.id.clone()),
                index: None,
                fingerprint: e.id.clone(),
                position: e.position.unwrap_or_default(),
            })
            .collect())
    }

    fn find_action_target(&self, entry: &PageEntry) -> Option<TargetRef> {
        let state = self.lock();
        let id = entry.dom_id.as_deref()?;
        let fake = state.entries.iter().find(|e| e.id == id)?;
        fake.has_button.then(|| TargetRef {
            entry: EntryId::new(id),
            activity_id: Some(format!("act-{id}")),
        })
    }

    fn find_owner_id(&self, entry: &PageEntry) -> Option<String> {
        let state = self.lock();
        let id = entry.dom_id.as_deref()?;
        state.entries.iter().find(|e| e.id == id)?.owner.clone()
    }

    fn target_state(&self, target: &TargetRef) -> TargetState {
        let mut state = self.lock();
        let id = target.entry.as_str();
        if state.detached.iter().any(|d| d == id) {
            return TargetState::Detached;
        }
        let Some(entry) = state.entry_mut(id) else {
            return TargetState::Detached;
        };

        match entry.checks_until_done {
            Some(0) => {
                entry.checks_until_done = None;
                entry.state = TargetState::Done;
            }
            Some(n) => {
                entry.checks_until_done = Some(n - 1);
                return TargetState::Pending;
            }
            None => {}
        }
        entry.state
    }

    fn resolve_target(&self, entry: &EntryId) -> Option<TargetRef> {
        let state = self.lock();
        state
            .entries
            .iter()
            .find(|e| e.id == entry.as_str())
            .map(|e| TargetRef {
                entry: entry.clone(),
                activity_id: Some(format!("act-{}", e.id)),
            })
    }

    async fn invoke_action(&self, target: &TargetRef) -> Result<()> {
        let mut state = self.lock();
        let id = target.entry.as_str().to_string();
        state.invocations.push(id.clone());

        let entry = state
            .entry_mut(&id)
            .ok_or_else(|| AppError::page("kudos", "unknown entry"))?;
        if entry.erroring {
            return Err(AppError::page("kudos", "request rejected"));
        }
        if entry.script.pop_front().unwrap_or(true) {
            if entry.confirm_late {
                entry.checks_until_done = Some(1);
            } else {
                entry.state = TargetState::Done;
            }
        }
        Ok(())
    }

    async fn load_more(&self) -> Result<()> {
        self.lock().load_more_calls += 1;
        Ok(())
    }
}

/// Notifier that records every call.
#[derive(Default)]
pub struct RecordingNotifier {
    successes: Mutex<usize>,
    failures: Mutex<usize>,
    counters: Mutex<Vec<u64>>,
    indicators: Mutex<Vec<bool>>,
    alerts: Mutex<usize>,
    countdowns: Mutex<Vec<DateTime<Utc>>>,
    countdowns_cleared: Mutex<usize>,
}

impl RecordingNotifier {
    pub fn successes(&self) -> usize {
        *self.successes.lock().unwrap()
    }

    pub fn failures(&self) -> usize {
        *self.failures.lock().unwrap()
    }

    pub fn counter_updates(&self) -> Vec<u64> {
        self.counters.lock().unwrap().clone()
    }

    pub fn indicator_updates(&self) -> Vec<bool> {
        self.indicators.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> usize {
        *self.alerts.lock().unwrap()
    }

    pub fn countdowns(&self) -> Vec<DateTime<Utc>> {
        self.countdowns.lock().unwrap().clone()
    }

    pub fn countdowns_cleared(&self) -> usize {
        *self.countdowns_cleared.lock().unwrap()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_success(&self, _target: &TargetRef) {
        *self.successes.lock().unwrap() += 1;
    }

    fn notify_failure(&self) {
        *self.failures.lock().unwrap() += 1;
    }

    fn update_counter(&self, count: u64) {
        self.counters.lock().unwrap().push(count);
    }

    fn update_enabled_indicator(&self, enabled: bool) {
        self.indicators.lock().unwrap().push(enabled);
    }

    fn show_rate_limit_alert(&self) {
        *self.alerts.lock().unwrap() += 1;
    }

    fn show_countdown(&self, until: DateTime<Utc>) {
        self.countdowns.lock().unwrap().push(until);
    }

    fn clear_countdown(&self) {
        *self.countdowns_cleared.lock().unwrap() += 1;
    }
}

/// A started session over fakes.
pub struct Fixture {
    pub session: Arc<Session>,
    pub page: Arc<FakePage>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<dyn KeyValueStore>,
}

pub async fn fixture(page: FakePage, enabled: bool) -> Fixture {
    fixture_with(page, enabled, Config::default()).await
}

pub async fn fixture_with(page: FakePage, enabled: bool, config: Config) -> Fixture {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    store.save(&config.storage.key_first_run, &false).await.unwrap();
    store.save(&config.storage.key_enabled, &enabled).await.unwrap();

    let page = Arc::new(page);
    let notifier = Arc::new(RecordingNotifier::default());
    let session = Session::builder()
        .config(Arc::new(config))
        .page(page.clone())
        .notifier(notifier.clone())
        .store(Arc::clone(&store))
        .start()
        .await
        .unwrap();

    Fixture {
        session,
        page,
        notifier,
        store,
    }
}
