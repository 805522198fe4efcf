// src/pipeline/scheduler.rs

//! Scan scheduling.
//!
//! Every reason to scan arrives as a `Command` on one channel consumed by
//! the `Scheduler`. Bursty triggers are debounced; all of them end in the
//! same mutually exclusive scan pass, and a trigger that arrives while a
//! pass is running is dropped rather than queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::models::SchedulerConfig;
use crate::pipeline::session::Session;

/// Why a scan was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Once, shortly after the session starts
    Startup,
    /// New feed content appeared
    Mutation,
    /// The user scrolled close to the end of the feed
    NearBottom,
    /// Fixed tick
    Interval,
    /// Explicit request
    Manual,
}

/// Messages understood by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Scan(Trigger),
    Toggle,
    CancelPause,
    LoadMore,
    Shutdown,
}

/// Sending side of the scheduler channel.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl TriggerHandle {
    /// Returns false once the scheduler is gone.
    pub fn send(&self, command: Command) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn scan(&self, trigger: Trigger) -> bool {
        self.send(Command::Scan(trigger))
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }
}

/// Trailing-edge debounce for one trigger: fires once the trigger has been
/// quiet for `delay`.
#[derive(Debug)]
struct Debouncer {
    trigger: Trigger,
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    fn new(trigger: Trigger, delay: Duration) -> Self {
        Self {
            trigger,
            delay,
            deadline: None,
        }
    }

    fn push(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn poll(&mut self, now: Instant) -> Option<Trigger> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                Some(self.trigger)
            }
            _ => None,
        }
    }
}

pub struct Scheduler {
    session: Arc<Session>,
    config: SchedulerConfig,
    rx: mpsc::UnboundedReceiver<Command>,
    handle: TriggerHandle,
    mutation: Debouncer,
    near_bottom: Debouncer,
}

impl Scheduler {
    pub fn new(session: Arc<Session>) -> (Self, TriggerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = TriggerHandle { tx };
        let config = session.config().scheduler.clone();

        let scheduler = Self {
            mutation: Debouncer::new(
                Trigger::Mutation,
                Duration::from_millis(config.mutation_debounce_ms),
            ),
            near_bottom: Debouncer::new(
                Trigger::NearBottom,
                Duration::from_millis(config.near_bottom_debounce_ms),
            ),
            session,
            config,
            rx,
            handle: handle.clone(),
        };
        (scheduler, handle)
    }

    /// Process commands until `Shutdown`.
    pub async fn run(mut self) {
        log::info!(
            "Scheduler started (interval {}ms, feed refresh {}s)",
            self.config.interval_ms,
            self.config.refresh_secs
        );
        let sources = self.spawn_sources();

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.rx.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.handle_command(command).await,
                },
                _ = wait_until(deadline) => self.fire_due().await,
            }
        }

        for source in sources {
            source.abort();
        }
        log::info!("Scheduler stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.mutation.deadline(), self.near_bottom.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn fire_due(&mut self) {
        let now = Instant::now();
        let due = [self.mutation.poll(now), self.near_bottom.poll(now)];
        // Both due at once still means one scan
        if let Some(trigger) = due.into_iter().flatten().next() {
            self.dispatch_scan(trigger).await;
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Scan(Trigger::Mutation) => self.mutation.push(Instant::now()),
            Command::Scan(Trigger::NearBottom) => self.near_bottom.push(Instant::now()),
            Command::Scan(trigger) => self.dispatch_scan(trigger).await,
            Command::Toggle => {
                if self.session.toggle().await {
                    self.dispatch_scan(Trigger::Manual).await;
                }
            }
            Command::CancelPause => {
                if self.session.cancel_pause().await {
                    self.dispatch_scan(Trigger::Manual).await;
                } else {
                    log::info!("Not paused, nothing to cancel");
                }
            }
            Command::LoadMore => match self.session.load_more().await {
                Ok(()) => self.dispatch_scan(Trigger::Manual).await,
                Err(e) => log::warn!("Failed to load more entries: {}", e),
            },
            Command::Shutdown => {}
        }
    }

    /// Start a scan pass in the background unless one is running or the
    /// session is inactive.
    async fn dispatch_scan(&self, trigger: Trigger) {
        self.session.expire_pause_if_due().await;
        if !self.session.is_active() {
            log::trace!("{:?} trigger ignored, inactive", trigger);
            return;
        }
        if self.session.is_processing() {
            log::debug!("{:?} trigger dropped, scan in progress", trigger);
            return;
        }

        log::debug!("Scan triggered by {:?}", trigger);
        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            if let Err(e) = session.scan_pass().await {
                log::error!("Scan failed: {}", e);
            }
        });
    }

    fn spawn_sources(&self) -> Vec<JoinHandle<()>> {
        let mut sources = Vec::new();

        let handle = self.handle.clone();
        let startup = Duration::from_millis(self.config.startup_delay_ms);
        sources.push(tokio::spawn(async move {
            tokio::time::sleep(startup).await;
            handle.scan(Trigger::Startup);
        }));

        // A zero period turns the source off
        if self.config.interval_ms > 0 {
            let handle = self.handle.clone();
            let every = Duration::from_millis(self.config.interval_ms);
            sources.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if !handle.scan(Trigger::Interval) {
                        break;
                    }
                }
            }));
        } else {
            log::warn!("scheduler.interval_ms is 0, interval scans are off");
        }

        if self.config.refresh_secs > 0 {
            let handle = self.handle.clone();
            let session = Arc::clone(&self.session);
            let every = Duration::from_secs(self.config.refresh_secs);
            sources.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match session.page().refresh().await {
                        Ok(0) => {}
                        Ok(added) => {
                            log::debug!("{} new feed entries", added);
                            if !handle.scan(Trigger::Mutation) {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Feed refresh failed: {}", e),
                    }
                }
            }));
        } else {
            log::warn!("scheduler.refresh_secs is 0, the feed watcher is off");
        }

        let adaptive = &self.session.config().adaptive;
        if adaptive.enabled && adaptive.window_secs > 0 {
            let session = Arc::clone(&self.session);
            let every = Duration::from_secs(adaptive.window_secs);
            sources.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
                loop {
                    ticker.tick().await;
                    session.adjust_delays();
                }
            }));
        }

        sources
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;
    use crate::pipeline::testing::{FakeEntry, FakePage, fixture_with};

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.scheduler.interval_ms = 3_600_000;
        config.scheduler.refresh_secs = 3_600;
        config
    }

    #[test]
    fn test_debouncer_coalesces_burst() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Trigger::Mutation, Duration::from_millis(250));

        for offset in [0, 100, 200] {
            debouncer.push(start + Duration::from_millis(offset));
        }
        assert_eq!(debouncer.deadline(), Some(start + Duration::from_millis(450)));

        assert_eq!(debouncer.poll(start + Duration::from_millis(300)), None);
        assert_eq!(
            debouncer.poll(start + Duration::from_millis(450)),
            Some(Trigger::Mutation)
        );
        assert_eq!(debouncer.poll(start + Duration::from_secs(1)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_periods_leave_sources_off() {
        let fx = fixture_with(FakePage::new("me", vec![]), true, quiet_config()).await;
        let (scheduler, _handle) = Scheduler::new(Arc::clone(&fx.session));
        let sources = scheduler.spawn_sources();
        assert_eq!(sources.len(), 4);
        sources.iter().for_each(JoinHandle::abort);

        let mut config = quiet_config();
        config.scheduler.interval_ms = 0;
        config.scheduler.refresh_secs = 0;
        config.adaptive.window_secs = 0;
        let fx = fixture_with(FakePage::new("me", vec![]), true, config).await;
        let (scheduler, _handle) = Scheduler::new(Arc::clone(&fx.session));
        let sources = scheduler.spawn_sources();
        // Only the startup trigger
        assert_eq!(sources.len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let startup = sources.into_iter().next().unwrap();
        assert!(startup.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_one_scan() {
        let page = FakePage::new("me", vec![FakeEntry::new("a", "alice")]);
        let fx = fixture_with(page, true, quiet_config()).await;
        let (scheduler, handle) = Scheduler::new(Arc::clone(&fx.session));
        let task = tokio::spawn(scheduler.run());

        for _ in 0..5 {
            handle.scan(Trigger::NearBottom);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fx.page.listing_calls(), 1);
        assert_eq!(fx.page.invocations(), 1);

        // The startup trigger fires at 1s
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fx.page.listing_calls(), 2);

        assert!(handle.shutdown());
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_scan_is_dropped() {
        let page = FakePage::new("me", vec![FakeEntry::new("a", "alice")]);
        let fx = fixture_with(page, true, quiet_config()).await;
        let (scheduler, handle) = Scheduler::new(Arc::clone(&fx.session));
        let task = tokio::spawn(scheduler.run());

        let processing = fx.session.try_begin_processing().unwrap();
        handle.scan(Trigger::Manual);
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(processing);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.page.listing_calls(), 0);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_scans_pick_up_new_entries() {
        let page = FakePage::new("me", vec![FakeEntry::new("a", "alice")]);
        let fx = fixture_with(page, true, Config::default()).await;
        let (scheduler, handle) = Scheduler::new(Arc::clone(&fx.session));
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fx.page.invocations(), 1);

        fx.page.push_entry(FakeEntry::new("b", "bob"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fx.page.invocations(), 2);
        assert_eq!(fx.session.run_state().kudos_count, 2);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_command() {
        let page = FakePage::new("me", vec![FakeEntry::new("a", "alice")]);
        let fx = fixture_with(page, false, quiet_config()).await;
        let (scheduler, handle) = Scheduler::new(Arc::clone(&fx.session));
        let task = tokio::spawn(scheduler.run());

        handle.send(Command::Toggle);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fx.session.is_active());
        // Enabling scans right away
        assert_eq!(fx.page.invocations(), 1);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_session_ignores_triggers() {
        let page = FakePage::new("me", vec![FakeEntry::new("a", "alice")]);
        let fx = fixture_with(page, false, quiet_config()).await;
        let (scheduler, handle) = Scheduler::new(Arc::clone(&fx.session));
        let task = tokio::spawn(scheduler.run());

        handle.scan(Trigger::Manual);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fx.page.listing_calls(), 0);

        handle.shutdown();
        task.await.unwrap();
    }
}
