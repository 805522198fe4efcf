//! Retry queue.
//!
//! Failed attempts wait in the session's queue until a delayed drain
//! re-drives them. At most one drain is scheduled or running at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::models::{FailedAttempt, TargetState};
use crate::pipeline::executor::click_and_verify;
use crate::pipeline::session::Session;

/// What one drain did with the queue.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub already_done: usize,
    pub stale: usize,
    pub requeued: usize,
    pub dropped: usize,
}

pub struct RetryQueue<'a> {
    session: &'a Arc<Session>,
}

impl<'a> RetryQueue<'a> {
    pub fn new(session: &'a Arc<Session>) -> Self {
        Self { session }
    }

    /// Wait before the next drain. Longer once the guard threshold is
    /// crossed.
    fn drain_delay(&self) -> Duration {
        let config = self.session.config();
        let error_count = self.session.run_state().error_count;
        if error_count > config.guard.error_threshold {
            config.delays.recovery()
        } else {
            Duration::from_millis(config.delays.backoff_max_ms * 2)
        }
    }

    /// Arm one delayed drain.
    ///
    /// Returns false without doing anything if a drain is already armed or
    /// the queue is empty.
    pub fn schedule(&self) -> bool {
        {
            let mut state = self.session.lock();
            if state.run.retry_active || state.failed.is_empty() {
                return false;
            }
            state.run.retry_active = true;
        }

        let delay = self.drain_delay();
        log::debug!("Retry drain in {:?}", delay);

        let session = Arc::clone(self.session);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let report = RetryQueue::new(&session).drain().await;
            if report != DrainReport::default() {
                log::info!(
                    "Retry drain: {} succeeded, {} already done, {} stale, {} requeued, {} dropped",
                    report.succeeded,
                    report.already_done,
                    report.stale,
                    report.requeued,
                    report.dropped
                );
            }
        });
        true
    }

    /// Re-drive every queued attempt once.
    ///
    /// The queue is taken up front; attempts that fail during the drain go
    /// to the next round.
    pub async fn drain(&self) -> DrainReport {
        let batch = std::mem::take(&mut self.session.lock().failed);
        let mut report = DrainReport::default();
        let mut requeue = Vec::new();
        let max_attempts = self.session.config().retry.max_attempts;
        let page = self.session.page();

        let mut pending = batch.into_iter();
        while let Some(mut attempt) = pending.next() {
            if !self.session.is_active() {
                log::debug!("Inactive, deferring {} queued retries", pending.len() + 1);
                report.requeued += pending.len() + 1;
                requeue.push(attempt);
                requeue.extend(pending);
                break;
            }

            let Some(target) = page.resolve_target(&attempt.entry) else {
                log::debug!("{} left the page, retry dropped", attempt.entry);
                report.stale += 1;
                continue;
            };
            match page.target_state(&target) {
                TargetState::Detached => {
                    report.stale += 1;
                    continue;
                }
                state if state.is_done() => {
                    report.already_done += 1;
                    continue;
                }
                _ => {}
            }

            tokio::time::sleep(self.session.retry_delay()).await;

            let confirmed = click_and_verify(page, &self.session.config().delays, &target)
                .await
                .unwrap_or_else(|e| {
                    log::warn!("Retry on {} failed: {}", attempt.entry, e);
                    false
                });

            if confirmed {
                self.session.record_success(&target).await;
                report.succeeded += 1;
                continue;
            }

            self.session.record_retry_failure();
            attempt.target = target;
            if attempt.record_failure(max_attempts, Utc::now()) {
                report.requeued += 1;
                requeue.push(attempt);
            } else {
                log::info!(
                    "Giving up on {} after {} attempts",
                    attempt.entry,
                    attempt.attempts
                );
                report.dropped += 1;
            }
        }

        self.finish(requeue);
        report
    }

    fn finish(&self, requeue: Vec<FailedAttempt>) {
        let reschedule = {
            let mut state = self.session.lock();
            // Failures recorded during the drain stay behind the older ones
            let newer = std::mem::replace(&mut state.failed, requeue);
            state.failed.extend(newer);
            state.run.retry_active = false;
            !state.failed.is_empty()
        };

        if reschedule {
            self.schedule();
        }
    }
}
