// src/pipeline/executor.rs

//! Action executor: give kudos to one entry and confirm it registered.

use std::sync::Arc;

use crate::error::Result;
use crate::models::{DelayConfig, FeedEntry, Outcome, TargetRef, TargetState};
use crate::pipeline::session::Session;
use crate::services::PageAdapter;

pub struct ActionExecutor<'a> {
    session: &'a Arc<Session>,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(session: &'a Arc<Session>) -> Self {
        Self { session }
    }

    /// Pace, act, verify, and apply the outcome to the session.
    pub async fn attempt(&self, entry: &FeedEntry) -> Outcome {
        tokio::time::sleep(self.session.pacing_delay()).await;

        let page = self.session.page();
        let state = page.target_state(&entry.target);
        if state.is_done() || state == TargetState::Detached {
            log::debug!("{} is already {:?}, skipped", entry.id, state);
            return Outcome::Skipped;
        }

        let confirmed = match click_and_verify(page, &self.session.config().delays, &entry.target)
            .await
        {
            Ok(confirmed) => confirmed,
            Err(e) => {
                log::warn!("Kudos on {} failed: {}", entry.id, e);
                false
            }
        };

        if confirmed {
            self.session.record_success(&entry.target).await;
            Outcome::Success
        } else {
            log::debug!("Kudos on {} did not register, queued for retry", entry.id);
            self.session.record_failure(entry.target.clone()).await;
            Outcome::Failure
        }
    }
}

/// Invoke the action, then check the target twice with growing waits.
pub(crate) async fn click_and_verify(
    page: &dyn PageAdapter,
    delays: &DelayConfig,
    target: &TargetRef,
) -> Result<bool> {
    page.invoke_action(target).await?;

    tokio::time::sleep(delays.verify_first()).await;
    if page.is_target_done(target) {
        return Ok(true);
    }

    tokio::time::sleep(delays.verify_second()).await;
    Ok(page.is_target_done(target))
}
