//! The page adapter: the only surface that knows the feed's markup.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{EntryId, PageEntry, TargetRef, TargetState};

/// Read and act on the dashboard feed.
///
/// Readers work against the page as it currently stands; `refresh` and
/// `load_more` replace what the page shows.
#[async_trait]
pub trait PageAdapter: Send + Sync {
    /// Identity of the signed-in user. `None` when the page is not a
    /// signed-in dashboard.
    fn find_current_user_id(&self) -> Option<String>;

    /// Every feed item, regular and grouped, in document order.
    fn find_feed_entries(&self) -> Result<Vec<PageEntry>>;

    /// The kudos button of an entry.
    fn find_action_target(&self, entry: &PageEntry) -> Option<TargetRef>;

    /// Identity of the athlete who owns an entry.
    fn find_owner_id(&self, entry: &PageEntry) -> Option<String>;

    /// Current state of a target, `Detached` once it left the document.
    fn target_state(&self, target: &TargetRef) -> TargetState;

    /// Whether the page shows the action as accepted.
    fn is_target_done(&self, target: &TargetRef) -> bool {
        self.target_state(target).is_done()
    }

    /// Look the target of an entry up again in the live page.
    fn resolve_target(&self, entry: &EntryId) -> Option<TargetRef>;

    /// Give kudos. Implementations may try more than one invocation
    /// strategy before reporting an error.
    async fn invoke_action(&self, target: &TargetRef) -> Result<()>;

    /// Reload the page and return how many entries appeared.
    async fn refresh(&self) -> Result<usize> {
        Ok(0)
    }

    /// Navigate to a longer feed.
    async fn load_more(&self) -> Result<()> {
        Ok(())
    }
}
