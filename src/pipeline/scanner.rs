// src/pipeline/scanner.rs

//! Entry scanner.
//!
//! Turns what the page shows into the list of entries to act on. Entries
//! that can never be acted on (no button, no owner, the user's own) are
//! marked processed here so later scans skip them cheaply.

use std::collections::HashSet;

use crate::error::Result;
use crate::models::FeedEntry;
use crate::pipeline::session::Session;

pub struct EntryScanner<'a> {
    session: &'a Session,
}

impl<'a> EntryScanner<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Collect unprocessed, actionable entries owned by someone else, in
    /// document order.
    pub fn scan(&self) -> Result<Vec<FeedEntry>> {
        let page = self.session.page();

        let Some(current_user) = page.find_current_user_id() else {
            log::debug!("No signed-in user on the page, nothing to scan");
            return Ok(Vec::new());
        };

        let mut page_entries = page.find_feed_entries()?;
        page_entries.sort_by_key(|e| e.position);

        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for page_entry in &page_entries {
            let id = page_entry.id();
            if !seen.insert(id.clone()) || self.session.is_processed(&id) {
                continue;
            }

            let Some(target) = page.find_action_target(page_entry) else {
                log::trace!("{} has no kudos button", id);
                self.session.mark_processed(&id);
                continue;
            };

            let Some(owner) = page.find_owner_id(page_entry) else {
                log::debug!("{} has no owner link, skipped", id);
                self.session.mark_processed(&id);
                continue;
            };

            if owner == current_user {
                log::trace!("{} is your own activity", id);
                self.session.mark_processed(&id);
                continue;
            }

            entries.push(FeedEntry {
                id,
                kind: page_entry.kind,
                target,
                owner,
            });
        }

        log::debug!(
            "Scanned {} feed items, {} actionable",
            page_entries.len(),
            entries.len()
        );
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryId, EntryKind};
    use crate::pipeline::testing::{FakeEntry, FakePage, fixture};

    fn ids(entries: &[FeedEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_no_user_means_no_entries() {
        let page = FakePage::new("me", vec![FakeEntry::new("a", "alice")]);
        page.sign_out();
        let fx = fixture(page, true).await;

        let entries = EntryScanner::new(&fx.session).scan().unwrap();
        assert!(entries.is_empty());
        assert_eq!(fx.session.processed_count(), 0);
    }

    #[tokio::test]
    async fn test_document_order_and_kinds() {
        let page = FakePage::new(
            "me",
            vec![
                FakeEntry::new("c", "carol").at(2),
                FakeEntry::new("a", "alice").at(0),
                FakeEntry::new("b", "bob").at(1).kind(EntryKind::Grouped),
            ],
        );
        let fx = fixture(page, true).await;

        let entries = EntryScanner::new(&fx.session).scan().unwrap();
        assert_eq!(ids(&entries), ["a", "b", "c"]);
        assert_eq!(entries[1].kind, EntryKind::Grouped);
        assert_eq!(entries[0].owner, "alice");
    }

    #[tokio::test]
    async fn test_unactionable_entries_marked_processed() {
        let page = FakePage::new(
            "me",
            vec![
                FakeEntry::new("mine", "me"),
                FakeEntry::new("no-button", "alice").without_button(),
                FakeEntry::new("no-owner", "").without_owner(),
                FakeEntry::new("ok", "bob"),
            ],
        );
        let fx = fixture(page, true).await;

        let entries = EntryScanner::new(&fx.session).scan().unwrap();
        assert_eq!(ids(&entries), ["ok"]);
        for id in ["mine", "no-button", "no-owner"] {
            assert!(fx.session.is_processed(&EntryId::new(id)));
        }
        // Only skipped entries are marked here
        assert!(!fx.session.is_processed(&EntryId::new("ok")));
    }

    #[tokio::test]
    async fn test_processed_and_duplicate_entries_skipped() {
        let page = FakePage::new(
            "me",
            vec![
                FakeEntry::new("a", "alice"),
                FakeEntry::new("a", "alice"),
                FakeEntry::new("b", "bob"),
            ],
        );
        let fx = fixture(page, true).await;
        fx.session.mark_processed(&EntryId::new("b"));

        let entries = EntryScanner::new(&fx.session).scan().unwrap();
        assert_eq!(ids(&entries), ["a"]);
    }
}
