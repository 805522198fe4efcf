// src/models/entry.rs

//! Feed entries and the action targets inside them.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identifier of a feed entry for the lifetime of one page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the id of an entry from what the page exposes.
    ///
    /// Prefers the element id, then its `index` attribute, then a digest of
    /// the entry markup so the same entry keeps its id across scans.
    pub fn derive(entry: &PageEntry) -> Self {
        fn non_empty(s: &Option<String>) -> Option<&str> {
            s.as_deref().filter(|v| !v.trim().is_empty())
        }

        if let Some(id) = non_empty(&entry.dom_id) {
            return Self::new(id);
        }
        if let Some(index) = non_empty(&entry.index) {
            return Self::new(format!("index-{index}"));
        }

        let digest = Sha256::digest(entry.fingerprint.as_bytes());
        Self::new(format!("anon-{}", &hex::encode(digest)[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two shapes of feed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// A standalone activity entry
    Regular,
    /// One athlete's item inside a grouped activity
    Grouped,
}

/// A feed item as reported by the page, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntry {
    pub kind: EntryKind,
    /// Element id attribute
    pub dom_id: Option<String>,
    /// Element `index` attribute
    pub index: Option<String>,
    /// Markup used for the fallback id
    pub fingerprint: String,
    /// Position in document order
    pub position: usize,
}

impl PageEntry {
    pub fn id(&self) -> EntryId {
        EntryId::derive(self)
    }
}

/// Reference to an entry's kudos button that the page can re-resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub entry: EntryId,
    /// Activity id read from the entry, needed to act over HTTP
    pub activity_id: Option<String>,
}

/// What the page currently shows for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Kudos not given yet
    Pending,
    /// Kudos given
    Done,
    /// Button disabled, which the page does right after accepting a click
    Disabled,
    /// Target no longer in the document
    Detached,
}

impl TargetState {
    /// Whether the state signals that the action was accepted.
    pub fn is_done(self) -> bool {
        matches!(self, TargetState::Done | TargetState::Disabled)
    }
}

/// An actionable entry produced by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub target: TargetRef,
    /// Owner identity (profile href)
    pub owner: String,
}

/// Result of one action attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_entry(dom_id: Option<&str>, index: Option<&str>, fingerprint: &str) -> PageEntry {
        PageEntry {
            kind: EntryKind::Regular,
            dom_id: dom_id.map(str::to_string),
            index: index.map(str::to_string),
            fingerprint: fingerprint.to_string(),
            position: 0,
        }
    }

    #[test]
    fn test_derive_prefers_dom_id() {
        let entry = page_entry(Some("feed-entry-42"), Some("7"), "<div/>");
        assert_eq!(entry.id(), EntryId::new("feed-entry-42"));
    }

    #[test]
    fn test_derive_falls_back_to_index() {
        let entry = page_entry(Some("  "), Some("7"), "<div/>");
        assert_eq!(entry.id(), EntryId::new("index-7"));
    }

    #[test]
    fn test_derive_digest_is_stable() {
        let a = page_entry(None, None, "<li>Ride</li>");
        let b = page_entry(None, None, "<li>Ride</li>");
        let c = page_entry(None, None, "<li>Run</li>");

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert!(a.id().as_str().starts_with("anon-"));
    }

    #[test]
    fn test_disabled_counts_as_done() {
        assert!(TargetState::Done.is_done());
        assert!(TargetState::Disabled.is_done());
        assert!(!TargetState::Pending.is_done());
        assert!(!TargetState::Detached.is_done());
    }
}
