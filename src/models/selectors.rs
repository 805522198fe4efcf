// src/models/selectors.rs

//! CSS selectors for reading the dashboard feed.

use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// CSS selectors for reading the dashboard feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSelectors {
    /// Link to the signed-in user's profile; its href is the user's identity
    #[serde(default = "defaults::user_menu_link")]
    pub user_menu_link: String,

    /// One regular feed entry
    #[serde(default = "defaults::feed_entry")]
    pub feed_entry: String,

    /// One item of a grouped activity
    #[serde(default = "defaults::group_activity_item")]
    pub group_activity_item: String,

    /// Owner link within an entry; its href is the owner's identity
    #[serde(default = "defaults::owner_name")]
    pub owner_name: String,

    /// Kudos button within an entry
    #[serde(default = "defaults::kudos_button")]
    pub kudos_button: String,

    /// Icon shown while kudos has not been given
    #[serde(default = "defaults::unfilled_kudos")]
    pub unfilled_kudos: String,

    /// Icon shown once kudos has been given
    #[serde(default = "defaults::filled_kudos")]
    pub filled_kudos: String,

    /// Link to the activity page, used to read the activity id
    #[serde(default = "defaults::activity_link")]
    pub activity_link: String,

    /// Meta tag carrying the CSRF token
    #[serde(default = "defaults::csrf_meta")]
    pub csrf_meta: String,
}

impl Default for FeedSelectors {
    fn default() -> Self {
        Self {
            user_menu_link: defaults::user_menu_link(),
            feed_entry: defaults::feed_entry(),
            group_activity_item: defaults::group_activity_item(),
            owner_name: defaults::owner_name(),
            kudos_button: defaults::kudos_button(),
            unfilled_kudos: defaults::unfilled_kudos(),
            filled_kudos: defaults::filled_kudos(),
            activity_link: defaults::activity_link(),
            csrf_meta: defaults::csrf_meta(),
        }
    }
}

impl FeedSelectors {
    /// Selector matching both regular entries and grouped items.
    pub fn any_entry(&self) -> String {
        format!("{}, {}", self.feed_entry, self.group_activity_item)
    }

    /// Parse a selector string, mapping failures to `AppError::Selector`.
    pub fn parse(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }

    /// Check that every selector parses.
    pub fn validate(&self) -> Result<()> {
        for s in [
            &self.user_menu_link,
            &self.feed_entry,
            &self.group_activity_item,
            &self.owner_name,
            &self.kudos_button,
            &self.unfilled_kudos,
            &self.filled_kudos,
            &self.activity_link,
            &self.csrf_meta,
        ] {
            Self::parse(s)?;
        }
        Self::parse(&self.any_entry())?;
        Ok(())
    }
}

mod defaults {
    pub fn user_menu_link() -> String {
        ".user-menu a.nav-link.selection".into()
    }
    pub fn feed_entry() -> String {
        "div[data-testid='web-feed-entry']".into()
    }
    pub fn group_activity_item() -> String {
        "ul[class*='GroupActivity-module__listEntries'] > li".into()
    }
    pub fn owner_name() -> String {
        "a[data-testid='owners-name']".into()
    }
    pub fn kudos_button() -> String {
        "button[data-testid='kudos_button']".into()
    }
    pub fn unfilled_kudos() -> String {
        "svg[data-testid='unfilled_kudos']".into()
    }
    pub fn filled_kudos() -> String {
        "svg[data-testid='filled_kudos']".into()
    }
    pub fn activity_link() -> String {
        "a[href*='/activities/']".into()
    }
    pub fn csrf_meta() -> String {
        "meta[name='csrf-token']".into()
    }
}
