// src/services/html.rs

//! Page adapter over dashboard HTML.
//!
//! The markup comes from a fixed string, a file on disk, or the live
//! dashboard over HTTP. With a static or file source, kudos are acknowledged
//! locally only, which makes it a dry run. With the live source they are
//! posted to the kudos endpoint.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{
    Config, EntryId, EntryKind, FeedSelectors, PageEntry, TargetRef, TargetState,
};
use crate::services::PageAdapter;
use crate::utils::extract_activity_id;
use crate::utils::http::{create_async_client, fetch_page_async};

/// Selectors compiled once when the page is built.
struct CompiledSelectors {
    user_menu_link: Selector,
    any_entry: Selector,
    group_activity_item: Selector,
    owner_name: Selector,
    kudos_button: Selector,
    unfilled_kudos: Selector,
    filled_kudos: Selector,
    activity_link: Selector,
    csrf_meta: Selector,
}

impl CompiledSelectors {
    fn compile(s: &FeedSelectors) -> Result<Self> {
        Ok(Self {
            user_menu_link: FeedSelectors::parse(&s.user_menu_link)?,
            any_entry: FeedSelectors::parse(&s.any_entry())?,
            group_activity_item: FeedSelectors::parse(&s.group_activity_item)?,
            owner_name: FeedSelectors::parse(&s.owner_name)?,
            kudos_button: FeedSelectors::parse(&s.kudos_button)?,
            unfilled_kudos: FeedSelectors::parse(&s.unfilled_kudos)?,
            filled_kudos: FeedSelectors::parse(&s.filled_kudos)?,
            activity_link: FeedSelectors::parse(&s.activity_link)?,
            csrf_meta: FeedSelectors::parse(&s.csrf_meta)?,
        })
    }
}

/// Where the markup comes from.
enum PageSource {
    Static,
    File(PathBuf),
    Live(LiveSource),
}

struct LiveSource {
    client: Client,
    dashboard_url: Url,
    load_more_url: Url,
    kudos_path: String,
}

/// Kudos accepted since the page was loaded.
///
/// Keyed by activity where known: a grouped item and the feed entry that
/// wraps it share one kudos button.
#[derive(Default)]
struct Acknowledged {
    entries: HashSet<EntryId>,
    activities: HashSet<String>,
}

impl Acknowledged {
    fn insert(&mut self, target: &TargetRef) {
        self.entries.insert(target.entry.clone());
        if let Some(activity) = &target.activity_id {
            self.activities.insert(activity.clone());
        }
    }

    fn contains(&self, target: &TargetRef) -> bool {
        self.entries.contains(&target.entry)
            || target
                .activity_id
                .as_ref()
                .is_some_and(|activity| self.activities.contains(activity))
    }
}

/// The markup currently shown plus kudos accepted since it was loaded.
struct Snapshot {
    html: String,
    acknowledged: Acknowledged,
}

/// Page adapter backed by dashboard HTML.
pub struct HtmlFeedPage {
    selectors: CompiledSelectors,
    source: PageSource,
    snapshot: RwLock<Snapshot>,
}

impl HtmlFeedPage {
    /// Build a page over fixed markup.
    pub fn from_html(html: impl Into<String>, selectors: &FeedSelectors) -> Result<Self> {
        Self::build(PageSource::Static, html.into(), selectors)
    }

    /// Build a page over a saved dashboard. `refresh` re-reads the file.
    pub async fn from_file(path: impl Into<PathBuf>, selectors: &FeedSelectors) -> Result<Self> {
        let path = path.into();
        let html = tokio::fs::read_to_string(&path).await?;
        Self::build(PageSource::File(path), html, selectors)
    }

    /// Build a page over the live dashboard.
    pub async fn live(config: &Config) -> Result<Self> {
        let client = create_async_client(&config.page)?;
        let dashboard_url = Url::parse(&config.page.dashboard_url)?;
        let load_more_url = Url::parse(&config.page.load_more_url)?;

        let html = fetch_page_async(&client, dashboard_url.as_str()).await?;
        let source = PageSource::Live(LiveSource {
            client,
            dashboard_url,
            load_more_url,
            kudos_path: config.page.kudos_path.clone(),
        });
        Self::build(source, html, &config.selectors)
    }

    fn build(source: PageSource, html: String, selectors: &FeedSelectors) -> Result<Self> {
        Ok(Self {
            selectors: CompiledSelectors::compile(selectors)?,
            source,
            snapshot: RwLock::new(Snapshot {
                html,
                acknowledged: Acknowledged::default(),
            }),
        })
    }

    /// Run `f` over the parsed current markup.
    fn with_document<R>(&self, f: impl FnOnce(&Html, &Acknowledged) -> R) -> R {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        let document = Html::parse_document(&snapshot.html);
        f(&document, &snapshot.acknowledged)
    }

    /// Feed items in document order, paired with their elements.
    fn entries_in<'a>(&self, document: &'a Html) -> Vec<(PageEntry, ElementRef<'a>)> {
        document
            .root_element()
            .select(&self.selectors.any_entry)
            .enumerate()
            .map(|(position, element)| {
                let kind = if self.selectors.group_activity_item.matches(&element) {
                    EntryKind::Grouped
                } else {
                    EntryKind::Regular
                };
                let entry = PageEntry {
                    kind,
                    dom_id: element.value().id().map(str::to_string),
                    index: element.value().attr("index").map(str::to_string),
                    fingerprint: element.html(),
                    position,
                };
                (entry, element)
            })
            .collect()
    }

    fn find_element<'a>(&self, document: &'a Html, id: &EntryId) -> Option<ElementRef<'a>> {
        self.entries_in(document)
            .into_iter()
            .find(|(entry, _)| &entry.id() == id)
            .map(|(_, element)| element)
    }

    fn target_of(&self, id: EntryId, element: ElementRef<'_>) -> Option<TargetRef> {
        element.select(&self.selectors.kudos_button).next()?;
        let activity_id = element
            .select(&self.selectors.activity_link)
            .filter_map(|link| link.value().attr("href"))
            .find_map(extract_activity_id);
        Some(TargetRef {
            entry: id,
            activity_id,
        })
    }

    fn csrf_token(&self) -> Option<String> {
        self.with_document(|document, _| {
            document
                .select(&self.selectors.csrf_meta)
                .next()
                .and_then(|meta| meta.value().attr("content"))
                .map(str::to_string)
        })
    }

    fn acknowledge(&self, target: &TargetRef) {
        self.snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .acknowledged
            .insert(target);
    }

    /// Replace the markup and return how many entries are new.
    fn replace_html(&self, html: String) -> usize {
        let ids = |html: &str| -> HashSet<EntryId> {
            let document = Html::parse_document(html);
            self.entries_in(&document)
                .into_iter()
                .map(|(entry, _)| entry.id())
                .collect()
        };

        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let before = ids(&snapshot.html);
        let after = ids(&html);
        snapshot.html = html;
        after.difference(&before).count()
    }

    async fn post_kudos(&self, live: &LiveSource, target: &TargetRef) -> Result<()> {
        let activity_id = target.activity_id.as_deref().ok_or_else(|| {
            AppError::page(
                "invoke_action",
                format!("entry {} has no activity id", target.entry),
            )
        })?;
        let url = live
            .dashboard_url
            .join(&live.kudos_path.replace("{activity_id}", activity_id))?;
        let token = self.csrf_token().unwrap_or_default();

        let primary = live
            .client
            .post(url.clone())
            .header("X-CSRF-Token", &token)
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await
            .and_then(|response| response.error_for_status());

        if let Err(e) = primary {
            log::debug!("Kudos request for {} failed ({}), retrying as form post", activity_id, e);
            live.client
                .post(url)
                .form(&[("authenticity_token", token.as_str())])
                .send()
                .await?
                .error_for_status()?;
        }
        Ok(())
    }
}

#[async_trait]
impl PageAdapter for HtmlFeedPage {
    fn find_current_user_id(&self) -> Option<String> {
        self.with_document(|document, _| {
            document
                .select(&self.selectors.user_menu_link)
                .next()
                .and_then(|link| link.value().attr("href"))
                .map(str::to_string)
        })
    }

    fn find_feed_entries(&self) -> Result<Vec<PageEntry>> {
        Ok(self.with_document(|document, _| {
            self.entries_in(document)
                .into_iter()
                .map(|(entry, _)| entry)
                .collect()
        }))
    }

    fn find_action_target(&self, entry: &PageEntry) -> Option<TargetRef> {
        let id = entry.id();
        self.with_document(|document, _| {
            let element = self.find_element(document, &id)?;
            self.target_of(id.clone(), element)
        })
    }

    fn find_owner_id(&self, entry: &PageEntry) -> Option<String> {
        let id = entry.id();
        self.with_document(|document, _| {
            self.find_element(document, &id)?
                .select(&self.selectors.owner_name)
                .next()
                .and_then(|owner| owner.value().attr("href"))
                .map(str::to_string)
        })
    }

    fn target_state(&self, target: &TargetRef) -> TargetState {
        self.with_document(|document, acknowledged| {
            let Some(button) = self
                .find_element(document, &target.entry)
                .and_then(|element| element.select(&self.selectors.kudos_button).next())
            else {
                return TargetState::Detached;
            };

            if acknowledged.contains(target) {
                TargetState::Done
            } else if button.value().attr("disabled").is_some() {
                TargetState::Disabled
            } else if button.select(&self.selectors.filled_kudos).next().is_some() {
                TargetState::Done
            } else if button.select(&self.selectors.unfilled_kudos).next().is_some() {
                TargetState::Pending
            } else {
                TargetState::Done
            }
        })
    }

    fn resolve_target(&self, entry: &EntryId) -> Option<TargetRef> {
        self.with_document(|document, _| {
            let element = self.find_element(document, entry)?;
            self.target_of(entry.clone(), element)
        })
    }

    async fn invoke_action(&self, target: &TargetRef) -> Result<()> {
        match &self.source {
            PageSource::Live(live) => self.post_kudos(live, target).await?,
            PageSource::Static | PageSource::File(_) => {
                log::debug!("Dry run: acknowledging kudos for {}", target.entry);
            }
        }
        self.acknowledge(target);
        Ok(())
    }

    async fn refresh(&self) -> Result<usize> {
        let html = match &self.source {
            PageSource::Static => return Ok(0),
            PageSource::File(path) => tokio::fs::read_to_string(path).await?,
            PageSource::Live(live) => {
                fetch_page_async(&live.client, live.dashboard_url.as_str()).await?
            }
        };
        Ok(self.replace_html(html))
    }

    async fn load_more(&self) -> Result<()> {
        match &self.source {
            PageSource::Live(live) => {
                let html = fetch_page_async(&live.client, live.load_more_url.as_str()).await?;
                let added = self.replace_html(html);
                log::info!("Loaded longer feed, {} new entries", added);
            }
            PageSource::Static | PageSource::File(_) => {
                self.refresh().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DASHBOARD: &str = r#"
        <html><head><meta name="csrf-token" content="tok123"></head><body>
        <div class="user-menu"><a class="nav-link selection" href="/athletes/1">Me</a></div>
        <div data-testid="web-feed-entry" id="entry-a">
            <a data-testid="owners-name" href="/athletes/2">Alice</a>
            <a href="/activities/1001">Morning Ride</a>
            <button data-testid="kudos_button"><svg data-testid="unfilled_kudos"></svg></button>
        </div>
        <div data-testid="web-feed-entry" id="entry-b">
            <a data-testid="owners-name" href="/athletes/1">Me</a>
            <a href="/activities/1002">My Run</a>
            <button data-testid="kudos_button"><svg data-testid="unfilled_kudos"></svg></button>
        </div>
        <ul class="GroupActivity-module__listEntries--t1Zbp">
            <li index="0">
                <a data-testid="owners-name" href="/athletes/3">Bob</a>
                <a href="/activities/1003">Group Ride</a>
                <button data-testid="kudos_button"><svg data-testid="filled_kudos"></svg></button>
            </li>
            <li index="1">
                <a data-testid="owners-name" href="/athletes/4">Carol</a>
                <button data-testid="kudos_button" disabled><svg data-testid="unfilled_kudos"></svg></button>
            </li>
        </ul>
        <div data-testid="web-feed-entry" id="entry-c">
            <a data-testid="owners-name" href="/athletes/5">Dan</a>
        </div>
        </body></html>
    "#;

    fn page() -> HtmlFeedPage {
        HtmlFeedPage::from_html(DASHBOARD, &FeedSelectors::default()).unwrap()
    }

    fn target(page: &HtmlFeedPage, id: &str) -> TargetRef {
        page.resolve_target(&EntryId::new(id)).unwrap()
    }

    #[test]
    fn test_current_user() {
        assert_eq!(page().find_current_user_id(), Some("/athletes/1".to_string()));
    }

    #[test]
    fn test_entries_in_document_order() {
        let entries = page().find_feed_entries().unwrap();
        let ids: Vec<String> = entries.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, ["entry-a", "entry-b", "index-0", "index-1", "entry-c"]);
        assert_eq!(entries[0].kind, EntryKind::Regular);
        assert_eq!(entries[2].kind, EntryKind::Grouped);
        assert!(entries.windows(2).all(|w| w[0].position < w[1].position));
    }

    #[test]
    fn test_target_and_owner() {
        let page = page();
        let entries = page.find_feed_entries().unwrap();

        let first = page.find_action_target(&entries[0]).unwrap();
        assert_eq!(first.activity_id.as_deref(), Some("1001"));
        assert_eq!(page.find_owner_id(&entries[0]), Some("/athletes/2".to_string()));

        // No kudos button in entry-c
        assert!(page.find_action_target(&entries[4]).is_none());
        assert_eq!(page.find_owner_id(&entries[4]), Some("/athletes/5".to_string()));
    }

    #[test]
    fn test_target_states() {
        let page = page();
        assert_eq!(page.target_state(&target(&page, "entry-a")), TargetState::Pending);
        assert_eq!(page.target_state(&target(&page, "index-0")), TargetState::Done);
        assert_eq!(page.target_state(&target(&page, "index-1")), TargetState::Disabled);

        let gone = TargetRef {
            entry: EntryId::new("entry-zzz"),
            activity_id: None,
        };
        assert_eq!(page.target_state(&gone), TargetState::Detached);
    }

    #[tokio::test]
    async fn test_dry_run_invoke_marks_done() {
        let page = page();
        let a = target(&page, "entry-a");

        page.invoke_action(&a).await.unwrap();
        assert!(page.is_target_done(&a));
        assert_eq!(page.csrf_token(), Some("tok123".to_string()));
    }

    #[tokio::test]
    async fn test_kudos_on_wrapping_entry_covers_grouped_item() {
        let nested = r#"
            <html><body>
            <a class="nav-link selection" href="/athletes/1">Me</a>
            <div data-testid="web-feed-entry" id="entry-g">
                <ul class="GroupActivity-module__listEntries--t1Zbp">
                    <li index="0">
                        <a data-testid="owners-name" href="/athletes/3">Bob</a>
                        <a href="/activities/1003">Group Ride</a>
                        <button data-testid="kudos_button"><svg data-testid="unfilled_kudos"></svg></button>
                    </li>
                </ul>
            </div>
            </body></html>
        "#;
        let page = HtmlFeedPage::from_html(nested, &FeedSelectors::default()).unwrap();
        let ids: Vec<String> = page
            .find_feed_entries()
            .unwrap()
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        assert_eq!(ids, ["entry-g", "index-0"]);

        let outer = target(&page, "entry-g");
        let inner = target(&page, "index-0");
        assert_eq!(outer.activity_id.as_deref(), Some("1003"));
        assert_eq!(inner.activity_id.as_deref(), Some("1003"));
        assert_eq!(page.target_state(&inner), TargetState::Pending);

        page.invoke_action(&outer).await.unwrap();
        assert_eq!(page.target_state(&outer), TargetState::Done);
        assert_eq!(page.target_state(&inner), TargetState::Done);
    }

    #[tokio::test]
    async fn test_static_refresh_reports_nothing_new() {
        assert_eq!(page().refresh().await.unwrap(), 0);
    }

    #[test]
    fn test_replace_html_counts_new_entries() {
        let page = page();
        let grown = DASHBOARD.replace(
            "</body>",
            r#"<div data-testid="web-feed-entry" id="entry-d"></div></body>"#,
        );
        assert_eq!(page.replace_html(grown), 1);
        assert!(page.resolve_target(&EntryId::new("entry-d")).is_none());
    }
}
