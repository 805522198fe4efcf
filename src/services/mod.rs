//! Collaborators of the kudos engine.
//!
//! This module contains:
//! - The page adapter contract (`PageAdapter`) and its HTML implementation
//!   (`HtmlFeedPage`)
//! - User notifications (`Notifier`, `LogNotifier`)

mod html;
mod notifier;
mod page;

pub use html::HtmlFeedPage;
pub use notifier::{LogNotifier, Notifier};
pub use page::PageAdapter;
