//! Utility functions and helpers.

pub mod http;

use std::time::Duration;

use rand::Rng;

/// Extract the activity id from an activity link (`/activities/123...`).
pub fn extract_activity_id(href: &str) -> Option<String> {
    let pattern = regex::Regex::new(r"/activities/(\d+)").ok()?;
    pattern
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}

/// Draw a duration uniformly from `[min, max]`, at millisecond resolution.
pub fn random_between(min: Duration, max: Duration) -> Duration {
    let lo = min.as_millis() as u64;
    let hi = max.as_millis() as u64;
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}
