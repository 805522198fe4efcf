//! User-facing notifications.

use chrono::{DateTime, Utc};

use crate::models::{IndicatorConfig, TargetRef};

/// Fire-and-forget sink for what the user should see.
pub trait Notifier: Send + Sync {
    fn notify_success(&self, target: &TargetRef);
    fn notify_failure(&self);
    fn update_counter(&self, count: u64);
    fn update_enabled_indicator(&self, enabled: bool);
    fn show_rate_limit_alert(&self);
    fn show_countdown(&self, until: DateTime<Utc>);
    fn clear_countdown(&self);
}

/// Renders notifications as log lines.
pub struct LogNotifier {
    indicator: IndicatorConfig,
}

impl LogNotifier {
    pub fn new(indicator: IndicatorConfig) -> Self {
        Self { indicator }
    }

    /// Counter text as shown on the badge.
    pub fn format_counter(count: u64) -> String {
        if count > 999 {
            "999+".to_string()
        } else {
            count.to_string()
        }
    }
}

impl Notifier for LogNotifier {
    fn notify_success(&self, target: &TargetRef) {
        match &target.activity_id {
            Some(activity) => log::info!("✓ Kudos given to activity {}", activity),
            None => log::info!("✓ Kudos given to entry {}", target.entry),
        }
    }

    fn notify_failure(&self) {
        log::warn!("✗ Kudos did not register");
    }

    fn update_counter(&self, count: u64) {
        log::info!("Kudos count: {}", Self::format_counter(count));
    }

    fn update_enabled_indicator(&self, enabled: bool) {
        let label = if enabled {
            &self.indicator.active_label
        } else {
            &self.indicator.paused_label
        };
        log::info!("{}", label);
    }

    fn show_rate_limit_alert(&self) {
        log::error!("Too many failed kudos: the site is probably rate limiting. Pausing.");
    }

    fn show_countdown(&self, until: DateTime<Utc>) {
        let remaining = (until - Utc::now()).num_seconds().max(0);
        log::warn!(
            "Paused until {} ({}m{:02}s left)",
            until.format("%H:%M:%S"),
            remaining / 60,
            remaining % 60
        );
    }

    fn clear_countdown(&self) {
        log::info!("Pause cleared");
    }
}
