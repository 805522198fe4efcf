//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::FeedSelectors;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pacing and verification delays
    #[serde(default)]
    pub delays: DelayConfig,

    /// Success-rate driven tuning of the nominal delays
    #[serde(default)]
    pub adaptive: AdaptiveConfig,

    /// Retry queue limits
    #[serde(default)]
    pub retry: RetryConfig,

    /// Rate-limit guard thresholds
    #[serde(default)]
    pub guard: GuardConfig,

    /// Scan trigger timing
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Dashboard location and HTTP behavior
    #[serde(default)]
    pub page: PageConfig,

    /// CSS selectors for the feed markup
    #[serde(default)]
    pub selectors: FeedSelectors,

    /// Enabled indicator labels
    #[serde(default)]
    pub indicator: IndicatorConfig,

    /// Persistent state location and keys
    #[serde(default)]
    pub storage: StorageConfig,

    /// Session start behavior
    #[serde(default)]
    pub session: SessionConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.delays.min_ms > self.delays.max_ms {
            return Err(AppError::validation("delays.min_ms must be <= delays.max_ms"));
        }
        if self.delays.backoff_min_ms > self.delays.backoff_max_ms {
            return Err(AppError::validation(
                "delays.backoff_min_ms must be <= delays.backoff_max_ms",
            ));
        }
        if self.adaptive.window_secs == 0 {
            return Err(AppError::validation("adaptive.window_secs must be > 0"));
        }
        if self.adaptive.grow_below > self.adaptive.shrink_above {
            return Err(AppError::validation(
                "adaptive.grow_below must be <= adaptive.shrink_above",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::validation("retry.max_attempts must be > 0"));
        }
        if self.guard.cooldown_secs == 0 {
            return Err(AppError::validation("guard.cooldown_secs must be > 0"));
        }
        if self.guard.cooldown_span().is_none() {
            return Err(AppError::validation("guard.cooldown_secs is out of range"));
        }
        if self.scheduler.interval_ms == 0 {
            return Err(AppError::validation("scheduler.interval_ms must be > 0"));
        }
        if self.scheduler.refresh_secs == 0 {
            return Err(AppError::validation("scheduler.refresh_secs must be > 0"));
        }
        if self.page.user_agent.trim().is_empty() {
            return Err(AppError::validation("page.user_agent is empty"));
        }
        if self.page.timeout_secs == 0 {
            return Err(AppError::validation("page.timeout_secs must be > 0"));
        }
        if !self.page.kudos_path.contains("{activity_id}") {
            return Err(AppError::validation(
                "page.kudos_path must contain the {activity_id} placeholder",
            ));
        }
        url::Url::parse(&self.page.dashboard_url)?;
        url::Url::parse(&self.page.load_more_url)?;
        self.selectors.validate()?;
        Ok(())
    }
}

/// Pacing, backoff and verification delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Nominal lower bound between actions
    #[serde(default = "defaults::min_ms")]
    pub min_ms: u64,

    /// Nominal upper bound between actions
    #[serde(default = "defaults::max_ms")]
    pub max_ms: u64,

    /// Lower bound once the error threshold is exceeded
    #[serde(default = "defaults::backoff_min_ms")]
    pub backoff_min_ms: u64,

    /// Upper bound once the error threshold is exceeded
    #[serde(default = "defaults::backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Wait before re-driving failed attempts under heavy errors
    #[serde(default = "defaults::recovery_ms")]
    pub recovery_ms: u64,

    /// Ceiling of the pacing delay while no error has been seen
    #[serde(default = "defaults::fast_path_cap_ms")]
    pub fast_path_cap_ms: u64,

    /// First state check after invoking the action
    #[serde(default = "defaults::verify_first_ms")]
    pub verify_first_ms: u64,

    /// Second, longer state check before concluding failure
    #[serde(default = "defaults::verify_second_ms")]
    pub verify_second_ms: u64,
}

impl DelayConfig {
    pub fn recovery(&self) -> Duration {
        Duration::from_millis(self.recovery_ms)
    }

    pub fn verify_first(&self) -> Duration {
        Duration::from_millis(self.verify_first_ms)
    }

    pub fn verify_second(&self) -> Duration {
        Duration::from_millis(self.verify_second_ms)
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            min_ms: defaults::min_ms(),
            max_ms: defaults::max_ms(),
            backoff_min_ms: defaults::backoff_min_ms(),
            backoff_max_ms: defaults::backoff_max_ms(),
            recovery_ms: defaults::recovery_ms(),
            fast_path_cap_ms: defaults::fast_path_cap_ms(),
            verify_first_ms: defaults::verify_first_ms(),
            verify_second_ms: defaults::verify_second_ms(),
        }
    }
}

/// Success-rate driven adjustment of the nominal delay range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    #[serde(default = "defaults::adaptive_enabled")]
    pub enabled: bool,

    /// Length of one observation window
    #[serde(default = "defaults::window_secs")]
    pub window_secs: u64,

    /// Attempts needed in a window before adjusting
    #[serde(default = "defaults::min_attempts")]
    pub min_attempts: u32,

    /// Success rate above which the range shrinks
    #[serde(default = "defaults::shrink_above")]
    pub shrink_above: f64,

    /// Success rate below which the range grows
    #[serde(default = "defaults::grow_below")]
    pub grow_below: f64,

    #[serde(default = "defaults::shrink_factor")]
    pub shrink_factor: f64,

    #[serde(default = "defaults::grow_factor")]
    pub grow_factor: f64,

    /// Smallest allowed nominal minimum
    #[serde(default = "defaults::floor_min_ms")]
    pub floor_min_ms: u64,

    /// Smallest allowed nominal maximum
    #[serde(default = "defaults::floor_max_ms")]
    pub floor_max_ms: u64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::adaptive_enabled(),
            window_secs: defaults::window_secs(),
            min_attempts: defaults::min_attempts(),
            shrink_above: defaults::shrink_above(),
            grow_below: defaults::grow_below(),
            shrink_factor: defaults::shrink_factor(),
            grow_factor: defaults::grow_factor(),
            floor_min_ms: defaults::floor_min_ms(),
            floor_max_ms: defaults::floor_max_ms(),
        }
    }
}

/// Retry queue limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Failed attempts after which an entry is dropped for good
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
        }
    }
}

/// Rate-limit guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Error count above which the backoff range applies and the whole
    /// loop pauses
    #[serde(default = "defaults::error_threshold")]
    pub error_threshold: u32,

    /// Length of the pause window
    #[serde(default = "defaults::cooldown_secs")]
    pub cooldown_secs: u64,
}

impl GuardConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// The cooldown as a calendar span. `None` when it does not fit.
    pub fn cooldown_span(&self) -> Option<chrono::Duration> {
        i64::try_from(self.cooldown_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            error_threshold: defaults::error_threshold(),
            cooldown_secs: defaults::cooldown_secs(),
        }
    }
}

/// Scan trigger timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Wait before the first scan so the page can render
    #[serde(default = "defaults::startup_delay_ms")]
    pub startup_delay_ms: u64,

    /// Fixed scan tick
    #[serde(default = "defaults::interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "defaults::near_bottom_debounce_ms")]
    pub near_bottom_debounce_ms: u64,

    #[serde(default = "defaults::mutation_debounce_ms")]
    pub mutation_debounce_ms: u64,

    /// How often the feed watcher reloads the page to look for new entries
    #[serde(default = "defaults::refresh_secs")]
    pub refresh_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: defaults::startup_delay_ms(),
            interval_ms: defaults::interval_ms(),
            near_bottom_debounce_ms: defaults::near_bottom_debounce_ms(),
            mutation_debounce_ms: defaults::mutation_debounce_ms(),
            refresh_secs: defaults::refresh_secs(),
        }
    }
}

/// Dashboard location and HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    #[serde(default = "defaults::dashboard_url")]
    pub dashboard_url: String,

    /// Dashboard URL that renders a longer feed
    #[serde(default = "defaults::load_more_url")]
    pub load_more_url: String,

    /// Kudos endpoint path, relative to the dashboard URL
    #[serde(default = "defaults::kudos_path")]
    pub kudos_path: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Environment variable holding the session cookie for live mode
    #[serde(default = "defaults::cookie_env")]
    pub cookie_env: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            dashboard_url: defaults::dashboard_url(),
            load_more_url: defaults::load_more_url(),
            kudos_path: defaults::kudos_path(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            cookie_env: defaults::cookie_env(),
        }
    }
}

/// Labels for the enabled indicator.
///
/// Which glyph means "running" has flip-flopped between releases, so both
/// are plain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "defaults::active_label")]
    pub active_label: String,

    #[serde(default = "defaults::paused_label")]
    pub paused_label: String,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            active_label: defaults::active_label(),
            paused_label: defaults::paused_label(),
        }
    }
}

/// Persistent state file and key names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// State file, relative to the storage directory
    #[serde(default = "defaults::state_file")]
    pub state_file: String,

    #[serde(default = "defaults::key_enabled")]
    pub key_enabled: String,

    #[serde(default = "defaults::key_pause_until")]
    pub key_pause_until: String,

    #[serde(default = "defaults::key_first_run")]
    pub key_first_run: String,

    #[serde(default = "defaults::key_kudos_count")]
    pub key_kudos_count: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: defaults::state_file(),
            key_enabled: defaults::key_enabled(),
            key_pause_until: defaults::key_pause_until(),
            key_first_run: defaults::key_first_run(),
            key_kudos_count: defaults::key_kudos_count(),
        }
    }
}

/// Session start behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Whether a brand-new installation starts enabled
    #[serde(default)]
    pub enable_on_first_run: bool,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `--verbose` is not given
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    // Delay defaults
    pub fn min_ms() -> u64 {
        100
    }
    pub fn max_ms() -> u64 {
        300
    }
    pub fn backoff_min_ms() -> u64 {
        1000
    }
    pub fn backoff_max_ms() -> u64 {
        2000
    }
    pub fn recovery_ms() -> u64 {
        30_000
    }
    pub fn fast_path_cap_ms() -> u64 {
        50
    }
    pub fn verify_first_ms() -> u64 {
        100
    }
    pub fn verify_second_ms() -> u64 {
        200
    }
    pub fn error_threshold() -> u32 {
        5
    }

    // Adaptive defaults
    pub fn adaptive_enabled() -> bool {
        true
    }
    pub fn window_secs() -> u64 {
        30
    }
    pub fn min_attempts() -> u32 {
        10
    }
    pub fn shrink_above() -> f64 {
        0.95
    }
    pub fn grow_below() -> f64 {
        0.70
    }
    pub fn shrink_factor() -> f64 {
        0.8
    }
    pub fn grow_factor() -> f64 {
        1.5
    }
    pub fn floor_min_ms() -> u64 {
        50
    }
    pub fn floor_max_ms() -> u64 {
        100
    }

    // Retry and guard defaults
    pub fn max_attempts() -> u32 {
        5
    }
    pub fn cooldown_secs() -> u64 {
        300
    }

    // Scheduler defaults
    pub fn startup_delay_ms() -> u64 {
        1000
    }
    pub fn interval_ms() -> u64 {
        200
    }
    pub fn near_bottom_debounce_ms() -> u64 {
        200
    }
    pub fn mutation_debounce_ms() -> u64 {
        250
    }
    pub fn refresh_secs() -> u64 {
        60
    }

    // Page defaults
    pub fn dashboard_url() -> String {
        "https://www.strava.com/dashboard".into()
    }
    pub fn load_more_url() -> String {
        "https://www.strava.com/dashboard?num_entries=500".into()
    }
    pub fn kudos_path() -> String {
        "/feed/activity/{activity_id}/kudo".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; auto-kudos/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn cookie_env() -> String {
        "AUTO_KUDOS_COOKIE".into()
    }

    // Indicator defaults
    pub fn active_label() -> String {
        "Auto Kudos: running".into()
    }
    pub fn paused_label() -> String {
        "Auto Kudos: paused".into()
    }

    // Storage defaults
    pub fn state_file() -> String {
        "state.json".into()
    }
    pub fn key_enabled() -> String {
        "strava_auto_kudos_enabled".into()
    }
    pub fn key_pause_until() -> String {
        "strava_auto_kudos_pause_until".into()
    }
    pub fn key_first_run() -> String {
        "strava_auto_kudos_first_run".into()
    }
    pub fn key_kudos_count() -> String {
        "strava_auto_kudos_count".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let mut config = Config::default();
        config.delays.min_ms = 500;
        config.delays.max_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_refresh() {
        let mut config = Config::default();
        config.scheduler.refresh_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_cooldown_out_of_range() {
        let mut config = Config::default();
        config.guard.cooldown_secs = u64::MAX;
        assert!(config.guard.cooldown_span().is_none());
        assert!(config.validate().is_err());

        config.guard.cooldown_secs = 300;
        assert_eq!(
            config.guard.cooldown_span(),
            Some(chrono::Duration::minutes(5))
        );
    }

    #[test]
    fn validate_rejects_kudos_path_without_placeholder() {
        let mut config = Config::default();
        config.page.kudos_path = "/feed/kudo".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [delays]
            min_ms = 200

            [guard]
            cooldown_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.delays.min_ms, 200);
        assert_eq!(config.delays.max_ms, 300);
        assert_eq!(config.guard.cooldown_secs, 60);
        assert_eq!(config.guard.error_threshold, 5);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.adaptive.enabled);
    }
}
