//! Configuration for the remote store client and scan pacing.

use std::time::Duration;

/// Largest page the list-entries endpoint accepts.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Default Open Cloud API host.
pub const DEFAULT_API_BASE: &str = "https://apis.roblox.com";

/// Default users API host, used for username lookups.
pub const DEFAULT_USERS_BASE: &str = "https://users.roblox.com";

/// Environment variable holding the universe id.
pub const UNIVERSE_ID_ENV: &str = "ROBLOX_UNIVERSE_ID";

/// Environment variable holding the Open Cloud API key.
pub const API_KEY_ENV: &str = "ROBLOX_API_KEY";

/// Errors from validating configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration {name}")]
    Missing { name: &'static str },
    #[error("invalid configuration {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Delays inserted between remote calls.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Lower bound of the jittered pause after each per-key call.
    pub key_pace_min: Duration,
    /// Upper bound of the jittered pause after each per-key call.
    pub key_pace_max: Duration,
    /// Pause after each full page.
    pub page_pace: Duration,
    /// Pause after a 429 before the page is restarted.
    pub rate_limit_backoff: Duration,
}

impl PacingConfig {
    /// No delays at all. Intended for tests and in-memory remotes.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            key_pace_min: Duration::ZERO,
            key_pace_max: Duration::ZERO,
            page_pace: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            key_pace_min: Duration::from_millis(250),
            key_pace_max: Duration::from_millis(500),
            page_pace: Duration::from_secs(1),
            rate_limit_backoff: Duration::from_secs(30),
        }
    }
}

/// Process-wide client configuration, built once at startup and shared by
/// reference with every component.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Universe whose datastores are scanned.
    pub universe_id: String,
    /// Open Cloud API key sent as `x-api-key`.
    pub api_key: String,
    /// Open Cloud host, without a trailing slash.
    pub api_base: String,
    /// Users API host, without a trailing slash.
    pub users_base: String,
    /// Timeout applied to every remote call.
    pub request_timeout: Duration,
    /// Keys requested per page. Clamped to `1..=MAX_PAGE_LIMIT`.
    pub page_limit: u32,
    pub pacing: PacingConfig,
    /// Rate-limit restarts of the same page tolerated before the scan fails.
    pub max_consecutive_backoffs: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            universe_id: String::new(),
            api_key: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            users_base: DEFAULT_USERS_BASE.to_string(),
            request_timeout: Duration::from_secs(10),
            page_limit: MAX_PAGE_LIMIT,
            pacing: PacingConfig::default(),
            max_consecutive_backoffs: 10,
        }
    }
}

impl SweepConfig {
    /// Default configuration for the given universe and API key.
    #[must_use]
    pub fn new(universe_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            universe_id: universe_id.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Checks the required values and pacing bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for an empty universe id or API key,
    /// and [`ConfigError::Invalid`] for inconsistent values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.universe_id.trim().is_empty() {
            return Err(ConfigError::Missing {
                name: UNIVERSE_ID_ENV,
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing { name: API_KEY_ENV });
        }
        if !self.universe_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::Invalid {
                name: UNIVERSE_ID_ENV,
                reason: format!("'{}' is not a numeric id", self.universe_id),
            });
        }
        if self.pacing.key_pace_min > self.pacing.key_pace_max {
            return Err(ConfigError::Invalid {
                name: "key pace",
                reason: format!(
                    "minimum {:?} exceeds maximum {:?}",
                    self.pacing.key_pace_min, self.pacing.key_pace_max
                ),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "request timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Page limit clamped to what the remote accepts.
    #[must_use]
    pub fn effective_page_limit(&self) -> u32 {
        self.page_limit.clamp(1, MAX_PAGE_LIMIT)
    }

    /// URL of a standard-datastores endpoint for this universe.
    #[must_use]
    pub fn datastore_url(&self, path: &str) -> String {
        format!(
            "{}/datastores/v1/universes/{}/standard-datastores/{}",
            self.api_base.trim_end_matches('/'),
            self.universe_id,
            path.trim_start_matches('/')
        )
    }

    /// URL of a memory-store endpoint.
    #[must_use]
    pub fn memory_store_url(&self, path: &str) -> String {
        format!(
            "{}/memory-store/v1/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// URL of a users API endpoint.
    #[must_use]
    pub fn users_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.users_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
