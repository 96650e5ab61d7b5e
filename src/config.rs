//! Layered configuration for the Paymo tool.
//!
//! Sources, lowest to highest priority:
//! 1. Built-in defaults
//! 2. `~/.paymo/config.yaml`
//! 3. A file passed explicitly (`--config`)
//! 4. `PAYMO_*` environment variables, `__` separating nested sections
//!    (`PAYMO_RATE_LIMIT__MAX_ATTEMPTS=3`)

use chrono_tz::Tz;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

use crate::helpers::client::{RateLimitPolicy, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://app.paymoapp.com/api/";
pub const DEFAULT_TIMEZONE: &str = "America/Chicago";
pub const DEFAULT_LOOKBACK_DAYS: u32 = 90;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("no Paymo API key configured (set api_key in ~/.paymo/config.yaml or PAYMO_API_KEY)")]
    MissingApiKey,

    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// A human-friendly name for a project and the task entries default to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProjectAlias {
    pub project_id: u64,
    pub task_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub low_water: u32,
    pub backpressure_ms: u64,
    pub pacing_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            low_water: 5,
            backpressure_ms: 2_000,
            pacing_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaymoConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timezone: String,
    pub projects: BTreeMap<String, ProjectAlias>,
    /// Days before the invoice date searched for billed entries.
    pub lookback_days: u32,
    pub output_dir: PathBuf,
    pub entries_page_size: Option<u32>,
    pub timeout_secs: u64,
    pub rate_limit: RateLimitConfig,
}

impl Default for PaymoConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            projects: BTreeMap::new(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            output_dir: PathBuf::from("."),
            entries_page_size: None,
            timeout_secs: 30,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl PaymoConfig {
    /// Load from every source, with an optional explicit file on top of
    /// the user-level one.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(explicit).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(explicit: Option<&Path>) -> Figment {
        Self::layered(Self::global_config_path(), explicit)
    }

    fn layered(global: Option<PathBuf>, explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(global_path) = global {
            if global_path.exists() {
                figment = figment.merge(Yaml::file(global_path));
            }
        }

        if let Some(path) = explicit {
            figment = figment.merge(Yaml::file(path));
        }

        figment.merge(Env::prefixed("PAYMO_").split("__"))
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".paymo").join("config.yaml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_timezone()?;
        if self.rate_limit.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit.max_attempts".into(),
                reason: "must allow at least one attempt".into(),
            });
        }
        if self.lookback_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lookback_days".into(),
                reason: "must be at least one day".into(),
            });
        }
        Ok(())
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey),
        }
    }

    pub fn default_timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "timezone".into(),
                reason: e.to_string(),
            })
    }

    pub fn alias(&self, name: &str) -> Option<&ProjectAlias> {
        self.projects.get(name)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.rate_limit.max_attempts,
            base_delay: Duration::from_millis(self.rate_limit.base_delay_ms),
            max_delay: Duration::from_millis(self.rate_limit.max_delay_ms),
        }
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            low_water: self.rate_limit.low_water,
            backpressure_delay: Duration::from_millis(self.rate_limit.backpressure_ms),
            pacing_delay: Duration::from_millis(self.rate_limit.pacing_ms),
        }
    }
}
