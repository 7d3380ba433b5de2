//! Environment-driven configuration for the remote-data layer.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::schedule::ScheduleSpec;

/// Freshness window applied when `CACHE_TTL_SEC` is unset.
const DEFAULT_TTL_SECS: u64 = 300;

/// Cache and refresh configuration, read from environment-style keys:
///
/// - `CACHE_TTL_SEC` - default freshness window in seconds
/// - `CACHE_TTL_SEC_<DATASET>` - per-dataset override
/// - `REFRESH_TIMES` - wall-clock warm schedule, `"HH:MM,HH:MM@Area/City"`
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Freshness window for datasets without an override.
    pub default_ttl: Duration,
    /// Per-dataset freshness overrides.
    pub ttl_overrides: HashMap<String, Duration>,
    /// Wall-clock refresh schedule, if configured.
    pub refresh: Option<ScheduleSpec>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            ttl_overrides: HashMap::new(),
            refresh: None,
        }
    }
}

impl RemoteConfig {
    /// Read configuration from the process environment.
    ///
    /// `datasets` names the dataset keys that may carry a
    /// `CACHE_TTL_SEC_<DATASET>` override.
    ///
    /// # Errors
    ///
    /// Returns an error when a value fails to parse or validate.
    pub fn from_env(datasets: &[&str]) -> Result<Self, ConfigError> {
        Self::from_lookup(datasets, |var| std::env::var(var).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` goes through this;
    /// tests inject maps here.
    ///
    /// # Errors
    ///
    /// Returns an error when a value fails to parse or validate.
    pub fn from_lookup<F>(datasets: &[&str], lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("CACHE_TTL_SEC") {
            config.default_ttl = Duration::from_secs(parse_secs("CACHE_TTL_SEC", &raw)?);
        }

        for key in datasets {
            let var = format!(
                "CACHE_TTL_SEC_{}",
                key.to_ascii_uppercase().replace('-', "_")
            );
            if let Some(raw) = lookup(&var) {
                config
                    .ttl_overrides
                    .insert((*key).to_string(), Duration::from_secs(parse_secs(&var, &raw)?));
            }
        }

        if let Some(raw) = lookup("REFRESH_TIMES") {
            config.refresh = Some(ScheduleSpec::parse(&raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero freshness window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "CACHE_TTL_SEC must be greater than 0".to_string(),
            ));
        }
        for (key, ttl) in &self.ttl_overrides {
            if ttl.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "TTL for dataset '{key}' must be greater than 0"
                )));
            }
        }
        Ok(())
    }
}

fn parse_secs(var: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{var} must be an integer number of seconds, got '{raw}'"
        ))
    })
}
