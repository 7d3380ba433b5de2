//! Environment-driven configuration for watchdog and probes.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::PulseError;
use crate::health::ProbeMode;
use crate::watchdog::WatchdogConfig;

/// Watchdog and probe configuration, read from environment-style keys:
///
/// - `CHECK_INTERVAL_SEC` - watchdog poll cadence
/// - `STALL_THRESHOLD_SEC` - idle-time zombie cutoff (derived from the
///   interval when unset)
/// - `DISCONNECT_GRACE_SEC` - max tolerated outage duration
/// - `LATENCY_CEILING_SEC` - round trips above this count as no signal
/// - `STRICT_PROBE` - `true` selects deep probing for `/` and `/ready`
/// - `PROBE_ADDR` - probe server bind address
#[derive(Debug, Clone)]
pub struct PulseConfig {
    /// Watchdog thresholds and cadence.
    pub watchdog: WatchdogConfig,
    /// Deep or shallow readiness probing.
    pub probe_mode: ProbeMode,
    /// Probe server bind address.
    pub probe_addr: SocketAddr,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            watchdog: WatchdogConfig::default(),
            probe_mode: ProbeMode::Shallow,
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl PulseConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a value fails to parse or validate.
    pub fn from_env() -> Result<Self, PulseError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` goes through this;
    /// tests inject maps here.
    ///
    /// # Errors
    ///
    /// Returns an error when a value fails to parse or validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PulseError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("CHECK_INTERVAL_SEC") {
            config.watchdog.check_every =
                Duration::from_secs(parse_secs("CHECK_INTERVAL_SEC", &raw)?);
        }
        if let Some(raw) = lookup("STALL_THRESHOLD_SEC") {
            config.watchdog.stall_threshold =
                Some(Duration::from_secs(parse_secs("STALL_THRESHOLD_SEC", &raw)?));
        }
        if let Some(raw) = lookup("DISCONNECT_GRACE_SEC") {
            config.watchdog.disconnect_grace =
                Some(Duration::from_secs(parse_secs("DISCONNECT_GRACE_SEC", &raw)?));
        }
        if let Some(raw) = lookup("LATENCY_CEILING_SEC") {
            config.watchdog.latency_ceiling =
                Duration::from_secs(parse_secs("LATENCY_CEILING_SEC", &raw)?);
        }
        if let Some(raw) = lookup("STRICT_PROBE") {
            config.probe_mode = if parse_bool("STRICT_PROBE", &raw)? {
                ProbeMode::Deep
            } else {
                ProbeMode::Shallow
            };
        }
        if let Some(raw) = lookup("PROBE_ADDR") {
            config.probe_addr = raw.trim().parse().map_err(|_| {
                PulseError::Config(format!("PROBE_ADDR must be host:port, got '{raw}'"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for zero durations.
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.watchdog.check_every.is_zero() {
            return Err(PulseError::Config(
                "CHECK_INTERVAL_SEC must be greater than 0".to_string(),
            ));
        }
        if self.watchdog.stall_threshold.is_some_and(|d| d.is_zero()) {
            return Err(PulseError::Config(
                "STALL_THRESHOLD_SEC must be greater than 0".to_string(),
            ));
        }
        if self.watchdog.disconnect_grace.is_some_and(|d| d.is_zero()) {
            return Err(PulseError::Config(
                "DISCONNECT_GRACE_SEC must be greater than 0".to_string(),
            ));
        }
        if self.watchdog.latency_ceiling.is_zero() {
            return Err(PulseError::Config(
                "LATENCY_CEILING_SEC must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_secs(var: &str, raw: &str) -> Result<u64, PulseError> {
    raw.trim().parse::<u64>().map_err(|_| {
        PulseError::Config(format!(
            "{var} must be an integer number of seconds, got '{raw}'"
        ))
    })
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, PulseError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PulseError::Config(format!(
            "{var} must be a boolean, got '{raw}'"
        ))),
    }
}
