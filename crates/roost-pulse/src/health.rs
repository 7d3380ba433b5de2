//! Health and readiness responses projected from connection state.
//!
//! Probes are a diagnostic surface: they must produce a well-formed status
//! and body no matter how unhealthy the system they describe is, so nothing
//! in this module can fail.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::heartbeat::{ConnectionHeartbeat, ConnectionSnapshot};
use crate::watchdog::{self, WatchdogConfig};

/// How much internal state external probes get to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Report real state: failing when disconnected, degraded when
    /// zombie-ish.
    Deep,
    /// Always report healthy, so platform monitors do not flap on transient
    /// blips. The body still tells the truth.
    Shallow,
}

/// Probe outcome, ordered from healthy to failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Fully healthy.
    Ok,
    /// Connected but idle with no good latency signal; the watchdog may be
    /// about to restart the process.
    Degraded,
    /// Disconnected.
    Failing,
}

impl ProbeStatus {
    /// HTTP status code for this outcome.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Degraded => 206,
            Self::Failing => 503,
        }
    }
}

/// JSON body served by every probe endpoint. Stable external contract:
/// uptime monitors parse these fields.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthBody {
    /// False only when the probe reports failing.
    pub ok: bool,
    /// Whether a gateway session is currently established.
    pub connected: bool,
    /// Humanized process uptime.
    pub uptime: String,
    /// Seconds since the last observed gateway event, if any yet.
    pub last_event_age_s: Option<u64>,
    /// Most recent round-trip estimate in seconds.
    pub latency_s: Option<f64>,
}

/// Status and body of one probe evaluation.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    /// Mapped status.
    pub status: ProbeStatus,
    /// JSON body.
    pub body: HealthBody,
}

/// Maps connection state onto externally-polled probe responses.
///
/// Reads the same snapshot the watchdog polls, with the same zombie
/// heuristic, so a degraded probe is an early warning of the restart the
/// watchdog will eventually force.
pub struct HealthResponder {
    heartbeat: Arc<ConnectionHeartbeat>,
    config: WatchdogConfig,
    mode: ProbeMode,
}

impl HealthResponder {
    /// Create a responder over `heartbeat` using the watchdog's thresholds.
    #[must_use]
    pub fn new(heartbeat: Arc<ConnectionHeartbeat>, config: WatchdogConfig, mode: ProbeMode) -> Self {
        Self {
            heartbeat,
            config,
            mode,
        }
    }

    /// Liveness probe: always deep.
    #[must_use]
    pub fn liveness(&self) -> ProbeResponse {
        self.respond(ProbeMode::Deep)
    }

    /// Readiness probe: deep or shallow per configuration.
    #[must_use]
    pub fn readiness(&self) -> ProbeResponse {
        self.respond(self.mode)
    }

    fn respond(&self, mode: ProbeMode) -> ProbeResponse {
        let snapshot = self.heartbeat.snapshot();
        let now = Instant::now();
        let status = match mode {
            ProbeMode::Deep => classify(&snapshot, now, &self.config),
            ProbeMode::Shallow => ProbeStatus::Ok,
        };
        ProbeResponse {
            status,
            body: render_body(&snapshot, now, status),
        }
    }
}

/// Deep-mode status for a snapshot.
fn classify(snapshot: &ConnectionSnapshot, now: Instant, config: &WatchdogConfig) -> ProbeStatus {
    if !snapshot.connected {
        ProbeStatus::Failing
    } else if watchdog::is_zombie(snapshot, now, config) {
        ProbeStatus::Degraded
    } else {
        ProbeStatus::Ok
    }
}

fn render_body(snapshot: &ConnectionSnapshot, now: Instant, status: ProbeStatus) -> HealthBody {
    HealthBody {
        ok: status != ProbeStatus::Failing,
        connected: snapshot.connected,
        uptime: humanize(snapshot.uptime(now)),
        last_event_age_s: snapshot
            .last_event_at
            .map(|at| now.saturating_duration_since(at).as_secs()),
        latency_s: snapshot.latency.map(|l| l.as_secs_f64()),
    }
}

/// Format an uptime as a short human-readable string.
fn humanize(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
