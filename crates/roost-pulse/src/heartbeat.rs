//! Gateway connection heartbeat tracking.
//!
//! A single [`ConnectionHeartbeat`] lives for the process lifetime. The
//! gateway integration layer is its only writer: it calls the event sinks as
//! the client observes session events. Everything else - the watchdog, the
//! health responder - reads consistent value copies via
//! [`ConnectionHeartbeat::snapshot`] and never mutates.

use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Point-in-time copy of the gateway connection state.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    /// Whether a gateway session is currently established.
    pub connected: bool,
    /// Last time any gateway activity was observed (heartbeat acks
    /// included), or `None` before the first event.
    pub last_event_at: Option<Instant>,
    /// Last full session establishment, if any.
    pub last_ready_at: Option<Instant>,
    /// Start of the current disconnect streak; `None` while connected.
    pub last_disconnect_at: Option<Instant>,
    /// Most recent round-trip estimate, if one is available.
    pub latency: Option<Duration>,
    /// When the process started.
    pub started_at: Instant,
}

impl ConnectionSnapshot {
    /// Time since the last observed gateway activity; measured from process
    /// start before the first event.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_event_at.unwrap_or(self.started_at))
    }

    /// Length of the current disconnect streak; measured from process start
    /// before the first connect.
    #[must_use]
    pub fn down_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_disconnect_at.unwrap_or(self.started_at))
    }

    /// Process uptime.
    #[must_use]
    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

#[derive(Debug)]
struct Inner {
    connected: bool,
    last_event_at: Option<Instant>,
    last_ready_at: Option<Instant>,
    last_disconnect_at: Option<Instant>,
    latency: Option<Duration>,
}

/// Tracks gateway connectivity transitions and timestamps.
#[derive(Debug)]
pub struct ConnectionHeartbeat {
    inner: RwLock<Inner>,
    started_at: Instant,
}

impl Default for ConnectionHeartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHeartbeat {
    /// Create a tracker. The process counts as disconnected until the first
    /// gateway event arrives.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                connected: false,
                last_event_at: None,
                last_ready_at: None,
                last_disconnect_at: None,
                latency: None,
            }),
            started_at: Instant::now(),
        }
    }

    /// Gateway socket (re)established.
    pub fn on_connect(&self) {
        self.mark_alive();
    }

    /// Full session established (handshake complete).
    pub fn on_ready(&self) {
        let now = Instant::now();
        let mut inner = self.inner.write();
        inner.connected = true;
        inner.last_event_at = Some(now);
        inner.last_ready_at = Some(now);
        inner.last_disconnect_at = None;
    }

    /// Session resumed after a drop.
    pub fn on_resume(&self) {
        self.mark_alive();
    }

    /// Any other gateway traffic: dispatches, heartbeat acks.
    pub fn on_activity(&self) {
        self.mark_alive();
    }

    /// Gateway connection lost.
    ///
    /// The downtime clock starts at the first notification of a streak;
    /// repeated notifications do not reset it.
    pub fn on_disconnect(&self) {
        let mut inner = self.inner.write();
        inner.connected = false;
        if inner.last_disconnect_at.is_none() {
            inner.last_disconnect_at = Some(Instant::now());
        }
    }

    /// Record the most recent round-trip estimate, or clear it when the
    /// client reports none.
    pub fn record_latency(&self, latency: Option<Duration>) {
        self.inner.write().latency = latency;
    }

    /// Take a consistent value copy of the current state. All fields come
    /// from a single lock acquisition; readers never see a torn state.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let inner = self.inner.read();
        ConnectionSnapshot {
            connected: inner.connected,
            last_event_at: inner.last_event_at,
            last_ready_at: inner.last_ready_at,
            last_disconnect_at: inner.last_disconnect_at,
            latency: inner.latency,
            started_at: self.started_at,
        }
    }

    fn mark_alive(&self) {
        let now = Instant::now();
        let mut inner = self.inner.write();
        inner.connected = true;
        inner.last_event_at = Some(now);
        inner.last_disconnect_at = None;
    }
}
