//! Staleness watchdog: forces a process restart when the gateway connection
//! has been down too long or has gone zombie (connected but silent).
//!
//! Recovery is deliberately not attempted in-process. Once thresholds are
//! crossed the watchdog performs a bounded cleanup and exits non-zero; the
//! host supervisor restarting the process is simpler and more robust than
//! re-negotiating a wedged gateway session from inside it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::heartbeat::{ConnectionHeartbeat, ConnectionSnapshot};

/// Added to `check_every * 3` when no explicit stall threshold is set, so
/// the zombie window scales with the poll cadence instead of firing between
/// two checks of a fast-polling deployment.
const STALL_MARGIN: Duration = Duration::from_secs(30);

/// Hard cap on pre-exit cleanup.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit code for watchdog-initiated restarts (EX_SOFTWARE), so the
/// supervisor can tell deliberate self-termination from a crash.
pub const WATCHDOG_EXIT_CODE: i32 = 70;

/// Configuration for watchdog behavior.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Poll cadence.
    pub check_every: Duration,
    /// Idle cutoff for zombie detection; derived from `check_every` when
    /// unset.
    pub stall_threshold: Option<Duration>,
    /// Max tolerated outage; defaults to the stall threshold when unset.
    pub disconnect_grace: Option<Duration>,
    /// A round-trip estimate above this counts the same as having none.
    pub latency_ceiling: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_every: Duration::from_secs(60),
            stall_threshold: None,
            disconnect_grace: None,
            latency_ceiling: Duration::from_secs(10),
        }
    }
}

impl WatchdogConfig {
    /// Effective idle cutoff: the configured value, or three poll intervals
    /// plus a fixed margin.
    #[must_use]
    pub fn effective_stall_threshold(&self) -> Duration {
        self.stall_threshold
            .unwrap_or(self.check_every * 3 + STALL_MARGIN)
    }

    /// Effective outage cutoff: the configured value, or the stall
    /// threshold.
    #[must_use]
    pub fn effective_disconnect_grace(&self) -> Duration {
        self.disconnect_grace
            .unwrap_or_else(|| self.effective_stall_threshold())
    }
}

/// Why the watchdog decided to terminate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateReason {
    /// Connected but silent, with no evidence the link is alive.
    Zombie {
        /// Time since the last gateway event.
        idle_for: Duration,
        /// Last round-trip estimate, if any.
        latency: Option<Duration>,
    },
    /// Disconnected past the tolerated outage window.
    Disconnected {
        /// Length of the current outage.
        down_for: Duration,
    },
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zombie { idle_for, latency } => match latency {
                Some(latency) => write!(
                    f,
                    "zombie: no activity for {}s, latency={}ms",
                    idle_for.as_secs(),
                    latency.as_millis()
                ),
                None => write!(
                    f,
                    "zombie: no activity for {}s, latency=unknown",
                    idle_for.as_secs()
                ),
            },
            Self::Disconnected { down_for } => {
                write!(f, "disconnected for {}s", down_for.as_secs())
            }
        }
    }
}

/// Outcome of one watchdog check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing to do.
    Healthy,
    /// Thresholds crossed; the process must restart.
    Terminate(TerminateReason),
}

/// Whether a connected snapshot looks like a zombie: idle past the stall
/// threshold with no good latency signal.
///
/// Idleness alone can just mean a quiet shard, which is why a recent
/// sub-ceiling round trip vetoes the verdict.
#[must_use]
pub fn is_zombie(snapshot: &ConnectionSnapshot, now: Instant, config: &WatchdogConfig) -> bool {
    if !snapshot.connected {
        return false;
    }
    let latency_bad = snapshot
        .latency
        .map_or(true, |l| l > config.latency_ceiling);
    snapshot.idle_for(now) > config.effective_stall_threshold() && latency_bad
}

/// Evaluate one snapshot against the thresholds.
#[must_use]
pub fn evaluate(snapshot: &ConnectionSnapshot, now: Instant, config: &WatchdogConfig) -> Verdict {
    if snapshot.connected {
        if is_zombie(snapshot, now, config) {
            return Verdict::Terminate(TerminateReason::Zombie {
                idle_for: snapshot.idle_for(now),
                latency: snapshot.latency,
            });
        }
    } else {
        let down_for = snapshot.down_for(now);
        if down_for > config.effective_disconnect_grace() {
            return Verdict::Terminate(TerminateReason::Disconnected { down_for });
        }
    }
    Verdict::Healthy
}

/// Periodic evaluator that forces a restart when thresholds are crossed.
pub struct Watchdog {
    heartbeat: Arc<ConnectionHeartbeat>,
    config: WatchdogConfig,
}

impl Watchdog {
    /// Create a watchdog reading from `heartbeat`.
    #[must_use]
    pub fn new(heartbeat: Arc<ConnectionHeartbeat>, config: WatchdogConfig) -> Self {
        Self { heartbeat, config }
    }

    /// Poll until a termination verdict is reached, then return it.
    ///
    /// Split out from [`Watchdog::run`] so the decision loop can be
    /// exercised without exiting the test process.
    pub async fn watch(&self) -> TerminateReason {
        let mut ticker = tokio::time::interval(self.config.check_every);
        // The first tick completes immediately; skip it so a fresh process
        // gets one full interval before its first check.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let snapshot = self.heartbeat.snapshot();
            match evaluate(&snapshot, Instant::now(), &self.config) {
                Verdict::Healthy => {}
                Verdict::Terminate(reason) => return reason,
            }
        }
    }

    /// Run the watchdog to completion: poll, and on a termination verdict
    /// perform the bounded `cleanup` (close the gateway session, flush
    /// logs) and exit the process with [`WATCHDOG_EXIT_CODE`].
    ///
    /// The transition is absorbing - this never returns, and a cleanup that
    /// hangs or panics still ends in process exit rather than a silently
    /// dead watchdog.
    pub async fn run<C, Fut>(self, cleanup: C) -> !
    where
        C: FnOnce(TerminateReason) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let reason = self.watch().await;
        error!(reason = %reason, "watchdog threshold crossed, restarting process");

        match tokio::time::timeout(CLEANUP_TIMEOUT, tokio::spawn(cleanup(reason))).await {
            Ok(Ok(())) => info!("cleanup complete, exiting"),
            Ok(Err(join_err)) => warn!(error = %join_err, "cleanup task failed, exiting"),
            Err(_) => warn!(
                timeout_s = CLEANUP_TIMEOUT.as_secs(),
                "cleanup did not finish in time, exiting anyway"
            ),
        }
        std::process::exit(WATCHDOG_EXIT_CODE);
    }

    /// Spawn [`Watchdog::run`] as a background task.
    pub fn spawn<C, Fut>(self, cleanup: C) -> tokio::task::JoinHandle<()>
    where
        C: FnOnce(TerminateReason) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            self.run(cleanup).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(check_every: Duration) -> WatchdogConfig {
        WatchdogConfig {
            check_every,
            stall_threshold: None,
            disconnect_grace: None,
            latency_ceiling: Duration::from_secs(10),
        }
    }

    fn connected_snapshot() -> ConnectionSnapshot {
        let hb = ConnectionHeartbeat::new();
        hb.on_connect();
        hb.snapshot()
    }

    #[test]
    fn test_stall_threshold_derived_from_interval() {
        let cfg = config(Duration::from_secs(60));
        assert_eq!(
            cfg.effective_stall_threshold(),
            Duration::from_secs(60 * 3 + 30)
        );
    }

    #[test]
    fn test_explicit_stall_threshold_wins() {
        let cfg = WatchdogConfig {
            stall_threshold: Some(Duration::from_secs(600)),
            ..config(Duration::from_secs(60))
        };
        assert_eq!(cfg.effective_stall_threshold(), Duration::from_secs(600));
    }

    #[test]
    fn test_disconnect_grace_defaults_to_stall_threshold() {
        let cfg = WatchdogConfig {
            stall_threshold: Some(Duration::from_secs(600)),
            ..config(Duration::from_secs(60))
        };
        assert_eq!(cfg.effective_disconnect_grace(), Duration::from_secs(600));

        let cfg = WatchdogConfig {
            disconnect_grace: Some(Duration::from_secs(120)),
            ..config(Duration::from_secs(60))
        };
        assert_eq!(cfg.effective_disconnect_grace(), Duration::from_secs(120));
    }

    #[test]
    fn test_idle_with_unknown_latency_is_zombie() {
        let cfg = WatchdogConfig {
            stall_threshold: Some(Duration::from_secs(600)),
            ..config(Duration::from_secs(60))
        };
        let snap = connected_snapshot();
        let now = snap.last_event_at.unwrap() + Duration::from_secs(601);

        match evaluate(&snap, now, &cfg) {
            Verdict::Terminate(TerminateReason::Zombie { idle_for, latency }) => {
                assert_eq!(idle_for, Duration::from_secs(601));
                assert!(latency.is_none());
            }
            other => panic!("expected zombie verdict, got {other:?}"),
        }
    }

    #[test]
    fn test_idle_with_good_latency_is_healthy() {
        let cfg = WatchdogConfig {
            stall_threshold: Some(Duration::from_secs(600)),
            ..config(Duration::from_secs(60))
        };
        let hb = ConnectionHeartbeat::new();
        hb.on_connect();
        hb.record_latency(Some(Duration::from_millis(80)));
        let snap = hb.snapshot();
        let now = snap.last_event_at.unwrap() + Duration::from_secs(601);

        assert_eq!(evaluate(&snap, now, &cfg), Verdict::Healthy);
    }

    #[test]
    fn test_idle_with_poor_latency_is_zombie() {
        let cfg = WatchdogConfig {
            stall_threshold: Some(Duration::from_secs(600)),
            ..config(Duration::from_secs(60))
        };
        let hb = ConnectionHeartbeat::new();
        hb.on_connect();
        hb.record_latency(Some(Duration::from_secs(30)));
        let snap = hb.snapshot();
        let now = snap.last_event_at.unwrap() + Duration::from_secs(601);

        assert!(matches!(
            evaluate(&snap, now, &cfg),
            Verdict::Terminate(TerminateReason::Zombie { .. })
        ));
    }

    #[test]
    fn test_idle_below_threshold_is_healthy() {
        let cfg = WatchdogConfig {
            stall_threshold: Some(Duration::from_secs(600)),
            ..config(Duration::from_secs(60))
        };
        let snap = connected_snapshot();
        let now = snap.last_event_at.unwrap() + Duration::from_secs(599);

        assert_eq!(evaluate(&snap, now, &cfg), Verdict::Healthy);
    }

    #[test]
    fn test_disconnect_within_grace_is_healthy() {
        let cfg = WatchdogConfig {
            disconnect_grace: Some(Duration::from_secs(120)),
            ..config(Duration::from_secs(60))
        };
        let hb = ConnectionHeartbeat::new();
        hb.on_connect();
        hb.on_disconnect();
        let snap = hb.snapshot();

        // Exactly at the grace boundary: still healthy.
        let now = snap.last_disconnect_at.unwrap() + Duration::from_secs(120);
        assert_eq!(evaluate(&snap, now, &cfg), Verdict::Healthy);
    }

    #[test]
    fn test_disconnect_past_grace_terminates() {
        let cfg = WatchdogConfig {
            disconnect_grace: Some(Duration::from_secs(120)),
            ..config(Duration::from_secs(60))
        };
        let hb = ConnectionHeartbeat::new();
        hb.on_connect();
        hb.on_disconnect();
        let snap = hb.snapshot();

        let now = snap.last_disconnect_at.unwrap() + Duration::from_secs(121);
        match evaluate(&snap, now, &cfg) {
            Verdict::Terminate(TerminateReason::Disconnected { down_for }) => {
                assert_eq!(down_for, Duration::from_secs(121));
            }
            other => panic!("expected disconnected verdict, got {other:?}"),
        }
    }

    #[test]
    fn test_reason_display() {
        let reason = TerminateReason::Zombie {
            idle_for: Duration::from_secs(601),
            latency: None,
        };
        assert_eq!(
            reason.to_string(),
            "zombie: no activity for 601s, latency=unknown"
        );

        let reason = TerminateReason::Disconnected {
            down_for: Duration::from_secs(300),
        };
        assert_eq!(reason.to_string(), "disconnected for 300s");
    }

    #[tokio::test]
    async fn test_watch_returns_on_disconnect_past_grace() {
        let hb = Arc::new(ConnectionHeartbeat::new());
        hb.on_connect();
        hb.on_disconnect();

        let watchdog = Watchdog::new(
            Arc::clone(&hb),
            WatchdogConfig {
                check_every: Duration::from_millis(10),
                stall_threshold: None,
                disconnect_grace: Some(Duration::from_millis(30)),
                latency_ceiling: Duration::from_secs(10),
            },
        );

        let reason = tokio::time::timeout(Duration::from_secs(1), watchdog.watch())
            .await
            .expect("watchdog never fired");
        assert!(matches!(reason, TerminateReason::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_watch_stays_quiet_while_active() {
        let hb = Arc::new(ConnectionHeartbeat::new());
        hb.on_connect();
        hb.record_latency(Some(Duration::from_millis(50)));

        let watchdog = Watchdog::new(
            Arc::clone(&hb),
            WatchdogConfig {
                check_every: Duration::from_millis(10),
                stall_threshold: Some(Duration::from_secs(5)),
                disconnect_grace: None,
                latency_ceiling: Duration::from_secs(10),
            },
        );

        let fired = tokio::time::timeout(Duration::from_millis(100), watchdog.watch()).await;
        assert!(fired.is_err(), "watchdog fired on a healthy connection");
    }
}
