//! Connection reliability for long-running bot services.
//!
//! A bot process that loses its gateway session - or keeps one that has gone
//! silent - is worse than a dead one: the supervisor will happily leave it
//! running forever. This crate watches the connection and forces the issue:
//!
//! - [`heartbeat`] - connectivity transitions and timestamps, written by the
//!   gateway integration layer, read by everything else as value snapshots
//! - [`watchdog`] - periodic staleness evaluation that terminates the
//!   process; the supervisor restart is the recovery strategy
//! - [`health`] - projects the same snapshot onto probe semantics
//! - [`server`] - the HTTP surface platform monitors poll
//! - [`config`] - environment-driven settings

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod server;
pub mod watchdog;

pub use config::PulseConfig;
pub use error::{PulseError, PulseResult};
pub use health::{HealthBody, HealthResponder, ProbeMode, ProbeResponse, ProbeStatus};
pub use heartbeat::{ConnectionHeartbeat, ConnectionSnapshot};
pub use server::ProbeServer;
pub use watchdog::{
    evaluate, TerminateReason, Verdict, Watchdog, WatchdogConfig, WATCHDOG_EXIT_CODE,
};
