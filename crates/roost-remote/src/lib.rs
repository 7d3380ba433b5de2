//! Remote-data reliability for long-running bot services.
//!
//! The spreadsheet API behind our bots is slow and rate-limited, so nothing
//! in command-handling code talks to it directly. This crate is the substrate
//! that sits in between:
//!
//! - [`retry`] - exponential backoff with full jitter for transient remote
//!   failures
//! - [`cache`] - per-dataset TTL cache with single-flight refresh and
//!   stale-serving
//! - [`schedule`] - wall-clock background re-warming of registered datasets
//! - [`config`] - environment-driven settings
//!
//! Command handlers call [`RemoteCache::get`] and never observe transient
//! failures; the only error that crosses that boundary is a cold start with
//! nothing cached to fall back on.

#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod error;
pub mod retry;
pub mod schedule;

pub use cache::{RemoteCache, Row, RowSource, Rows};
pub use config::RemoteConfig;
pub use error::{CacheError, ConfigError, FetchError};
pub use retry::{RetryError, RetryPolicy, Retryable};
pub use schedule::{spawn_scheduled_refresh, ScheduleSpec};
