//! Wall-clock scheduled refresh for remote datasets.
//!
//! Deployments warm their datasets at fixed local times (for example
//! `07:30,19:00@Europe/Berlin`) instead of relying on TTL expiry alone, so
//! the first command of the morning never pays the fetch latency.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::offset::LocalResult;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::RemoteCache;
use crate::error::ConfigError;

/// Days scanned past a DST gap before giving up on exact resolution.
const MAX_SCAN_DAYS: u64 = 7;

/// Wall-clock times, in a fixed timezone, at which datasets are re-warmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    times: Vec<NaiveTime>,
    tz: Tz,
}

/// One resolved trigger: the instant it fires and the `(date, slot)` it
/// belongs to, used to guard against double-firing in the same window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledFire {
    /// Instant the trigger fires.
    pub at: DateTime<Utc>,
    /// Calendar date of the slot in the configured timezone.
    pub date: NaiveDate,
    /// Time-of-day slot.
    pub slot: NaiveTime,
}

impl ScheduleSpec {
    /// Build a spec from explicit times and a timezone.
    ///
    /// # Errors
    ///
    /// Returns an error when `times` is empty.
    pub fn new(mut times: Vec<NaiveTime>, tz: Tz) -> Result<Self, ConfigError> {
        if times.is_empty() {
            return Err(ConfigError::Invalid(
                "refresh schedule needs at least one time of day".to_string(),
            ));
        }
        times.sort_unstable();
        times.dedup();
        Ok(Self { times, tz })
    }

    /// Parse a `"HH:MM,HH:MM@Area/City"` string.
    ///
    /// # Errors
    ///
    /// Returns an error for a missing/unknown timezone, an unparseable time,
    /// or an empty time list.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (times_part, tz_part) = spec.split_once('@').ok_or_else(|| {
            ConfigError::Invalid(format!(
                "refresh spec '{spec}' is missing '@<timezone>'"
            ))
        })?;

        let tz = Tz::from_str(tz_part.trim()).map_err(|_| {
            ConfigError::Invalid(format!("unknown timezone '{}'", tz_part.trim()))
        })?;

        let mut times = Vec::new();
        for part in times_part.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let time = NaiveTime::parse_from_str(part, "%H:%M").map_err(|_| {
                ConfigError::Invalid(format!(
                    "invalid refresh time '{part}', expected HH:MM"
                ))
            })?;
            times.push(time);
        }

        Self::new(times, tz)
    }

    /// Timezone the times are interpreted in.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Scheduled times of day, sorted and deduplicated.
    #[must_use]
    pub fn times(&self) -> &[NaiveTime] {
        &self.times
    }

    /// Next trigger strictly after `after`.
    ///
    /// Slots that fall into a DST gap on a given day simply do not fire that
    /// day.
    #[must_use]
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> ScheduledFire {
        let local_date = after.with_timezone(&self.tz).date_naive();
        for day in 0..=MAX_SCAN_DAYS {
            let Some(date) = local_date.checked_add_days(Days::new(day)) else {
                break;
            };
            for &slot in &self.times {
                if let Some(at) = resolve_local(self.tz, date, slot) {
                    if at > after {
                        return ScheduledFire { at, date, slot };
                    }
                }
            }
        }

        // Unreachable with real timezone data; fire in a day as a fallback.
        ScheduledFire {
            at: after + chrono::Duration::days(1),
            date: local_date,
            slot: self.times[0],
        }
    }
}

/// Resolve a local wall-clock time to an instant. DST folds take the
/// earlier instant; DST gaps resolve to nothing.
fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(early, _late) => Some(early.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// Spawn the scheduled-refresh task.
///
/// Sleeps until each configured trigger and re-warms every dataset in
/// `datasets` through [`RemoteCache::refresh_now`]. Refresh failures are
/// logged and the task keeps running; a wake landing in an already-fired
/// `(date, slot)` window - a timer firing early, or twice - is skipped.
pub fn spawn_scheduled_refresh(
    cache: Arc<RemoteCache>,
    spec: ScheduleSpec,
    datasets: Vec<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_fired: Option<(NaiveDate, NaiveTime)> = None;

        loop {
            let now = Utc::now();
            let fire = spec.next_occurrence(now);
            let wait = (fire.at - now).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            if last_fired == Some((fire.date, fire.slot)) {
                continue;
            }
            last_fired = Some((fire.date, fire.slot));

            info!(
                slot = %fire.slot,
                tz = %spec.timezone(),
                datasets = datasets.len(),
                "scheduled refresh firing"
            );
            for key in &datasets {
                if let Err(err) = cache.refresh_now(key).await {
                    warn!(dataset = %key, error = %err, "scheduled refresh failed");
                }
            }
        }
    })
}
