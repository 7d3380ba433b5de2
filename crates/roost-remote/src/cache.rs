//! TTL cache over remote datasets with single-flight refresh.
//!
//! Every remote fetch - TTL-expiry, forced, or scheduled - funnels through
//! [`crate::retry::execute`]. Concurrent callers hitting the same stale key
//! collapse into one fetch: the first caller becomes the leader and does the
//! I/O, everyone else parks on a oneshot channel and receives the leader's
//! outcome. A failed refresh leaves the previous snapshot untouched, so
//! command handlers keep getting rows; the only error they can observe is a
//! cold start with nothing cached to fall back on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{CacheError, FetchError};
use crate::retry::{self, RetryError, RetryPolicy};

/// One spreadsheet row, as returned by the remote API.
pub type Row = Vec<String>;

/// Immutable snapshot of a dataset. Cheap to clone and hand to callers;
/// holders can never mutate cache state through it.
pub type Rows = Arc<Vec<Row>>;

/// Source of truth for dataset rows.
///
/// Implemented by the spreadsheet client; the cache is its only caller.
pub trait RowSource: Send + Sync {
    /// Fetch all rows for the dataset from the remote API.
    fn fetch(&self, key: &str) -> BoxFuture<'_, Result<Vec<Row>, FetchError>>;
}

/// Cached snapshot of one dataset.
#[derive(Debug, Clone)]
struct CacheEntry {
    rows: Rows,
    fetched_at: Instant,
    ttl: Duration,
    invalidated: bool,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        !self.invalidated && now.saturating_duration_since(self.fetched_at) < self.ttl
    }
}

type RefreshResult = Result<Rows, RetryError<FetchError>>;

/// Per-key state. `Refreshing` is the single-flight guard: at most one
/// outstanding fetch per dataset key at any time.
enum EntryState {
    /// Snapshot available; may be stale.
    Ready(CacheEntry),
    /// A refresh is in flight; waiters receive the leader's outcome.
    Refreshing {
        prev: Option<CacheEntry>,
        waiters: Vec<oneshot::Sender<RefreshResult>>,
    },
}

/// TTL cache over remote datasets.
///
/// Entries are created on first access per dataset key and replaced (never
/// mutated in place) on every successful refresh.
pub struct RemoteCache {
    source: Arc<dyn RowSource>,
    policy: RetryPolicy,
    default_ttl: Duration,
    ttl_overrides: HashMap<String, Duration>,
    entries: Mutex<HashMap<String, EntryState>>,
}

impl RemoteCache {
    /// Create a cache over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn RowSource>, policy: RetryPolicy, default_ttl: Duration) -> Self {
        Self {
            source,
            policy,
            default_ttl,
            ttl_overrides: HashMap::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Override the freshness window for one dataset.
    #[must_use]
    pub fn with_ttl(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.ttl_overrides.insert(key.into(), ttl);
        self
    }

    fn ttl_for(&self, key: &str) -> Duration {
        self.ttl_overrides
            .get(key)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Get the rows for a dataset, refreshing first if the snapshot is
    /// missing, stale, or invalidated.
    ///
    /// # Errors
    ///
    /// Only on a cold start: no snapshot exists yet and the first fetch
    /// failed after retries. Every other failure degrades to stale-serving.
    pub async fn get(&self, key: &str) -> Result<Rows, CacheError> {
        self.get_or_refresh(key, false).await
    }

    /// Force a refresh, bypassing the TTL. Still single-flighted: if a
    /// refresh is already in flight this call joins it.
    ///
    /// # Errors
    ///
    /// As with [`RemoteCache::get`]: only on a cold start. A failed forced
    /// refresh with a prior snapshot logs and returns the stale rows.
    pub async fn refresh_now(&self, key: &str) -> Result<Rows, CacheError> {
        self.get_or_refresh(key, true).await
    }

    /// Mark a dataset stale so the next `get` refreshes it. The current
    /// snapshot is kept as the stale-serving fallback.
    pub async fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(EntryState::Ready(entry)) = entries.get_mut(key) {
            entry.invalidated = true;
            debug!(dataset = %key, "dataset invalidated");
        }
    }

    async fn get_or_refresh(&self, key: &str, force: bool) -> Result<Rows, CacheError> {
        // One lock acquisition decides: serve fresh, join the in-flight
        // refresh, or take leadership.
        let rx = {
            let mut entries = self.entries.lock().await;
            match entries.remove(key) {
                Some(EntryState::Ready(entry)) if !force && entry.is_fresh(Instant::now()) => {
                    let rows = Arc::clone(&entry.rows);
                    entries.insert(key.to_string(), EntryState::Ready(entry));
                    return Ok(rows);
                }
                Some(EntryState::Refreshing { prev, mut waiters }) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    entries.insert(key.to_string(), EntryState::Refreshing { prev, waiters });
                    Some(rx)
                }
                Some(EntryState::Ready(entry)) => {
                    entries.insert(
                        key.to_string(),
                        EntryState::Refreshing {
                            prev: Some(entry),
                            waiters: Vec::new(),
                        },
                    );
                    None
                }
                None => {
                    entries.insert(
                        key.to_string(),
                        EntryState::Refreshing {
                            prev: None,
                            waiters: Vec::new(),
                        },
                    );
                    None
                }
            }
        };

        match rx {
            Some(rx) => match rx.await {
                Ok(Ok(rows)) => Ok(rows),
                Ok(Err(err)) => Err(CacheError::ColdStart {
                    key: key.to_string(),
                    source: err,
                }),
                Err(_) => Err(CacheError::Interrupted {
                    key: key.to_string(),
                }),
            },
            None => self.lead_refresh(key).await,
        }
    }

    /// Perform the remote fetch as the single-flight leader and publish the
    /// outcome to any callers that joined while it was in flight.
    async fn lead_refresh(&self, key: &str) -> Result<Rows, CacheError> {
        let source = Arc::clone(&self.source);
        let result = retry::execute(&self.policy, || source.fetch(key)).await;

        let mut entries = self.entries.lock().await;
        let (prev, waiters) = match entries.remove(key) {
            Some(EntryState::Refreshing { prev, waiters }) => (prev, waiters),
            Some(EntryState::Ready(entry)) => (Some(entry), Vec::new()),
            None => (None, Vec::new()),
        };

        match result {
            Ok(rows) => {
                let snapshot: Rows = Arc::new(rows);
                let entry = CacheEntry {
                    rows: Arc::clone(&snapshot),
                    fetched_at: Instant::now(),
                    ttl: self.ttl_for(key),
                    invalidated: false,
                };
                entries.insert(key.to_string(), EntryState::Ready(entry));
                debug!(dataset = %key, rows = snapshot.len(), "dataset refreshed");

                for tx in waiters {
                    let _ = tx.send(Ok(Arc::clone(&snapshot)));
                }
                Ok(snapshot)
            }
            Err(err) => match prev {
                Some(entry) => {
                    // Stale-serving: keep the old snapshot untouched,
                    // fetched_at included, and hand it to everyone waiting.
                    warn!(
                        dataset = %key,
                        error = %err,
                        "refresh failed, serving stale snapshot"
                    );
                    let stale = Arc::clone(&entry.rows);
                    entries.insert(key.to_string(), EntryState::Ready(entry));

                    for tx in waiters {
                        let _ = tx.send(Ok(Arc::clone(&stale)));
                    }
                    Ok(stale)
                }
                None => {
                    warn!(
                        dataset = %key,
                        error = %err,
                        "initial fetch failed with no snapshot to fall back on"
                    );
                    for tx in waiters {
                        let _ = tx.send(Err(err.clone()));
                    }
                    Err(CacheError::ColdStart {
                        key: key.to_string(),
                        source: err,
                    })
                }
            },
        }
    }
}

impl std::fmt::Debug for RemoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCache")
            .field("policy", &self.policy)
            .field("default_ttl", &self.default_ttl)
            .field("ttl_overrides", &self.ttl_overrides)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Row source that pops scripted results and counts remote calls.
    struct ScriptedSource {
        calls: AtomicU32,
        results: StdMutex<VecDeque<Result<Vec<Row>, FetchError>>>,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<Vec<Row>, FetchError>>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                results: StdMutex::new(results.into_iter().collect()),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RowSource for ScriptedSource {
        fn fetch(&self, _key: &str) -> BoxFuture<'_, Result<Vec<Row>, FetchError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.results
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Ok(vec![vec!["default".to_string()]]))
            })
        }
    }

    fn rows(cells: &[&str]) -> Vec<Row> {
        cells
            .iter()
            .map(|c| vec![(*c).to_string()])
            .collect()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_cold_get_fetches_and_caches() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(rows(&["r1"]))]));
        let cache = RemoteCache::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            fast_policy(),
            Duration::from_secs(60),
        );

        let first = cache.get("roster").await.unwrap();
        assert_eq!(first[0][0], "r1");
        assert_eq!(source.calls(), 1);

        // Second get within the TTL serves the cached snapshot.
        let second = cache.get("roster").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_triggers_refetch() {
        // Scenario: fresh at t=0, served from cache mid-TTL, refetched after.
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(rows(&["r1"])),
            Ok(rows(&["r2"])),
        ]));
        let cache = RemoteCache::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            fast_policy(),
            Duration::from_millis(50),
        );

        let first = cache.get("roster").await.unwrap();
        assert_eq!(first[0][0], "r1");

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mid = cache.get("roster").await.unwrap();
        assert_eq!(mid[0][0], "r1");
        assert_eq!(source.calls(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let third = cache.get("roster").await.unwrap();
        assert_eq!(third[0][0], "r2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_gets_single_flight() {
        // Two concurrent cold gets must collapse into one remote fetch and
        // resolve to the same snapshot.
        let source = Arc::new(
            ScriptedSource::new(vec![Ok(rows(&["r1"]))])
                .with_delay(Duration::from_millis(30)),
        );
        let cache = Arc::new(RemoteCache::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            fast_policy(),
            Duration::from_secs(60),
        ));

        let a = Arc::clone(&cache);
        let b = Arc::clone(&cache);
        let (ra, rb) = tokio::join!(a.get("roster"), b.get("roster"));

        let ra = ra.unwrap();
        let rb = rb.unwrap();
        assert!(Arc::ptr_eq(&ra, &rb));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_now_joins_in_flight_refresh() {
        let source = Arc::new(
            ScriptedSource::new(vec![Ok(rows(&["r1"]))])
                .with_delay(Duration::from_millis(30)),
        );
        let cache = Arc::new(RemoteCache::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            fast_policy(),
            Duration::from_secs(60),
        ));

        let a = Arc::clone(&cache);
        let b = Arc::clone(&cache);
        let (ra, rb) = tokio::join!(a.get("roster"), b.refresh_now("roster"));

        assert!(Arc::ptr_eq(&ra.unwrap(), &rb.unwrap()));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale() {
        // Exhausting retries must not clear the snapshot or bubble an error.
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(rows(&["r1"])),
            Err(FetchError::Timeout),
            Err(FetchError::Timeout),
        ]));
        let cache = RemoteCache::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            fast_policy(),
            Duration::from_millis(10),
        );

        let first = cache.get("roster").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stale = cache.get("roster").await.unwrap();
        assert!(Arc::ptr_eq(&first, &stale));
        // Both retry attempts were burned on the failed refresh.
        assert_eq!(source.calls(), 3);

        // fetched_at was not updated, so the next get tries again.
        let recovered = cache.get("roster").await.unwrap();
        assert_eq!(recovered[0][0], "default");
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test]
    async fn test_cold_start_failure_propagates() {
        let source = Arc::new(ScriptedSource::new(vec![Err(FetchError::Auth(
            "bad token".to_string(),
        ))]));
        let cache = RemoteCache::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            fast_policy(),
            Duration::from_secs(60),
        );

        let err = cache.get("roster").await.unwrap_err();
        match err {
            CacheError::ColdStart { key, source } => {
                assert_eq!(key, "roster");
                assert!(matches!(source, RetryError::Fatal(FetchError::Auth(_))));
            }
            other => panic!("expected ColdStart, got {other:?}"),
        }
        // Fatal errors are not retried.
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cold_start_failure_shared() {
        let source = Arc::new(
            ScriptedSource::new(vec![Err(FetchError::Auth("bad token".to_string()))])
                .with_delay(Duration::from_millis(30)),
        );
        let cache = Arc::new(RemoteCache::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            fast_policy(),
            Duration::from_secs(60),
        ));

        let a = Arc::clone(&cache);
        let b = Arc::clone(&cache);
        let (ra, rb) = tokio::join!(a.get("roster"), b.get("roster"));

        assert!(ra.is_err());
        assert!(rb.is_err());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(rows(&["r1"])),
            Ok(rows(&["r2"])),
        ]));
        let cache = RemoteCache::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            fast_policy(),
            Duration::from_secs(60),
        );

        let first = cache.get("roster").await.unwrap();
        assert_eq!(first[0][0], "r1");

        cache.invalidate("roster").await;

        let second = cache.get("roster").await.unwrap();
        assert_eq!(second[0][0], "r2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_now_bypasses_ttl() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(rows(&["r1"])),
            Ok(rows(&["r2"])),
        ]));
        let cache = RemoteCache::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            fast_policy(),
            Duration::from_secs(60),
        );

        let first = cache.get("roster").await.unwrap();
        assert_eq!(first[0][0], "r1");

        let second = cache.refresh_now("roster").await.unwrap();
        assert_eq!(second[0][0], "r2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_per_dataset_ttl_override() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(rows(&["t1"])),
            Ok(rows(&["t2"])),
        ]));
        let cache = RemoteCache::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            fast_policy(),
            Duration::from_secs(60),
        )
        .with_ttl("templates", Duration::from_millis(10));

        let first = cache.get("templates").await.unwrap();
        assert_eq!(first[0][0], "t1");

        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = cache.get("templates").await.unwrap();
        assert_eq!(second[0][0], "t2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_datasets_are_independent() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(rows(&["roster"])),
            Ok(rows(&["templates"])),
        ]));
        let cache = RemoteCache::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            fast_policy(),
            Duration::from_secs(60),
        );

        let a = cache.get("roster").await.unwrap();
        let b = cache.get("templates").await.unwrap();
        assert_eq!(a[0][0], "roster");
        assert_eq!(b[0][0], "templates");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_cold_start_retries_then_succeeds() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err(FetchError::Upstream(503)),
            Ok(rows(&["r1"])),
        ]));
        let cache = RemoteCache::new(
            Arc::clone(&source) as Arc<dyn RowSource>,
            fast_policy(),
            Duration::from_secs(60),
        );

        let result = cache.get("roster").await.unwrap();
        assert_eq!(result[0][0], "r1");
        assert_eq!(source.calls(), 2);
    }
}
