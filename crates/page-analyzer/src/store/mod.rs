//! Result storage across the durable and session tiers.
//!
//! [`ResultStore`] is the only writer of scan results. Every write is
//! best-effort: a missing or failing tier is logged as
//! [`AnalyzerError::StorageUnavailable`] and otherwise ignored, and every read
//! degrades to "nothing stored".
//!
//! ## Keys
//!
//! | tier    | key                  | value                          |
//! |---------|----------------------|--------------------------------|
//! | durable | `archive:<ts>`       | one-shot [`ScanRecord`]        |
//! | durable | `run:<ts>`           | finalized [`RuntimeRun`]       |
//! | durable | `last_run`           | key of the most recent run     |
//! | session | `last_result`        | latest [`ScanRecord`]          |
//! | session | `last_by_surface`    | surface id → latest record     |

pub mod memory;
pub mod sqlite;

pub use memory::MemoryTier;
pub use sqlite::SqliteTier;

use crate::error::AnalyzerError;
use crate::types::{DurableEntry, RuntimeRun, ScanRecord, StoredRun, SurfaceId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const ARCHIVE_PREFIX: &str = "archive:";
pub const RUN_PREFIX: &str = "run:";
pub const LAST_RUN_KEY: &str = "last_run";
pub const LAST_RESULT_KEY: &str = "last_result";
pub const LAST_BY_SURFACE_KEY: &str = "last_by_surface";

/// Failures of an individual storage tier.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{0} tier is not configured")]
    Missing(&'static str),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for AnalyzerError {
    fn from(e: StoreError) -> Self {
        AnalyzerError::StorageUnavailable(e.to_string())
    }
}

/// Storage that survives process restarts.
#[async_trait]
pub trait DurableTier: Send + Sync {
    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    /// All entries whose key starts with `prefix`, in any order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError>;
}

/// Storage scoped to the current process.
#[async_trait]
pub trait SessionTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Numeric suffix of `key` after `prefix`, if the key has that shape.
pub fn key_suffix(key: &str, prefix: &str) -> Option<i64> {
    let suffix = key.strip_prefix(prefix)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

pub fn archive_key(timestamp: i64) -> String {
    format!("{ARCHIVE_PREFIX}{timestamp}")
}

pub fn run_key(timestamp: i64) -> String {
    format!("{RUN_PREFIX}{timestamp}")
}

/// Adapter over the storage tiers.
pub struct ResultStore {
    durable: Option<Arc<dyn DurableTier>>,
    session: Option<Arc<dyn SessionTier>>,
    /// Serializes read-modify-write of the per-surface map.
    surface_map_lock: tokio::sync::Mutex<()>,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    /// A store with no tiers: writes are dropped, reads return nothing.
    pub fn new() -> Self {
        Self {
            durable: None,
            session: None,
            surface_map_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Both tiers in memory.
    pub fn in_memory() -> Self {
        Self::new()
            .with_durable(Arc::new(MemoryTier::new()))
            .with_session(Arc::new(MemoryTier::new()))
    }

    pub fn with_durable(mut self, tier: Arc<dyn DurableTier>) -> Self {
        self.durable = Some(tier);
        self
    }

    pub fn with_session(mut self, tier: Arc<dyn SessionTier>) -> Self {
        self.session = Some(tier);
        self
    }

    // ── Durable ────────────────────────────────────────────────────────────

    /// Write a record under an explicit durable key.
    pub async fn put_durable(&self, key: &str, record: &ScanRecord) {
        self.write_durable(key, record).await;
    }

    /// Archive a one-shot record under `archive:<timestamp>` and return the key.
    pub async fn put_scan(&self, record: &ScanRecord) -> String {
        let key = archive_key(record.meta.timestamp);
        self.put_durable(&key, record).await;
        key
    }

    /// Persist a finalized run under `run:<stoppedAt>` and point `last_run` at it.
    pub async fn put_run(&self, run: &RuntimeRun) -> String {
        let key = run_key(run.stopped_at);
        if self.write_durable(&key, run).await {
            self.write_durable(LAST_RUN_KEY, &key).await;
        }
        key
    }

    /// Archived one-shot records, most recent first.
    pub async fn list_durable(&self) -> Vec<DurableEntry> {
        self.list_by_suffix::<ScanRecord>(ARCHIVE_PREFIX)
            .await
            .into_iter()
            .map(|(key, record)| DurableEntry { key, record })
            .collect()
    }

    /// A single archived record by key.
    pub async fn get_durable(&self, key: &str) -> Option<ScanRecord> {
        self.read_durable(key).await
    }

    /// Finalized runs, most recent first.
    pub async fn list_runs(&self) -> Vec<StoredRun> {
        self.list_by_suffix::<RuntimeRun>(RUN_PREFIX)
            .await
            .into_iter()
            .map(|(key, run)| StoredRun { key, run })
            .collect()
    }

    /// The most recent run: follows `last_run`, falling back to the run with
    /// the highest key suffix when the pointer is missing or dangling.
    pub async fn last_run(&self) -> Option<StoredRun> {
        if let Some(key) = self.read_durable::<String>(LAST_RUN_KEY).await {
            if let Some(run) = self.read_durable::<RuntimeRun>(&key).await {
                return Some(StoredRun { key, run });
            }
            debug!(key = %key, "last_run pointer is dangling");
        }
        self.list_runs().await.into_iter().next()
    }

    // ── Session ────────────────────────────────────────────────────────────

    pub async fn set_session_global(&self, record: &ScanRecord) {
        self.write_session(LAST_RESULT_KEY, record).await;
    }

    pub async fn get_session_global(&self) -> Option<ScanRecord> {
        self.read_session(LAST_RESULT_KEY).await
    }

    /// Replace the latest record of one surface, keeping the other surfaces' entries.
    pub async fn update_session_per_surface(&self, surface_id: &SurfaceId, record: &ScanRecord) {
        let Some(tier) = &self.session else {
            report("write", "session", StoreError::Missing("session"));
            return;
        };
        let _guard = self.surface_map_lock.lock().await;
        // A failed read must not overwrite the other surfaces with a fresh map.
        let mut map: BTreeMap<SurfaceId, ScanRecord> = match tier.get(LAST_BY_SURFACE_KEY).await {
            Ok(Some(value)) => decode(LAST_BY_SURFACE_KEY, value).unwrap_or_default(),
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                report("read", "session", e);
                return;
            }
        };
        map.insert(surface_id.clone(), record.clone());
        self.write_session(LAST_BY_SURFACE_KEY, &map).await;
    }

    pub async fn get_session_per_surface(&self, surface_id: &SurfaceId) -> Option<ScanRecord> {
        self.session_by_surface().await.remove(surface_id)
    }

    /// The whole surface id → latest record map.
    pub async fn session_by_surface(&self) -> BTreeMap<SurfaceId, ScanRecord> {
        self.read_session(LAST_BY_SURFACE_KEY)
            .await
            .unwrap_or_default()
    }

    // ── Tier plumbing ──────────────────────────────────────────────────────

    async fn write_durable<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let Some(tier) = &self.durable else {
            report("write", "durable", StoreError::Missing("durable"));
            return false;
        };
        let result = match serde_json::to_value(value) {
            Ok(value) => tier.put(key, value).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                report("write", "durable", e);
                false
            }
        }
    }

    async fn read_durable<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let tier = self.durable.as_ref()?;
        match tier.get(key).await {
            Ok(value) => decode(key, value?),
            Err(e) => {
                report("read", "durable", e);
                None
            }
        }
    }

    async fn list_by_suffix<T: DeserializeOwned>(&self, prefix: &str) -> Vec<(String, T)> {
        let Some(tier) = &self.durable else {
            return Vec::new();
        };
        let entries = match tier.scan_prefix(prefix).await {
            Ok(entries) => entries,
            Err(e) => {
                report("list", "durable", e);
                return Vec::new();
            }
        };

        let mut items: Vec<(i64, String, T)> = entries
            .into_iter()
            .filter_map(|(key, value)| {
                let suffix = key_suffix(&key, prefix)?;
                let item = decode(&key, value)?;
                Some((suffix, key, item))
            })
            .collect();
        items.sort_by(|a, b| b.0.cmp(&a.0));
        items.into_iter().map(|(_, key, item)| (key, item)).collect()
    }

    async fn write_session<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let Some(tier) = &self.session else {
            report("write", "session", StoreError::Missing("session"));
            return;
        };
        let result = match serde_json::to_value(value) {
            Ok(value) => tier.set(key, value).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            report("write", "session", e);
        }
    }

    async fn read_session<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let tier = self.session.as_ref()?;
        match tier.get(key).await {
            Ok(value) => decode(key, value?),
            Err(e) => {
                report("read", "session", e);
                None
            }
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(item) => Some(item),
        Err(e) => {
            debug!(key = %key, error = %e, "skipping undecodable entry");
            None
        }
    }
}

fn report(op: &'static str, tier: &'static str, err: StoreError) {
    let missing = matches!(err, StoreError::Missing(_));
    let err = AnalyzerError::from(err);
    if missing {
        debug!(tier, op, code = err.code(), "{err}");
    } else {
        warn!(tier, op, code = err.code(), "{err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;
    use crate::types::ScanMeta;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn record(ts: i64, surface: &str, html: &str) -> ScanRecord {
        ScanRecord {
            meta: ScanMeta {
                timestamp: ts,
                surface_id: Some(SurfaceId::new(surface)),
                url: Some(format!("https://example.com/{surface}")),
                title: None,
                reported_at: None,
            },
            summary: extract(html),
        }
    }

    fn run(started_at: i64, stopped_at: i64) -> RuntimeRun {
        RuntimeRun {
            started_at,
            stopped_at,
            total_scans: 0,
            pages_count: 0,
            dataset: BTreeMap::new(),
        }
    }

    /// A tier whose every operation fails.
    struct BrokenTier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DurableTier for BrokenTier {
        async fn put(&self, _key: &str, _value: Value) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Poisoned)
        }
        async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Poisoned)
        }
        async fn scan_prefix(&self, _prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Poisoned)
        }
    }

    #[async_trait]
    impl SessionTier for BrokenTier {
        async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            Err(StoreError::Poisoned)
        }
        async fn set(&self, _key: &str, _value: Value) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    /// Session tier whose next read fails once.
    struct FlakySession {
        inner: MemoryTier,
        fail_next_get: AtomicBool,
    }

    #[async_trait]
    impl SessionTier for FlakySession {
        async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            if self.fail_next_get.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Poisoned);
            }
            SessionTier::get(&self.inner, key).await
        }
        async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
            SessionTier::set(&self.inner, key, value).await
        }
    }

    #[test]
    fn test_key_suffix() {
        assert_eq!(key_suffix("run:1700000000000", RUN_PREFIX), Some(1_700_000_000_000));
        assert_eq!(key_suffix("run:latest", RUN_PREFIX), None);
        assert_eq!(key_suffix("run:", RUN_PREFIX), None);
        assert_eq!(key_suffix("run:-5", RUN_PREFIX), None);
        assert_eq!(key_suffix("archive:12", RUN_PREFIX), None);
    }

    #[tokio::test]
    async fn test_durable_listing_and_round_trip() {
        let store = ResultStore::in_memory();
        let first = record(100, "1", "<title>one</title>");
        let second = record(200, "2", "<title>two</title><h1>x</h1>");

        let k1 = store.put_scan(&first).await;
        let k2 = store.put_scan(&second).await;
        assert_eq!(k1, "archive:100");

        let listed = store.list_durable().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, k2);
        assert_eq!(listed[1].key, k1);

        assert_eq!(store.get_durable(&k1).await, Some(first));
        assert_eq!(store.get_durable(&k2).await, Some(second));
        assert_eq!(store.get_durable("archive:999").await, None);
    }

    #[tokio::test]
    async fn test_runs_most_recent_first_and_pointer() {
        let store = ResultStore::in_memory();
        store.put_run(&run(1, 10)).await;
        store.put_run(&run(11, 9)).await;
        store.put_run(&run(20, 30)).await;

        let runs = store.list_runs().await;
        let keys: Vec<_> = runs.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["run:30", "run:10", "run:9"]);

        // The pointer tracks the last run written, not the highest key.
        let last = store.last_run().await.unwrap();
        assert_eq!(last.key, "run:30");
        assert_eq!(last.run.started_at, 20);
    }

    #[tokio::test]
    async fn test_last_run_falls_back_without_pointer() {
        let durable = Arc::new(MemoryTier::new());
        let store = ResultStore::new().with_durable(durable.clone());
        DurableTier::put(durable.as_ref(), "run:5", serde_json::to_value(run(1, 5)).unwrap())
            .await
            .unwrap();
        DurableTier::put(durable.as_ref(), "run:7", serde_json::to_value(run(2, 7)).unwrap())
            .await
            .unwrap();
        DurableTier::put(durable.as_ref(), "run:junk", Value::Null)
            .await
            .unwrap();

        let last = store.last_run().await.unwrap();
        assert_eq!(last.key, "run:7");
        assert_eq!(store.list_runs().await.len(), 2);
    }

    #[tokio::test]
    async fn test_per_surface_map_keeps_other_surfaces() {
        let store = ResultStore::in_memory();
        let a = record(1, "a", "<p>a</p>");
        let b = record(2, "b", "<p>b</p>");
        let a2 = record(3, "a", "<p>a2</p>");

        store.update_session_per_surface(&SurfaceId::new("a"), &a).await;
        store.update_session_per_surface(&SurfaceId::new("b"), &b).await;
        store.update_session_per_surface(&SurfaceId::new("a"), &a2).await;

        let map = store.session_by_surface().await;
        assert_eq!(map.len(), 2);
        assert_eq!(store.get_session_per_surface(&SurfaceId::new("a")).await, Some(a2));
        assert_eq!(store.get_session_per_surface(&SurfaceId::new("b")).await, Some(b));
        assert_eq!(store.get_session_per_surface(&SurfaceId::new("c")).await, None);
    }

    #[tokio::test]
    async fn test_session_global_holds_latest() {
        let store = ResultStore::in_memory();
        assert_eq!(store.get_session_global().await, None);
        store.set_session_global(&record(1, "a", "<p>1</p>")).await;
        let latest = record(2, "b", "<p>2</p>");
        store.set_session_global(&latest).await;
        assert_eq!(store.get_session_global().await, Some(latest));
    }

    #[tokio::test]
    async fn test_per_surface_update_skipped_when_read_fails() {
        let session = Arc::new(FlakySession {
            inner: MemoryTier::new(),
            fail_next_get: AtomicBool::new(false),
        });
        let store = ResultStore::new().with_session(session.clone());
        let a = record(1, "a", "<p>a</p>");
        store.update_session_per_surface(&SurfaceId::new("a"), &a).await;

        session.fail_next_get.store(true, Ordering::SeqCst);
        let b = record(2, "b", "<p>b</p>");
        store.update_session_per_surface(&SurfaceId::new("b"), &b).await;

        let map = store.session_by_surface().await;
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&SurfaceId::new("a")), Some(&a));
    }

    #[tokio::test]
    async fn test_missing_tiers_degrade_to_absence() {
        let store = ResultStore::new();
        let r = record(1, "a", "<p>x</p>");
        assert_eq!(store.put_scan(&r).await, "archive:1");
        store.set_session_global(&r).await;
        store.update_session_per_surface(&SurfaceId::new("a"), &r).await;

        assert!(store.list_durable().await.is_empty());
        assert!(store.list_runs().await.is_empty());
        assert!(store.last_run().await.is_none());
        assert!(store.get_session_global().await.is_none());
        assert!(store.session_by_surface().await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_tiers_are_swallowed() {
        let broken = Arc::new(BrokenTier {
            calls: AtomicUsize::new(0),
        });
        let store = ResultStore::new()
            .with_durable(broken.clone())
            .with_session(broken.clone());
        let r = record(1, "a", "<p>x</p>");

        store.put_scan(&r).await;
        store.put_run(&run(1, 2)).await;
        store.set_session_global(&r).await;
        store.update_session_per_surface(&SurfaceId::new("a"), &r).await;

        assert!(store.list_durable().await.is_empty());
        assert!(store.get_durable("archive:1").await.is_none());
        assert!(store.get_session_global().await.is_none());
        // put_run skips the pointer write once the run write failed.
        assert_eq!(broken.calls.load(Ordering::SeqCst), 4);
    }
}
