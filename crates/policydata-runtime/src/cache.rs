//! Caching layer for policy-runtime.
//!
//! [`CacheStore`] is the key/value seam (text values, per-entry TTL).
//! Two stores are bundled: [`MokaCacheStore`] keeps entries in memory for
//! the life of the process, [`FileCacheStore`] keeps them on disk so they
//! outlive it. [`PolicyCache`] is the gateway the service talks to: it
//! derives keys, encodes records as JSON and degrades failures to misses.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Expiry;
use policydata_core::{cache_key, MemberId, PolicyRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default time-to-live of a reconciled record: 20 minutes.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(1200);

/// Default entry bound of the in-memory store.
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Errors raised by a store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheStoreError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("Cache entry '{key}' is unreadable: {message}")]
    Corrupt { key: String, message: String },
}

/// Errors from the cache gateway.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] CacheStoreError),

    #[error("Cached value under '{key}' is not a valid record: {error}")]
    Decode {
        key: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("Failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A shared key/value store with per-entry expiry.
///
/// An entry written with a TTL is no longer returned once the TTL has
/// elapsed. Writing an existing key replaces its value and restarts its TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheStoreError>;
}

#[derive(Clone)]
struct StoredEntry {
    value: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, StoredEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory store using moka.
#[derive(Clone)]
pub struct MokaCacheStore {
    cache: Cache<String, StoredEntry>,
}

impl MokaCacheStore {
    /// Create a store bounded to `max_entries`.
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();

        Self { cache }
    }

    /// Clear the store.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MokaCacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for MokaCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCacheStore")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait]
impl CacheStore for MokaCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
        Ok(self.cache.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheStoreError> {
        self.cache
            .insert(key.to_string(), StoredEntry { value, ttl })
            .await;
        Ok(())
    }
}

/// Counter that keeps concurrent partial writes from sharing a file name.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// On-disk form of one entry.
#[derive(Serialize, Deserialize)]
struct FileEntry {
    /// Instant at which the entry stops being returned.
    expires_at: DateTime<Utc>,
    value: String,
}

/// Store keeping one JSON file per key under a directory.
///
/// Writes go to a partial file that is then renamed over the entry, so a
/// reader sees either the old or the new value. Expired files are left in
/// place and replaced by the next write of the same key.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }
}

/// Escape everything outside `[A-Za-z0-9_-]` as `%XX`. Injective, and the
/// result never contains a path separator.
fn file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "%{byte:02X}");
        }
    }
    stem
}

fn unavailable(path: &Path, error: io::Error) -> CacheStoreError {
    CacheStoreError::Unavailable(format!("{}: {error}", path.display()))
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(&path, e)),
        };

        let entry: FileEntry =
            serde_json::from_slice(&bytes).map_err(|e| CacheStoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        if entry.expires_at <= Utc::now() {
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheStoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| unavailable(&self.dir, e))?;

        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let entry = FileEntry { expires_at, value };
        let bytes = serde_json::to_vec(&entry).map_err(|e| CacheStoreError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let path = self.entry_path(key);
        let partial = path.with_extension(format!(
            "json.{}-{}.partial",
            std::process::id(),
            WRITE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| unavailable(&partial, e))?;

        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(unavailable(&path, e));
        }
        Ok(())
    }
}

/// Read-through/write-behind gateway for reconciled records.
#[derive(Clone)]
pub struct PolicyCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl PolicyCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Key for a member and strategy.
    pub fn key(&self, member_id: MemberId, strategy: &str) -> String {
        cache_key(member_id, strategy)
    }

    /// Look up a record, surfacing store and decode errors.
    pub async fn try_read(
        &self,
        member_id: MemberId,
        strategy: &str,
    ) -> Result<Option<PolicyRecord>, CacheError> {
        let key = self.key(member_id, strategy);
        let Some(text) = self.store.get(&key).await? else {
            return Ok(None);
        };

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|error| CacheError::Decode { key, error })
    }

    /// Look up a record. Any failure is reported as a miss.
    pub async fn read(&self, member_id: MemberId, strategy: &str) -> Option<PolicyRecord> {
        match self.try_read(member_id, strategy).await {
            Ok(Some(record)) => {
                tracing::debug!(member_id = %member_id, strategy, "Cache hit");
                Some(record)
            }
            Ok(None) => {
                tracing::debug!(member_id = %member_id, strategy, "Cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(member_id = %member_id, strategy, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a record under the gateway TTL, surfacing errors.
    pub async fn try_write(
        &self,
        member_id: MemberId,
        strategy: &str,
        record: &PolicyRecord,
    ) -> Result<(), CacheError> {
        self.try_write_with_ttl(member_id, strategy, record, self.ttl)
            .await
    }

    /// Store a record under an explicit TTL.
    pub async fn try_write_with_ttl(
        &self,
        member_id: MemberId,
        strategy: &str,
        record: &PolicyRecord,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let text = serde_json::to_string(record).map_err(CacheError::Encode)?;
        self.store
            .set(&self.key(member_id, strategy), text, ttl)
            .await?;
        Ok(())
    }

    /// Store a record. A failure is logged and otherwise ignored.
    pub async fn write(&self, member_id: MemberId, strategy: &str, record: &PolicyRecord) {
        if let Err(e) = self.try_write(member_id, strategy, record).await {
            tracing::warn!(member_id = %member_id, strategy, error = %e, "Cache write failed");
        }
    }
}

impl std::fmt::Debug for PolicyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheStoreError> {
            Err(CacheStoreError::Unavailable("connection reset".to_string()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheStoreError> {
            Err(CacheStoreError::Unavailable("connection reset".to_string()))
        }
    }

    fn member(id: u64) -> MemberId {
        MemberId::new(id).unwrap()
    }

    fn record() -> PolicyRecord {
        PolicyRecord::new(1166.6666666666667, 7000.0, 6000.0).unwrap()
    }

    #[tokio::test]
    async fn test_store_operations() {
        let store = MokaCacheStore::default();

        assert_eq!(store.get("missing").await.unwrap(), None);

        store
            .set("k", "v1".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v1"));

        store
            .set("k", "v2".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        store.invalidate_all();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_entry_expires() {
        let store = MokaCacheStore::default();
        store
            .set("short", "v".to_string(), Duration::from_millis(100))
            .await
            .unwrap();
        store
            .set("long", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overwrite_restarts_ttl() {
        let store = MokaCacheStore::default();
        let ttl = Duration::from_millis(1000);

        store.set("k", "v1".to_string(), ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        store.set("k", "v2".to_string(), ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_file_store_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("cache"));

        assert_eq!(store.get("missing").await.unwrap(), None);

        store
            .set("k", "v1".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        store
            .set("k", "v2".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        // Only the entry remains; no partial files are left behind.
        let names: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("k.json")]);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileCacheStore::new(dir.path())
            .set("policydata_member25_max_strategy", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let reopened = FileCacheStore::new(dir.path());
        assert_eq!(
            reopened
                .get("policydata_member25_max_strategy")
                .await
                .unwrap()
                .as_deref(),
            Some("v")
        );
    }

    #[tokio::test]
    async fn test_file_store_entry_expires() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        store
            .set("short", "v".to_string(), Duration::from_millis(100))
            .await
            .unwrap();
        store
            .set("long", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(store.get("long").await.unwrap().is_some());

        // Rewriting restarts the TTL.
        store
            .set("short", "v2".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("short").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_file_store_keys_stay_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("cache"));

        store
            .set("../escape/key", "a".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        store
            .set("..%2Fescape%2Fkey", "b".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!dir.path().join("escape").exists());
        assert_eq!(store.get("../escape/key").await.unwrap().as_deref(), Some("a"));
        assert_eq!(
            store.get("..%2Fescape%2Fkey").await.unwrap().as_deref(),
            Some("b")
        );
    }

    #[tokio::test]
    async fn test_file_store_corrupt_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        std::fs::write(dir.path().join("k.json"), "{truncated").unwrap();

        assert!(matches!(
            store.get("k").await,
            Err(CacheStoreError::Corrupt { .. })
        ));

        let cache = PolicyCache::new(Arc::new(store), DEFAULT_CACHE_TTL);
        let key_path = dir.path().join(format!("{}.json", cache.key(member(3), "average_strategy")));
        std::fs::write(key_path, "[]").unwrap();
        assert_eq!(cache.read(member(3), "average_strategy").await, None);
    }

    #[test]
    fn test_file_stem_escapes() {
        assert_eq!(file_stem("policydata_member25_max-x"), "policydata_member25_max-x");
        assert_eq!(file_stem("a/b"), "a%2Fb");
        assert_eq!(file_stem("a%b"), "a%25b");
        assert_eq!(file_stem("."), "%2E");
    }

    #[tokio::test]
    async fn test_gateway_round_trip_is_exact() {
        let cache = PolicyCache::new(Arc::new(MokaCacheStore::default()), DEFAULT_CACHE_TTL);

        assert_eq!(cache.read(member(25), "average_strategy").await, None);
        cache.write(member(25), "average_strategy", &record()).await;

        assert_eq!(cache.read(member(25), "average_strategy").await, Some(record()));
        assert_eq!(cache.read(member(25), "max_strategy").await, None);
        assert_eq!(cache.read(member(2), "average_strategy").await, None);
    }

    #[tokio::test]
    async fn test_gateway_uses_standard_key() {
        let store = Arc::new(MokaCacheStore::default());
        let cache = PolicyCache::new(store.clone(), DEFAULT_CACHE_TTL);
        cache.write(member(25), "max_strategy", &record()).await;

        let text = store
            .get("policydata_member25_max_strategy")
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, record().to_json());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let store = Arc::new(MokaCacheStore::default());
        let cache = PolicyCache::new(store.clone(), DEFAULT_CACHE_TTL);
        let key = cache.key(member(7), "average_strategy");

        for corrupt in ["not json", r#"{"deductible": 1}"#, r#"{"deductible":1,"stop_loss":2,"oop_max":-3}"#] {
            store
                .set(&key, corrupt.to_string(), DEFAULT_CACHE_TTL)
                .await
                .unwrap();
            assert!(matches!(
                cache.try_read(member(7), "average_strategy").await,
                Err(CacheError::Decode { .. })
            ));
            assert_eq!(cache.read(member(7), "average_strategy").await, None);
        }
    }

    #[tokio::test]
    async fn test_store_failures_degrade() {
        let cache = PolicyCache::new(Arc::new(FailingStore), DEFAULT_CACHE_TTL);

        assert!(matches!(
            cache.try_read(member(1), "average_strategy").await,
            Err(CacheError::Store(_))
        ));
        assert_eq!(cache.read(member(1), "average_strategy").await, None);

        assert!(cache.try_write(member(1), "average_strategy", &record()).await.is_err());
        // Must not panic or propagate.
        cache.write(member(1), "average_strategy", &record()).await;
    }
}
