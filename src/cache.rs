//! # Cache Layer Module
//!
//! ## Purpose
//! Generic key-value caching with per-entry TTL, prefix namespacing and
//! glob-style bulk invalidation, degrading to a no-op whenever the backend
//! misbehaves so cache outages never take down content serving.
//!
//! ## Input/Output Specification
//! - **Input**: JSON-serializable values, logical keys, TTLs, glob patterns
//! - **Output**: Cached reads (`None` on miss or outage), write/delete outcomes,
//!   atomic counter values
//! - **Backends**: sled tree (persistent, lazy expiry) and in-memory dashmap
//!
//! ## Availability Contract
//! Every operation swallows backend errors: `get` becomes a miss, `set` and
//! `delete` become no-ops, `increment` returns 0. Failures are logged at warn
//! with the `cache` category and never propagate to callers. This is a
//! deliberate availability-over-consistency choice.

use crate::errors::{Result, ServiceError};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A stored cache entry: serialized JSON plus an absolute expiry instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRecord {
    value: String,
    expires_at: i64,
}

impl CacheRecord {
    fn expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Minimal contract a key-value backend must expose: string keys and values
/// with TTL, pattern deletion, and atomic increment. Anything matching this
/// contract suffices; it does not have to be a networked store.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Result<i64>;
    /// Delete every key matching a glob pattern; returns the count deleted
    async fn delete_matching(&self, pattern: &str) -> Result<usize>;
}

/// Glob matcher supporting `*` wildcards (the only metacharacter the key
/// taxonomy needs). Iterative two-pointer scan with backtracking.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    let (mut pi, mut ki) = (0usize, 0usize);
    let (mut star, mut mark) = (None::<usize>, 0usize);

    while ki < k.len() {
        if pi < p.len() && (p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ki;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ki = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Persistent cache backend over a sled tree.
///
/// Entries are bincode-encoded [`CacheRecord`]s. Expiry is lazy: an expired
/// entry is treated as a miss and removed on the read that finds it.
pub struct SledBackend {
    tree: sled::Tree,
}

impl SledBackend {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    fn unavailable(e: sled::Error) -> ServiceError {
        ServiceError::CacheUnavailable {
            details: e.to_string(),
        }
    }

    fn decode(bytes: &[u8]) -> Result<CacheRecord> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn encode(record: &CacheRecord) -> Result<Vec<u8>> {
        Ok(bincode::serialize(record)?)
    }
}

#[async_trait]
impl CacheBackend for SledBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(bytes) = self.tree.get(key.as_bytes()).map_err(Self::unavailable)? else {
            return Ok(None);
        };
        let record = Self::decode(&bytes)?;
        if record.expired(Utc::now().timestamp()) {
            self.tree.remove(key.as_bytes()).map_err(Self::unavailable)?;
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let record = CacheRecord {
            value,
            expires_at: Utc::now().timestamp() + ttl.as_secs() as i64,
        };
        self.tree
            .insert(key.as_bytes(), Self::encode(&record)?)
            .map_err(Self::unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.tree.remove(key.as_bytes()).map_err(Self::unavailable)?.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Result<i64> {
        let now = Utc::now().timestamp();
        let fresh_expiry = now + ttl.as_secs() as i64;
        let updated = self.tree.update_and_fetch(key.as_bytes(), |old| {
            let (current, expires_at) = match old.and_then(|b| bincode::deserialize::<CacheRecord>(b).ok()) {
                Some(record) if !record.expired(now) => {
                    (record.value.parse::<i64>().unwrap_or(0), record.expires_at)
                }
                _ => (0, fresh_expiry),
            };
            let record = CacheRecord {
                value: (current + amount).to_string(),
                expires_at,
            };
            bincode::serialize(&record).ok()
        })
        .map_err(Self::unavailable)?;

        let Some(bytes) = updated else {
            return Err(ServiceError::Internal {
                message: "counter update produced no value".to_string(),
            });
        };
        Ok(Self::decode(&bytes)?.value.parse::<i64>().unwrap_or(0))
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        // Everything before the first wildcard narrows the scan
        let prefix: String = pattern.chars().take_while(|c| *c != '*').collect();
        let mut doomed = Vec::new();
        for entry in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry.map_err(Self::unavailable)?;
            if let Ok(key_str) = std::str::from_utf8(&key) {
                if glob_match(pattern, key_str) {
                    doomed.push(key.to_vec());
                }
            }
        }
        let mut deleted = 0;
        for key in doomed {
            if self.tree.remove(&key).map_err(Self::unavailable)?.is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// In-memory cache backend used by tests and cacheless deployments.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, CacheRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now().timestamp();
        if let Some(record) = self.entries.get(key) {
            if !record.expired(now) {
                return Ok(Some(record.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, record| record.expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheRecord {
                value,
                expires_at: Utc::now().timestamp() + ttl.as_secs() as i64,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Result<i64> {
        let now = Utc::now().timestamp();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| CacheRecord {
            value: "0".to_string(),
            expires_at: now + ttl.as_secs() as i64,
        });
        if entry.expired(now) {
            entry.value = "0".to_string();
            entry.expires_at = now + ttl.as_secs() as i64;
        }
        let next = entry.value.parse::<i64>().unwrap_or(0) + amount;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|e| glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        let mut deleted = 0;
        for key in doomed {
            if self.entries.remove(&key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Prefix-namespaced cache facade with swallow-errors semantics.
///
/// Values are serialized as JSON. Identifiers that are not native JSON types
/// (UUIDs) serialize to strings on write and are not reconstructed on read;
/// callers must treat cached reads as plain JSON data.
///
/// Constructed once at startup and passed explicitly to every component; no
/// ambient global cache handle exists.
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    prefix: String,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    /// Get a cached value; `None` on miss, decode failure or backend outage
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(&self.namespaced(key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(category = "cache", key, "Cache get degraded to miss: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(category = "cache", key, "Discarding undecodable cache entry: {}", e);
                let _ = self.backend.delete(&self.namespaced(key)).await;
                None
            }
        }
    }

    /// Store a value with a TTL; returns false on failure instead of raising
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(category = "cache", key, "Cache set skipped, unserializable: {}", e);
                return false;
            }
        };
        match self.backend.set(&self.namespaced(key), serialized, ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(category = "cache", key, "Cache set degraded to no-op: {}", e);
                false
            }
        }
    }

    /// Delete a key; returns whether it existed
    pub async fn delete(&self, key: &str) -> bool {
        match self.backend.delete(&self.namespaced(key)).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(category = "cache", key, "Cache delete degraded to no-op: {}", e);
                false
            }
        }
    }

    /// Check whether a key exists and is unexpired
    pub async fn exists(&self, key: &str) -> bool {
        match self.backend.exists(&self.namespaced(key)).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(category = "cache", key, "Cache exists degraded to false: {}", e);
                false
            }
        }
    }

    /// Atomically increment a counter; returns 0 on backend outage
    pub async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> i64 {
        match self.backend.increment(&self.namespaced(key), amount, ttl).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(category = "cache", key, "Cache increment degraded to 0: {}", e);
                0
            }
        }
    }

    /// Delete all keys matching a glob pattern; returns the count deleted
    pub async fn clear_pattern(&self, pattern: &str) -> usize {
        match self.backend.delete_matching(&self.namespaced(pattern)).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(category = "cache", pattern, "Cache clear degraded to no-op: {}", e);
                0
            }
        }
    }

    /// Set/get/delete probe used by the health endpoint
    pub async fn health_check(&self) -> bool {
        let key = "health_check";
        if !self.set(key, &"ok", Duration::from_secs(10)).await {
            return false;
        }
        let roundtrip: Option<String> = self.get(key).await;
        self.delete(key).await;
        roundtrip.as_deref() == Some("ok")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_manager() -> CacheManager {
        CacheManager::new(Arc::new(MemoryBackend::new()), "constitution")
    }

    fn sled_manager() -> (CacheManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let tree = db.open_tree("cache_entries").unwrap();
        (
            CacheManager::new(Arc::new(SledBackend::new(tree)), "constitution"),
            dir,
        )
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("constitution:search:*", "constitution:search:abc123"));
        assert!(glob_match("constitution:user:42:*", "constitution:user:42:progress"));
        assert!(!glob_match("constitution:user:42:*", "constitution:user:424:progress"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*b*c", "a-x-b-y-c"));
        assert!(!glob_match("a*b*c", "a-x-b-y"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = memory_manager();
        assert!(cache.set("chapter:1", &vec![1u32, 2, 3], Duration::from_secs(60)).await);
        let value: Option<Vec<u32>> = cache.get("chapter:1").await;
        assert_eq!(value, Some(vec![1, 2, 3]));
        let miss: Option<Vec<u32>> = cache.get("chapter:2").await;
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = memory_manager();
        cache.set("overview", &"stale", Duration::from_secs(0)).await;
        let value: Option<String> = cache.get("overview").await;
        assert_eq!(value, None);
        assert!(!cache.exists("overview").await);
    }

    #[tokio::test]
    async fn test_increment_is_cumulative() {
        let cache = memory_manager();
        let ttl = Duration::from_secs(60);
        assert_eq!(cache.increment("views:chapter:1", 1, ttl).await, 1);
        assert_eq!(cache.increment("views:chapter:1", 1, ttl).await, 2);
        assert_eq!(cache.increment("views:chapter:1", 5, ttl).await, 7);
    }

    #[tokio::test]
    async fn test_clear_pattern_scopes_to_namespace() {
        let cache = memory_manager();
        let ttl = Duration::from_secs(60);
        cache.set("search:aaa", &1, ttl).await;
        cache.set("search:bbb", &2, ttl).await;
        cache.set("chapter:1", &3, ttl).await;
        assert_eq!(cache.clear_pattern("search:*").await, 2);
        let kept: Option<i32> = cache.get("chapter:1").await;
        assert_eq!(kept, Some(3));
    }

    #[tokio::test]
    async fn test_sled_backend_roundtrip_and_pattern_clear() {
        let (cache, _dir) = sled_manager();
        let ttl = Duration::from_secs(60);
        cache.set("user:42:bookmarks", &vec!["2.9"], ttl).await;
        cache.set("user:42:progress", &"p", ttl).await;
        cache.set("user:7:progress", &"q", ttl).await;

        let value: Option<Vec<String>> = cache.get("user:42:bookmarks").await;
        assert_eq!(value, Some(vec!["2.9".to_string()]));

        assert_eq!(cache.clear_pattern("user:42:*").await, 2);
        let other: Option<String> = cache.get("user:7:progress").await;
        assert_eq!(other, Some("q".to_string()));
    }

    #[tokio::test]
    async fn test_sled_increment_survives_reread() {
        let (cache, _dir) = sled_manager();
        let ttl = Duration::from_secs(60);
        cache.increment("views:article:2.9", 1, ttl).await;
        cache.increment("views:article:2.9", 1, ttl).await;
        assert_eq!(cache.increment("views:article:2.9", 1, ttl).await, 3);
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let cache = memory_manager();
        cache.set("overview", &"doc", Duration::from_secs(60)).await;
        assert!(cache.delete("overview").await);
        assert!(!cache.delete("overview").await);
    }

    #[tokio::test]
    async fn test_health_check() {
        let cache = memory_manager();
        assert!(cache.health_check().await);
    }

    #[tokio::test]
    async fn test_undecodable_entry_discarded() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set("constitution:chapter:1", "not json {{".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        let cache = CacheManager::new(backend, "constitution");
        let value: Option<Vec<u32>> = cache.get("chapter:1").await;
        assert_eq!(value, None);
        assert!(!cache.exists("chapter:1").await);
    }
}
