//! # Storage Management Module
//!
//! ## Purpose
//! Persistent storage for the constitution service: one embedded sled
//! database holding the cache-entry tree (handed to the cache backend) and
//! the durable view-aggregate tree used for popularity ranking.
//!
//! ## Input/Output Specification
//! - **Input**: Cache records, view events keyed by (content_type, reference, user)
//! - **Output**: Upserted aggregate rows, timeframe-windowed aggregations
//! - **Storage**: sled embedded database, bincode-encoded records
//!
//! ## Concurrency
//! Upserts go through `update_and_fetch`, so the check-then-write race on an
//! existing row resolves inside the store. A lost update under extreme
//! concurrency is accepted imprecision in analytics counts, not a
//! correctness requirement for the rest of the system.

use crate::errors::{Result, ServiceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

const CACHE_TREE: &str = "cache_entries";
const VIEWS_TREE: &str = "content_views";

/// Durable view aggregate row. One row per (content_type, reference, user).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewRecord {
    /// Stable row identity, assigned on first insert
    pub id: Uuid,
    pub content_type: String,
    pub content_reference: String,
    /// `None` for anonymous views
    pub user_id: Option<String>,
    pub view_count: u64,
    pub first_viewed_at: DateTime<Utc>,
    pub last_viewed_at: DateTime<Utc>,
    pub device_type: Option<String>,
    pub ip_address: Option<String>,
}

/// An aggregated popularity entry over a timeframe window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularItem {
    pub content_type: String,
    pub content_reference: String,
    pub total_views: u64,
    pub unique_viewers: u64,
    pub last_viewed: Option<DateTime<Utc>>,
    /// Editorial title; filled for curated fallback entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Owner of the embedded database and its trees
pub struct Storage {
    db: sled::Db,
    cache_tree: sled::Tree,
    views_tree: sled::Tree,
}

impl Storage {
    /// Open (or create) the database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = sled::open(path)?;
        let cache_tree = db.open_tree(CACHE_TREE)?;
        let views_tree = db.open_tree(VIEWS_TREE)?;
        tracing::info!("Storage opened at {:?}", path);
        Ok(Self {
            db,
            cache_tree,
            views_tree,
        })
    }

    /// Tree backing the key-value cache
    pub fn cache_tree(&self) -> sled::Tree {
        self.cache_tree.clone()
    }

    /// Durable view-aggregate store
    pub fn view_store(&self) -> ViewStore {
        ViewStore {
            tree: self.views_tree.clone(),
        }
    }

    /// Basic write/read/remove probe
    pub fn health_check(&self) -> Result<()> {
        let key = b"health_check";
        self.views_tree.insert(key, b"ok")?;
        if self.views_tree.get(key)?.is_none() {
            return Err(ServiceError::Internal {
                message: "storage health probe lost its value".to_string(),
            });
        }
        self.views_tree.remove(key)?;
        Ok(())
    }

    /// Flush pending writes (used on shutdown)
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

/// Row store for durable view aggregates
#[derive(Clone)]
pub struct ViewStore {
    tree: sled::Tree,
}

impl ViewStore {
    fn row_key(content_type: &str, reference: &str, user_id: Option<&str>) -> String {
        format!(
            "{}:{}:{}",
            content_type,
            reference,
            user_id.unwrap_or("anonymous")
        )
    }

    /// Increment-or-insert the aggregate row for one view event.
    /// Returns the row's new cumulative count.
    pub fn record_view(
        &self,
        content_type: &str,
        reference: &str,
        user_id: Option<&str>,
        device_type: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<u64> {
        let key = Self::row_key(content_type, reference, user_id);
        let now = Utc::now();

        let updated = self.tree.update_and_fetch(key.as_bytes(), |old| {
            let record = match old.and_then(|b| bincode::deserialize::<ViewRecord>(b).ok()) {
                Some(mut existing) => {
                    existing.view_count += 1;
                    existing.last_viewed_at = now;
                    if device_type.is_some() {
                        existing.device_type = device_type.map(str::to_string);
                    }
                    if ip_address.is_some() {
                        existing.ip_address = ip_address.map(str::to_string);
                    }
                    existing
                }
                None => ViewRecord {
                    id: Uuid::new_v4(),
                    content_type: content_type.to_string(),
                    content_reference: reference.to_string(),
                    user_id: user_id.map(str::to_string),
                    view_count: 1,
                    first_viewed_at: now,
                    last_viewed_at: now,
                    device_type: device_type.map(str::to_string),
                    ip_address: ip_address.map(str::to_string),
                },
            };
            bincode::serialize(&record).ok()
        })?;

        let Some(bytes) = updated else {
            return Err(ServiceError::Internal {
                message: "view upsert produced no row".to_string(),
            });
        };
        let record: ViewRecord = bincode::deserialize(&bytes)?;
        Ok(record.view_count)
    }

    /// Fetch one aggregate row by its composite key
    pub fn find(
        &self,
        content_type: &str,
        reference: &str,
        user_id: Option<&str>,
    ) -> Result<Option<ViewRecord>> {
        let key = Self::row_key(content_type, reference, user_id);
        let Some(bytes) = self.tree.get(key.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(&bytes)?))
    }

    /// Aggregate rows whose last-seen falls inside the window, grouped by
    /// (content_type, reference), summed counts descending, ties broken by
    /// most-recent last-seen.
    pub fn aggregate_since(
        &self,
        since: DateTime<Utc>,
        content_type: Option<&str>,
    ) -> Result<Vec<PopularItem>> {
        let mut grouped: HashMap<(String, String), PopularItem> = HashMap::new();

        for entry in self.tree.iter() {
            let (_, bytes) = entry?;
            let Ok(record) = bincode::deserialize::<ViewRecord>(&bytes) else {
                // A foreign or corrupt row must not poison the aggregation
                continue;
            };
            if record.last_viewed_at < since {
                continue;
            }
            if let Some(wanted) = content_type {
                if record.content_type != wanted {
                    continue;
                }
            }
            let key = (record.content_type.clone(), record.content_reference.clone());
            let item = grouped.entry(key).or_insert_with(|| PopularItem {
                content_type: record.content_type.clone(),
                content_reference: record.content_reference.clone(),
                total_views: 0,
                unique_viewers: 0,
                last_viewed: None,
                title: None,
            });
            item.total_views += record.view_count;
            item.unique_viewers += 1;
            if item.last_viewed.map_or(true, |seen| record.last_viewed_at > seen) {
                item.last_viewed = Some(record.last_viewed_at);
            }
        }

        let mut items: Vec<PopularItem> = grouped.into_values().collect();
        items.sort_by(|a, b| {
            b.total_views
                .cmp(&a.total_views)
                .then(b.last_viewed.cmp(&a.last_viewed))
        });
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn open_storage() -> (Storage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("store")).unwrap();
        (storage, dir)
    }

    #[test]
    fn test_three_anonymous_views_one_row() {
        let (storage, _dir) = open_storage();
        let store = storage.view_store();
        store.record_view("chapter", "1", None, None, None).unwrap();
        store.record_view("chapter", "1", None, None, None).unwrap();
        let count = store.record_view("chapter", "1", None, None, None).unwrap();
        assert_eq!(count, 3);

        let row = store.find("chapter", "1", None).unwrap().unwrap();
        assert_eq!(row.view_count, 3);
        assert!(row.user_id.is_none());
        assert!(row.last_viewed_at >= row.first_viewed_at);

        // The row identity is assigned once and survives upserts
        store.record_view("chapter", "1", None, None, None).unwrap();
        let again = store.find("chapter", "1", None).unwrap().unwrap();
        assert_eq!(again.id, row.id);
    }

    #[test]
    fn test_user_rows_are_separate() {
        let (storage, _dir) = open_storage();
        let store = storage.view_store();
        store.record_view("article", "2.9", Some("u1"), None, None).unwrap();
        store.record_view("article", "2.9", Some("u2"), None, None).unwrap();
        store.record_view("article", "2.9", None, None, None).unwrap();

        assert_eq!(store.find("article", "2.9", Some("u1")).unwrap().unwrap().view_count, 1);
        assert_eq!(store.find("article", "2.9", Some("u2")).unwrap().unwrap().view_count, 1);
        assert_eq!(store.find("article", "2.9", None).unwrap().unwrap().view_count, 1);
    }

    #[test]
    fn test_aggregate_groups_and_orders() {
        let (storage, _dir) = open_storage();
        let store = storage.view_store();
        for _ in 0..5 {
            store.record_view("chapter", "4", None, None, None).unwrap();
        }
        store.record_view("chapter", "4", Some("u1"), None, None).unwrap();
        store.record_view("article", "2.9", Some("u1"), None, None).unwrap();

        let since = Utc::now() - Duration::hours(1);
        let items = store.aggregate_since(since, None).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content_reference, "4");
        assert_eq!(items[0].total_views, 6);
        assert_eq!(items[0].unique_viewers, 2);
        assert_eq!(items[1].content_reference, "2.9");
    }

    #[test]
    fn test_aggregate_filters_by_type_and_window() {
        let (storage, _dir) = open_storage();
        let store = storage.view_store();
        store.record_view("chapter", "1", None, None, None).unwrap();
        store.record_view("article", "1.2", None, None, None).unwrap();

        let since = Utc::now() - Duration::hours(1);
        let chapters = store.aggregate_since(since, Some("chapter")).unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].content_type, "chapter");

        // A window starting in the future excludes everything
        let future = Utc::now() + Duration::hours(1);
        assert!(store.aggregate_since(future, None).unwrap().is_empty());
    }

    #[test]
    fn test_device_and_ip_updated_on_upsert() {
        let (storage, _dir) = open_storage();
        let store = storage.view_store();
        store.record_view("chapter", "1", Some("u1"), Some("mobile"), None).unwrap();
        store
            .record_view("chapter", "1", Some("u1"), Some("desktop"), Some("10.0.0.1"))
            .unwrap();
        let row = store.find("chapter", "1", Some("u1")).unwrap().unwrap();
        assert_eq!(row.device_type.as_deref(), Some("desktop"));
        assert_eq!(row.ip_address.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_health_check() {
        let (storage, _dir) = open_storage();
        assert!(storage.health_check().is_ok());
    }
}
