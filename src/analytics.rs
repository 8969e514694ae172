//! # View Analytics Module
//!
//! ## Purpose
//! Per-content view tracking and timeframe-windowed popularity ranking.
//! Tracking is strictly best-effort: a view event must never fail the
//! request that produced it, so every failure here is logged and swallowed.
//!
//! ## Input/Output Specification
//! - **Input**: View events (content type, reference, optional user/device/ip)
//! - **Output**: Fast counter reads, ranked popularity lists per timeframe
//! - **Fallback**: A curated list when no organic view data exists yet
//!
//! ## Key Features
//! - Fast cache counters under `views:{type}:{ref}` plus a durable
//!   aggregate row per (type, reference, user)
//! - Popularity responses cached for an hour under `popular:{...}`
//! - Daily / weekly / monthly windows over the durable aggregates

use crate::cache::CacheManager;
use crate::config::{AnalyticsConfig, CacheConfig};
use crate::content::{KEY_POPULAR_PREFIX, KEY_VIEWS_PREFIX};
use crate::storage::{PopularItem, ViewStore};
use crate::ContentKind;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Aggregation window for popularity queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Daily,
    Weekly,
    Monthly,
}

impl Timeframe {
    /// Start of the window, counted back from now
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Timeframe::Daily => now - ChronoDuration::days(1),
            Timeframe::Weekly => now - ChronoDuration::weeks(1),
            Timeframe::Monthly => now - ChronoDuration::days(30),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::Daily => "daily",
            Timeframe::Weekly => "weekly",
            Timeframe::Monthly => "monthly",
        };
        f.write_str(s)
    }
}

impl FromStr for Timeframe {
    type Err = crate::errors::ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Timeframe::Daily),
            "weekly" => Ok(Timeframe::Weekly),
            "monthly" => Ok(Timeframe::Monthly),
            other => Err(crate::errors::ServiceError::invalid_query(
                "timeframe",
                format!("unknown timeframe '{}'; expected daily, weekly or monthly", other),
            )),
        }
    }
}

/// Popularity response: ranked items plus the window they cover
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularResponse {
    pub timeframe: Timeframe,
    pub items: Vec<PopularItem>,
    /// True when no organic view data existed and the curated list was used
    pub curated_fallback: bool,
}

/// Records views and serves popularity rankings
pub struct ViewTracker {
    cache: Arc<CacheManager>,
    store: ViewStore,
    config: AnalyticsConfig,
    cache_config: CacheConfig,
}

impl ViewTracker {
    pub fn new(
        cache: Arc<CacheManager>,
        store: ViewStore,
        config: AnalyticsConfig,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            cache,
            store,
            config,
            cache_config,
        }
    }

    /// Record one view event. Never returns an error: counter and durable
    /// writes are each attempted independently and failures only logged.
    pub async fn track(
        &self,
        kind: ContentKind,
        reference: &str,
        user_id: Option<&str>,
        device_type: Option<&str>,
        ip_address: Option<&str>,
    ) {
        let counter_ttl = Duration::from_secs(self.cache_config.counter_ttl_seconds);
        let counter_key = format!("{}{}:{}", KEY_VIEWS_PREFIX, kind, reference);
        self.cache.increment(&counter_key, 1, counter_ttl).await;

        let daily_key = format!(
            "{}{}:{}:{}",
            KEY_POPULAR_PREFIX,
            Timeframe::Daily,
            kind,
            reference
        );
        self.cache.increment(&daily_key, 1, counter_ttl).await;

        if let Err(e) = self
            .store
            .record_view(kind.as_str(), reference, user_id, device_type, ip_address)
        {
            tracing::warn!(
                category = e.category(),
                content_type = kind.as_str(),
                reference,
                "Failed to persist view event: {}",
                e
            );
        }
    }

    /// Fast counter read; 0 when the counter is absent or the cache is down
    pub async fn view_count(&self, kind: ContentKind, reference: &str) -> i64 {
        let key = format!("{}{}:{}", KEY_VIEWS_PREFIX, kind, reference);
        self.cache.get::<i64>(&key).await.unwrap_or(0)
    }

    /// Ranked popularity over the given window, most-viewed first.
    ///
    /// Responses are cached for the popular TTL. When the durable store has
    /// no rows inside the window (fresh deployment, analytics outage) the
    /// curated editorial list is returned instead of an empty response.
    pub async fn popular(
        &self,
        timeframe: Timeframe,
        limit: Option<usize>,
        kind: Option<ContentKind>,
    ) -> PopularResponse {
        let limit = limit.unwrap_or(self.config.default_popular_limit).max(1);
        let cache_key = format!(
            "{}{}:{}:{}",
            KEY_POPULAR_PREFIX,
            timeframe,
            limit,
            kind.map(|k| k.as_str()).unwrap_or("all")
        );
        if let Some(cached) = self.cache.get::<PopularResponse>(&cache_key).await {
            return cached;
        }

        let since = timeframe.window_start(Utc::now());
        let organic = match self.store.aggregate_since(since, kind.map(|k| k.as_str())) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(
                    category = e.category(),
                    "Popularity aggregation failed, serving curated list: {}",
                    e
                );
                Vec::new()
            }
        };

        let response = if organic.is_empty() {
            let mut items = curated_popular();
            if let Some(wanted) = kind {
                items.retain(|item| item.content_type == wanted.as_str());
            }
            items.truncate(limit);
            PopularResponse {
                timeframe,
                items,
                curated_fallback: true,
            }
        } else {
            let mut items = organic;
            items.truncate(limit);
            PopularResponse {
                timeframe,
                items,
                curated_fallback: false,
            }
        };

        self.cache
            .set(
                &cache_key,
                &response,
                Duration::from_secs(self.cache_config.popular_ttl_seconds),
            )
            .await;
        response
    }
}

/// Editorial seed list served until organic view data accumulates.
/// View figures are indicative weights, not measurements.
fn curated_popular() -> Vec<PopularItem> {
    let entries: [(&str, &str, u64, u64, &str); 10] = [
        ("article", "4.19", 1500, 1200, "Rights and Fundamental Freedoms"),
        ("article", "6.73", 1200, 950, "Leadership and Integrity"),
        ("article", "11.174", 1100, 880, "Devolved Government"),
        ("article", "10.159", 1000, 800, "Judicial Authority"),
        ("chapter", "4", 950, 760, "The Bill of Rights"),
        ("article", "12.201", 900, 720, "Principles of Public Finance"),
        ("article", "2.9", 850, 680, "National Symbols and National Days"),
        ("chapter", "8", 800, 640, "The Legislature"),
        ("article", "3.10", 750, 600, "Citizenship"),
        ("chapter", "7", 700, 560, "Representation of the People"),
    ];
    entries
        .into_iter()
        .map(|(content_type, reference, views, viewers, title)| PopularItem {
            content_type: content_type.to_string(),
            content_reference: reference.to_string(),
            total_views: views,
            unique_viewers: viewers,
            last_viewed: None,
            title: Some(title.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use crate::storage::Storage;

    struct Fixture {
        tracker: ViewTracker,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("store")).unwrap();
        let cache = Arc::new(CacheManager::new(
            Arc::new(MemoryBackend::new()),
            "constitution",
        ));
        let tracker = ViewTracker::new(
            cache,
            storage.view_store(),
            AnalyticsConfig::default(),
            CacheConfig::default(),
        );
        Fixture { tracker, _dir: dir }
    }

    #[tokio::test]
    async fn test_three_tracks_accumulate() {
        let fx = fixture();
        for _ in 0..3 {
            fx.tracker.track(ContentKind::Chapter, "4", None, None, None).await;
        }
        assert_eq!(fx.tracker.view_count(ContentKind::Chapter, "4").await, 3);
        assert_eq!(fx.tracker.view_count(ContentKind::Chapter, "5").await, 0);
    }

    #[tokio::test]
    async fn test_popular_prefers_organic_data() {
        let fx = fixture();
        for _ in 0..4 {
            fx.tracker.track(ContentKind::Chapter, "1", None, None, None).await;
        }
        fx.tracker.track(ContentKind::Article, "2.9", None, None, None).await;

        let response = fx.tracker.popular(Timeframe::Daily, Some(5), None).await;
        assert!(!response.curated_fallback);
        assert_eq!(response.items[0].content_reference, "1");
        assert_eq!(response.items[0].total_views, 4);
    }

    #[tokio::test]
    async fn test_popular_falls_back_to_curated() {
        let fx = fixture();
        let response = fx.tracker.popular(Timeframe::Weekly, None, None).await;
        assert!(response.curated_fallback);
        assert_eq!(response.items.len(), 10);
        assert_eq!(response.items[0].content_reference, "4.19");
        assert_eq!(
            response.items[0].title.as_deref(),
            Some("Rights and Fundamental Freedoms")
        );
        // Ordered by the indicative view figures
        assert!(response.items[0].total_views >= response.items[9].total_views);
    }

    #[tokio::test]
    async fn test_curated_fallback_respects_type_and_limit() {
        let fx = fixture();
        let response = fx
            .tracker
            .popular(Timeframe::Monthly, Some(2), Some(ContentKind::Chapter))
            .await;
        assert!(response.curated_fallback);
        assert_eq!(response.items.len(), 2);
        assert!(response.items.iter().all(|i| i.content_type == "chapter"));
    }

    #[tokio::test]
    async fn test_popular_response_is_cached() {
        let fx = fixture();
        let first = fx.tracker.popular(Timeframe::Daily, Some(3), None).await;
        assert!(first.curated_fallback);
        // New organic data does not change the cached window until it expires
        fx.tracker.track(ContentKind::Chapter, "9", None, None, None).await;
        let second = fx.tracker.popular(Timeframe::Daily, Some(3), None).await;
        assert!(second.curated_fallback);
    }

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!("daily".parse::<Timeframe>().unwrap(), Timeframe::Daily);
        assert_eq!(" Weekly ".parse::<Timeframe>().unwrap(), Timeframe::Weekly);
        assert_eq!("MONTHLY".parse::<Timeframe>().unwrap(), Timeframe::Monthly);
        assert!("yearly".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_window_starts() {
        let now = Utc::now();
        assert_eq!(Timeframe::Daily.window_start(now), now - ChronoDuration::days(1));
        assert_eq!(Timeframe::Weekly.window_start(now), now - ChronoDuration::weeks(1));
        assert_eq!(Timeframe::Monthly.window_start(now), now - ChronoDuration::days(30));
    }
}
