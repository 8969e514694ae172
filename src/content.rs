//! # Content Cache Module
//!
//! ## Purpose
//! Resource-addressed caching of the document and its substructures with
//! tiered TTLs, deferred background population and selective invalidation.
//!
//! ## Input/Output Specification
//! - **Input**: Logical document selectors (overview, chapter N, article C.A)
//! - **Output**: Typed document data served from cache or the source store
//! - **TTL tiers**: overview ~6h, chapter/article ~24h, search/popular ~1h
//!
//! ## Key Taxonomy
//! All keys live under the manager's namespace prefix:
//! `overview`, `chapter:{n}`, `article:{c}:{a}`, `search:{hash}`,
//! `popular:{timeframe}:...`, `views:{type}:{ref}`, `user:{id}:...`
//!
//! ## Failure Semantics
//! A cache miss falls back to the authoritative `DocumentStore`; a store
//! failure is `SourceUnavailable` and aborts the request rather than caching
//! an empty document. Cache writes never block the read path when deferred.

use crate::cache::CacheManager;
use crate::config::CacheConfig;
use crate::document::{Article, Chapter, Document, DocumentStore};
use crate::errors::{Result, ServiceError};
use crate::tasks;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Cache key for the whole-document overview
pub const KEY_OVERVIEW: &str = "overview";
/// Key prefixes for the remaining namespaces
pub const KEY_CHAPTER_PREFIX: &str = "chapter:";
pub const KEY_ARTICLE_PREFIX: &str = "article:";
pub const KEY_SEARCH_PREFIX: &str = "search:";
pub const KEY_POPULAR_PREFIX: &str = "popular:";
pub const KEY_VIEWS_PREFIX: &str = "views:";
pub const KEY_USER_PREFIX: &str = "user:";

/// Whether a cache population may be deferred past the response.
///
/// `Deferred` submits the write as a fire-and-forget background task: the
/// caller gets its data immediately and the cache fills afterwards. Failed
/// deferred writes are logged and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulateMode {
    Immediate,
    Deferred,
}

/// Caches the document and its substructures in front of the source store
pub struct ContentCache {
    cache: Arc<CacheManager>,
    store: Arc<DocumentStore>,
    config: CacheConfig,
}

impl ContentCache {
    pub fn new(cache: Arc<CacheManager>, store: Arc<DocumentStore>, config: CacheConfig) -> Self {
        Self { cache, store, config }
    }

    pub fn chapter_key(number: u32) -> String {
        format!("{}{}", KEY_CHAPTER_PREFIX, number)
    }

    pub fn article_key(chapter: u32, article: u32) -> String {
        format!("{}{}:{}", KEY_ARTICLE_PREFIX, chapter, article)
    }

    /// Write a freshly loaded value into the cache. `Deferred` hands the
    /// write to a background task; `Immediate` completes it before returning.
    /// Either way a failed write is non-critical: the data was already served.
    async fn populate<T: Serialize + Clone + Send + Sync + 'static>(
        &self,
        mode: PopulateMode,
        key: String,
        value: &T,
        ttl: Duration,
    ) {
        match mode {
            PopulateMode::Deferred => {
                let cache = self.cache.clone();
                let value = value.clone();
                tasks::spawn_detached("cache_populate", async move {
                    cache.set(&key, &value, ttl).await;
                    Ok(())
                });
            }
            PopulateMode::Immediate => {
                self.cache.set(&key, value, ttl).await;
            }
        }
    }

    /// Get the full document, loading from the source on a cache miss
    pub async fn get_document(&self, mode: PopulateMode) -> Result<Document> {
        if let Some(document) = self.cache.get::<Document>(KEY_OVERVIEW).await {
            return Ok(document);
        }
        let document = self.store.load().await?;
        self.populate(
            mode,
            KEY_OVERVIEW.to_string(),
            &document,
            Duration::from_secs(self.config.overview_ttl_seconds),
        )
        .await;
        Ok(document)
    }

    /// Get one chapter by number; `NotFound` when it does not exist
    pub async fn get_chapter(&self, number: u32, mode: PopulateMode) -> Result<Chapter> {
        let key = Self::chapter_key(number);
        if let Some(chapter) = self.cache.get::<Chapter>(&key).await {
            return Ok(chapter);
        }
        let document = self.get_document(mode).await?;
        let chapter = document
            .chapter(number)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("chapter", number))?;
        self.populate(
            mode,
            key,
            &chapter,
            Duration::from_secs(self.config.content_ttl_seconds),
        )
        .await;
        Ok(chapter)
    }

    /// Get one article by chapter and article number; `NotFound` when absent
    pub async fn get_article(
        &self,
        chapter_number: u32,
        article_number: u32,
        mode: PopulateMode,
    ) -> Result<Article> {
        let key = Self::article_key(chapter_number, article_number);
        if let Some(article) = self.cache.get::<Article>(&key).await {
            return Ok(article);
        }
        let document = self.get_document(mode).await?;
        if document.chapter(chapter_number).is_none() {
            return Err(ServiceError::not_found("chapter", chapter_number));
        }
        let article = document
            .article(chapter_number, article_number)
            .cloned()
            .ok_or_else(|| {
                ServiceError::not_found(
                    "article",
                    format!("{}.{}", chapter_number, article_number),
                )
            })?;
        self.populate(
            mode,
            key,
            &article,
            Duration::from_secs(self.config.content_ttl_seconds),
        )
        .await;
        Ok(article)
    }

    /// Evict the overview key and re-read the document from the source.
    ///
    /// Deliberately does not cascade to per-chapter/article keys; those age
    /// out on their own TTL. Callers requiring full consistency should also
    /// call [`ContentCache::invalidate_all`].
    pub async fn reload(&self) -> Result<Document> {
        self.cache.delete(KEY_OVERVIEW).await;
        let document = self.store.load().await?;
        self.cache
            .set(
                KEY_OVERVIEW,
                &document,
                Duration::from_secs(self.config.overview_ttl_seconds),
            )
            .await;
        tracing::info!("Document reloaded from source");
        Ok(document)
    }

    /// Evict every cached search response
    pub async fn invalidate_search(&self) -> usize {
        self.cache.clear_pattern(&format!("{}*", KEY_SEARCH_PREFIX)).await
    }

    /// Evict all cached data for one user
    pub async fn invalidate_user(&self, user_id: &str) -> usize {
        self.cache
            .clear_pattern(&format!("{}{}:*", KEY_USER_PREFIX, user_id))
            .await
    }

    /// Evict every namespace this subsystem owns
    pub async fn invalidate_all(&self) -> usize {
        let patterns = [
            format!("{}*", KEY_OVERVIEW),
            format!("{}*", KEY_CHAPTER_PREFIX),
            format!("{}*", KEY_ARTICLE_PREFIX),
            format!("{}*", KEY_SEARCH_PREFIX),
            format!("{}*", KEY_POPULAR_PREFIX),
            format!("{}*", KEY_VIEWS_PREFIX),
            format!("{}*", KEY_USER_PREFIX),
        ];
        let mut total = 0;
        for pattern in &patterns {
            total += self.cache.clear_pattern(pattern).await;
        }
        tracing::info!(cleared = total, "Cleared all constitution cache entries");
        total
    }

    /// Search-response TTL, shared with the search engine
    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.config.search_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use crate::document::test_fixtures::sample_json;

    struct Fixture {
        content: ContentCache,
        _dir: tempfile::TempDir,
        doc_path: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let doc_path = dir.path().join("constitution.json");
        std::fs::write(&doc_path, sample_json()).unwrap();
        let cache = Arc::new(CacheManager::new(
            Arc::new(MemoryBackend::new()),
            "constitution",
        ));
        let store = Arc::new(DocumentStore::new(&doc_path));
        let content = ContentCache::new(cache, store, CacheConfig::default());
        Fixture {
            content,
            _dir: dir,
            doc_path,
        }
    }

    #[tokio::test]
    async fn test_get_chapter_returns_requested_number() {
        let fx = fixture();
        let chapter = fx.content.get_chapter(2, PopulateMode::Immediate).await.unwrap();
        assert_eq!(chapter.chapter_number, 2);
        assert_eq!(chapter.chapter_title, "The Republic");
    }

    #[tokio::test]
    async fn test_second_read_within_ttl_skips_the_loader() {
        let fx = fixture();
        let first = fx.content.get_chapter(2, PopulateMode::Immediate).await.unwrap();
        // Removing the source proves the repeat read is served from cache
        std::fs::remove_file(&fx.doc_path).unwrap();
        let second = fx.content.get_chapter(2, PopulateMode::Immediate).await.unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_chapter_is_not_found() {
        let fx = fixture();
        let err = fx.content.get_chapter(999, PopulateMode::Immediate).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_article_lookup_spans_parts() {
        let fx = fixture();
        let article = fx.content.get_article(4, 19, PopulateMode::Immediate).await.unwrap();
        assert_eq!(article.article_number, 19);

        let err = fx.content.get_article(2, 19, PopulateMode::Immediate).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal_not_a_miss() {
        let fx = fixture();
        std::fs::remove_file(&fx.doc_path).unwrap();
        let err = fx.content.get_document(PopulateMode::Immediate).await.unwrap_err();
        assert!(matches!(err, ServiceError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let fx = fixture();
        let once = fx.content.reload().await.unwrap();
        let twice = fx.content.reload().await.unwrap();
        assert_eq!(
            serde_json::to_string(&once).unwrap(),
            serde_json::to_string(&twice).unwrap()
        );
    }

    #[tokio::test]
    async fn test_reload_does_not_cascade_to_chapter_keys() {
        let fx = fixture();
        fx.content.get_chapter(2, PopulateMode::Immediate).await.unwrap();
        fx.content.reload().await.unwrap();
        // Chapter key still present; the documented limitation
        std::fs::remove_file(&fx.doc_path).unwrap();
        assert!(fx.content.get_chapter(2, PopulateMode::Immediate).await.is_ok());
    }

    #[tokio::test]
    async fn test_deferred_population_still_returns_content() {
        let fx = fixture();
        let chapter = fx.content.get_chapter(2, PopulateMode::Deferred).await.unwrap();
        assert_eq!(chapter.chapter_number, 2);
    }

    #[tokio::test]
    async fn test_invalidate_user_scoped() {
        let fx = fixture();
        let ttl = Duration::from_secs(60);
        fx.content.cache.set("user:42:bookmarks", &"b", ttl).await;
        fx.content.cache.set("user:42:progress", &"p", ttl).await;
        fx.content.cache.set("user:7:progress", &"q", ttl).await;
        assert_eq!(fx.content.invalidate_user("42").await, 2);
    }

    #[tokio::test]
    async fn test_invalidate_search_counts() {
        let fx = fixture();
        let ttl = Duration::from_secs(60);
        fx.content.cache.set("search:aaa", &1, ttl).await;
        fx.content.cache.set("search:bbb", &2, ttl).await;
        assert_eq!(fx.content.invalidate_search().await, 2);
    }
}
