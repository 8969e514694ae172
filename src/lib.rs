//! # Constitution Search Service
//!
//! ## Overview
//! This library implements the content cache-and-search subsystem for a
//! constitution reading platform: tiered caching of the document tree,
//! full-text search with highlighting, view analytics with popularity
//! rankings and reading-completion estimation.
//!
//! ## Architecture
//! The system is composed of several key modules:
//! - `document`: Document model, source loading and tree traversal
//! - `cache`: Key-value cache backends and the namespaced manager
//! - `content`: Resource-addressed content caching with TTL tiers
//! - `search`: Case-insensitive search with context highlighting
//! - `analytics`: View tracking and timeframe popularity rankings
//! - `reading`: Reading-completion threshold estimation
//! - `api`: REST API endpoints
//! - `storage`: Persistent sled storage for cache entries and view rows
//! - `config`: Configuration management and settings
//! - `errors`: Centralized error handling and types
//!
//! ## Input/Output Specification
//! - **Input**: Constitution JSON source, search queries, view events
//! - **Output**: Cached content, highlighted search results, rankings
//! - **Performance**: Cache-first reads, deferred cache population
//!
//! ## Usage
//! ```rust,no_run
//! use constitution_search::{api::ApiServer, AppState, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.toml")?;
//!     let state = AppState::build(config)?;
//!     ApiServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod analytics;
pub mod api;
pub mod cache;
pub mod config;
pub mod content;
pub mod document;
pub mod errors;
pub mod reading;
pub mod search;
pub mod storage;

// Utilities
pub mod tasks;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use document::Document;
pub use errors::{Result, ServiceError};
pub use search::{SearchEngine, SearchRequest, SearchResponse};

use crate::analytics::ViewTracker;
use crate::cache::{CacheManager, SledBackend};
use crate::content::ContentCache;
use crate::document::DocumentStore;
use crate::reading::ReadingCompletionEstimator;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Content categories shared by caching, analytics and reading estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Constitution,
    Chapter,
    Article,
    Search,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Constitution => "constitution",
            ContentKind::Chapter => "chapter",
            ContentKind::Article => "article",
            ContentKind::Search => "search",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "constitution" => Ok(ContentKind::Constitution),
            "chapter" => Ok(ContentKind::Chapter),
            "article" => Ok(ContentKind::Article),
            "search" => Ok(ContentKind::Search),
            other => Err(ServiceError::invalid_query(
                "content_type",
                format!("unknown content type '{}'", other),
            )),
        }
    }
}

/// Shared application state handed to every API handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<CacheManager>,
    pub storage: Arc<Storage>,
    pub content: Arc<ContentCache>,
    pub search_engine: Arc<SearchEngine>,
    pub view_tracker: Arc<ViewTracker>,
    pub estimator: Arc<ReadingCompletionEstimator>,
}

impl AppState {
    /// Wire every component against one storage instance and one cache
    pub fn build(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config.analytics.db_path)?);
        let cache = Arc::new(CacheManager::new(
            Arc::new(SledBackend::new(storage.cache_tree())),
            config.cache.prefix.clone(),
        ));
        let store = Arc::new(DocumentStore::new(&config.document.file_path));
        let content = Arc::new(ContentCache::new(
            cache.clone(),
            store,
            config.cache.clone(),
        ));
        let view_tracker = Arc::new(ViewTracker::new(
            cache.clone(),
            storage.view_store(),
            config.analytics.clone(),
            config.cache.clone(),
        ));
        let search_engine = Arc::new(SearchEngine::new(
            content.clone(),
            cache.clone(),
            view_tracker.clone(),
            config.search.clone(),
        ));
        let estimator = Arc::new(ReadingCompletionEstimator::new(
            content.clone(),
            config.reading.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            cache,
            storage,
            content,
            search_engine,
            view_tracker,
            estimator,
        })
    }
}
