//! # Search Engine Module
//!
//! ## Purpose
//! Case-insensitive substring search across every level of the document
//! hierarchy, with match-context highlighting, pagination and response
//! caching keyed by a stable request signature.
//!
//! ## Input/Output Specification
//! - **Input**: Query text, optional chapter/article filters, paging, flags
//! - **Output**: Results in encounter order with highlighted context, plus
//!   pagination metadata
//! - **Ordering**: fixed document-order traversal; results are not
//!   relevance-ranked
//!
//! ## Key Features
//! - Single traversal per search over the shared tree walk
//! - Bounded context windows (~50 chars either side) for body text
//! - `**` markers wrapping every occurrence, never double-wrapped
//! - One result per clause/sub-clause unit regardless of occurrence count
//! - Fire-and-forget search-view analytics events

use crate::analytics::ViewTracker;
use crate::cache::CacheManager;
use crate::config::SearchConfig;
use crate::content::{ContentCache, PopulateMode, KEY_SEARCH_PREFIX};
use crate::document::DocNode;
use crate::errors::{Result, ServiceError};
use crate::tasks;
use crate::utils::TextUtils;
use crate::ContentKind;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Hierarchy level a search result was found at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Preamble,
    Chapter,
    ArticleTitle,
    Clause,
    SubClause,
}

/// Parsed search filters. Nonexistent targets yield zero results, not errors;
/// non-numeric values are rejected as `InvalidQuery` before traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub chapter: Option<u32>,
    pub article: Option<u32>,
}

impl SearchFilters {
    /// Parse raw string filters from the transport layer
    pub fn parse(chapter: Option<&str>, article: Option<&str>) -> Result<Self> {
        let chapter = match chapter {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|_| {
                ServiceError::invalid_query("chapter", "chapter filter must be a positive number")
            })?),
            None => None,
        };
        let article = match article {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|_| {
                ServiceError::invalid_query("article", "article filter must be a positive number")
            })?),
            None => None,
        };
        Ok(Self { chapter, article })
    }
}

/// A fully specified search request
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub filters: SearchFilters,
    pub limit: usize,
    pub offset: usize,
    pub highlight: bool,
    pub bypass_cache: bool,
}

/// One search result with its full hierarchical locator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    #[serde(rename = "type")]
    pub kind: ResultKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clause_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_clause_id: Option<String>,
    /// Raw matched content
    pub content: String,
    /// Bounded, optionally highlighted context around the first match
    pub match_context: String,
}

/// Pagination metadata over the full ordered result list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_next: bool,
    pub has_previous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_offset: Option<usize>,
}

/// Search response: one page of results plus pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub normalized_query: String,
    pub results: Vec<SearchResultItem>,
    pub pagination: Pagination,
}

/// Wraps query occurrences in marker pairs and extracts context windows
struct Highlighter {
    marker: String,
    context_chars: usize,
    pattern: regex::Regex,
}

impl Highlighter {
    fn new(query: &str, config: &SearchConfig) -> Result<Self> {
        let pattern = RegexBuilder::new(&regex::escape(query))
            .case_insensitive(true)
            .build()
            .map_err(|e| ServiceError::Internal {
                message: format!("highlight pattern build failed: {}", e),
            })?;
        Ok(Self {
            marker: config.highlight_marker.clone(),
            context_chars: config.context_chars,
            pattern,
        })
    }

    /// Wrap every case-insensitive occurrence left-to-right. Occurrences are
    /// non-overlapping by construction, so nothing is double-wrapped and
    /// stripping the markers reproduces the input exactly.
    fn highlight(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &regex::Captures| {
                format!("{}{}{}", self.marker, &caps[0], self.marker)
            })
            .into_owned()
    }

    /// Extract a bounded window around the first match, with ellipses where
    /// the window cuts into the text, optionally highlighted.
    fn context(&self, text: &str, highlight: bool) -> String {
        let Some(found) = self.pattern.find(text) else {
            // No occurrence (should not happen post-match); bounded prefix
            return TextUtils::truncate(text, self.context_chars * 2);
        };

        // Walk char boundaries outward from the match
        let start = {
            let mut boundary = found.start();
            for (count, (idx, _)) in text[..found.start()].char_indices().rev().enumerate() {
                if count >= self.context_chars {
                    break;
                }
                boundary = idx;
            }
            boundary
        };
        let end = text[found.end()..]
            .char_indices()
            .nth(self.context_chars)
            .map(|(idx, _)| found.end() + idx)
            .unwrap_or(text.len());

        let mut window = String::new();
        if start > 0 {
            window.push_str("...");
        }
        window.push_str(&text[start..end]);
        if end < text.len() {
            window.push_str("...");
        }

        if highlight {
            self.highlight(&window)
        } else {
            window
        }
    }
}

/// Main search engine over the cached document tree
pub struct SearchEngine {
    content: Arc<ContentCache>,
    cache: Arc<CacheManager>,
    tracker: Arc<ViewTracker>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(
        content: Arc<ContentCache>,
        cache: Arc<CacheManager>,
        tracker: Arc<ViewTracker>,
        config: SearchConfig,
    ) -> Self {
        Self {
            content,
            cache,
            tracker,
            config,
        }
    }

    /// Execute a search request.
    ///
    /// Empty or whitespace queries return an empty result set immediately.
    /// Cached responses are returned verbatim (still counted as a search
    /// view). Pagination is applied after the full traversal; correctness
    /// over early termination, the document is already in memory.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let trimmed = request.query.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty_response(&request));
        }
        if trimmed.chars().count() > self.config.max_query_length {
            return Err(ServiceError::invalid_query(
                "q",
                format!("query exceeds {} characters", self.config.max_query_length),
            ));
        }

        let normalized = trimmed.to_lowercase();
        let signature = self.request_signature(&normalized, &request);
        let cache_key = format!("{}{}", KEY_SEARCH_PREFIX, signature);

        // Every search counts as a view, cache hit or not
        self.record_search_view(trimmed);

        if !request.bypass_cache {
            if let Some(cached) = self.cache.get::<SearchResponse>(&cache_key).await {
                return Ok(cached);
            }
        }

        let document = self.content.get_document(PopulateMode::Deferred).await?;
        let highlighter = Highlighter::new(trimmed, &self.config)?;

        let mut matches = Vec::new();
        document.walk(&mut |node| {
            if let Some(item) = self.match_node(node, &normalized, &request, &highlighter) {
                matches.push(item);
            }
        });

        let total = matches.len();
        let offset = request.offset;
        let limit = request.limit.max(1);
        let page: Vec<SearchResultItem> = matches.into_iter().skip(offset).take(limit).collect();

        let response = SearchResponse {
            query: trimmed.to_string(),
            normalized_query: normalized,
            results: page,
            pagination: Self::paginate(total, limit, offset),
        };

        if !request.bypass_cache {
            self.cache
                .set(&cache_key, &response, self.content.search_ttl())
                .await;
        }
        Ok(response)
    }

    /// Test one tree node against the query and filters
    fn match_node(
        &self,
        node: DocNode<'_>,
        normalized: &str,
        request: &SearchRequest,
        highlighter: &Highlighter,
    ) -> Option<SearchResultItem> {
        let filters = &request.filters;
        let contains = |text: &str| text.to_lowercase().contains(normalized);

        match node {
            DocNode::Preamble(text) => {
                // The preamble sits outside every chapter; any filter excludes it
                if filters.chapter.is_some() || filters.article.is_some() {
                    return None;
                }
                if !contains(text) {
                    return None;
                }
                Some(SearchResultItem {
                    kind: ResultKind::Preamble,
                    chapter_number: None,
                    chapter_title: None,
                    part_number: None,
                    part_title: None,
                    article_number: None,
                    article_title: None,
                    clause_number: None,
                    sub_clause_id: None,
                    content: text.to_string(),
                    match_context: highlighter.context(text, request.highlight),
                })
            }
            DocNode::Chapter(chapter) => {
                // A chapter-title result makes no sense under an article filter
                if filters.article.is_some() {
                    return None;
                }
                if filters.chapter.is_some_and(|c| c != chapter.chapter_number) {
                    return None;
                }
                if !contains(&chapter.chapter_title) {
                    return None;
                }
                Some(SearchResultItem {
                    kind: ResultKind::Chapter,
                    chapter_number: Some(chapter.chapter_number),
                    chapter_title: Some(chapter.chapter_title.clone()),
                    part_number: None,
                    part_title: None,
                    article_number: None,
                    article_title: None,
                    clause_number: None,
                    sub_clause_id: None,
                    content: chapter.chapter_title.clone(),
                    match_context: if request.highlight {
                        highlighter.highlight(&chapter.chapter_title)
                    } else {
                        chapter.chapter_title.clone()
                    },
                })
            }
            DocNode::Article { chapter, part, article } => {
                if filters.chapter.is_some_and(|c| c != chapter.chapter_number)
                    || filters.article.is_some_and(|a| a != article.article_number)
                {
                    return None;
                }
                if !contains(&article.article_title) {
                    return None;
                }
                Some(SearchResultItem {
                    kind: ResultKind::ArticleTitle,
                    chapter_number: Some(chapter.chapter_number),
                    chapter_title: Some(chapter.chapter_title.clone()),
                    part_number: part.map(|p| p.part_number),
                    part_title: part.map(|p| p.part_title.clone()),
                    article_number: Some(article.article_number),
                    article_title: Some(article.article_title.clone()),
                    clause_number: None,
                    sub_clause_id: None,
                    content: article.article_title.clone(),
                    match_context: if request.highlight {
                        highlighter.highlight(&article.article_title)
                    } else {
                        article.article_title.clone()
                    },
                })
            }
            DocNode::Clause { chapter, part, article, clause } => {
                if filters.chapter.is_some_and(|c| c != chapter.chapter_number)
                    || filters.article.is_some_and(|a| a != article.article_number)
                {
                    return None;
                }
                if !contains(&clause.content) {
                    return None;
                }
                Some(SearchResultItem {
                    kind: ResultKind::Clause,
                    chapter_number: Some(chapter.chapter_number),
                    chapter_title: Some(chapter.chapter_title.clone()),
                    part_number: part.map(|p| p.part_number),
                    part_title: part.map(|p| p.part_title.clone()),
                    article_number: Some(article.article_number),
                    article_title: Some(article.article_title.clone()),
                    clause_number: Some(clause.clause_number.clone()),
                    sub_clause_id: None,
                    content: clause.content.clone(),
                    match_context: highlighter.context(&clause.content, request.highlight),
                })
            }
            DocNode::SubClause {
                chapter,
                part,
                article,
                clause,
                sub_clause,
            } => {
                if filters.chapter.is_some_and(|c| c != chapter.chapter_number)
                    || filters.article.is_some_and(|a| a != article.article_number)
                {
                    return None;
                }
                if !contains(&sub_clause.content) {
                    return None;
                }
                Some(SearchResultItem {
                    kind: ResultKind::SubClause,
                    chapter_number: Some(chapter.chapter_number),
                    chapter_title: Some(chapter.chapter_title.clone()),
                    part_number: part.map(|p| p.part_number),
                    part_title: part.map(|p| p.part_title.clone()),
                    article_number: Some(article.article_number),
                    article_title: Some(article.article_title.clone()),
                    clause_number: Some(clause.clause_number.clone()),
                    sub_clause_id: Some(sub_clause.sub_clause_id.clone()),
                    content: sub_clause.content.clone(),
                    match_context: highlighter.context(&sub_clause.content, request.highlight),
                })
            }
        }
    }

    /// Stable signature over everything that changes the response
    fn request_signature(&self, normalized: &str, request: &SearchRequest) -> String {
        let chapter = request
            .filters
            .chapter
            .map(|c| c.to_string())
            .unwrap_or_default();
        let article = request
            .filters
            .article
            .map(|a| a.to_string())
            .unwrap_or_default();
        TextUtils::signature_hash(&[
            normalized,
            &chapter,
            &article,
            &request.limit.to_string(),
            &request.offset.to_string(),
            if request.highlight { "1" } else { "0" },
        ])
    }

    /// Fire-and-forget search-view event; the query is truncated to a
    /// bounded length before it reaches analytics
    fn record_search_view(&self, query: &str) {
        let tracker = self.tracker.clone();
        let tracked = TextUtils::truncate(query, self.config.tracked_query_length);
        tasks::spawn_detached("search_view", async move {
            tracker.track(ContentKind::Search, &tracked, None, None, None).await;
            Ok(())
        });
    }

    fn paginate(total: usize, limit: usize, offset: usize) -> Pagination {
        let has_next = offset + limit < total;
        let has_previous = offset > 0;
        Pagination {
            total,
            limit,
            offset,
            has_next,
            has_previous,
            next_offset: has_next.then_some(offset + limit),
            previous_offset: has_previous.then(|| offset.saturating_sub(limit)),
        }
    }

    fn empty_response(request: &SearchRequest) -> SearchResponse {
        SearchResponse {
            query: String::new(),
            normalized_query: String::new(),
            results: Vec::new(),
            pagination: Self::paginate(0, request.limit.max(1), request.offset),
        }
    }
}
