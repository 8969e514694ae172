//! # Reading Completion Module
//!
//! ## Purpose
//! Estimates how many minutes a reader must spend on a chapter or article
//! before it counts as read. The threshold scales with word count but never
//! drops below a floor, so trivially short sections stay meaningful and very
//! long ones stay achievable.
//!
//! ## Input/Output Specification
//! - **Input**: Content kind (chapter/article) and reference ("2" or "2.9")
//! - **Output**: Word count, full-read estimate and completion threshold
//! - **Formula**: `max(minimum, words / wpm * completion_ratio)`

use crate::config::ReadingConfig;
use crate::content::{ContentCache, PopulateMode};
use crate::errors::{Result, ServiceError};
use crate::ContentKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Completion estimate for one piece of content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdEstimate {
    pub content_type: ContentKind,
    pub reference: String,
    pub word_count: usize,
    /// Minutes for a complete read at the configured speed
    pub estimated_read_minutes: f64,
    /// Minutes of engagement required to count as read
    pub threshold_minutes: f64,
}

/// Computes completion thresholds from cached content
pub struct ReadingCompletionEstimator {
    content: Arc<ContentCache>,
    config: ReadingConfig,
}

impl ReadingCompletionEstimator {
    pub fn new(content: Arc<ContentCache>, config: ReadingConfig) -> Self {
        Self { content, config }
    }

    /// Threshold for a chapter ("4") or article ("2.9") reference.
    ///
    /// Unknown references resolve to the floor threshold rather than an
    /// error: progress tracking should degrade, not break, when content is
    /// renumbered out from under stored references.
    pub async fn threshold(&self, kind: ContentKind, reference: &str) -> Result<ThresholdEstimate> {
        let words = match kind {
            ContentKind::Chapter => {
                let number = parse_number(reference, "chapter")?;
                match self.content.get_chapter(number, PopulateMode::Deferred).await {
                    Ok(chapter) => chapter.word_count(),
                    Err(ServiceError::NotFound { .. }) => 0,
                    Err(e) => return Err(e),
                }
            }
            ContentKind::Article => {
                let (chapter, article) = parse_article_reference(reference)?;
                match self
                    .content
                    .get_article(chapter, article, PopulateMode::Deferred)
                    .await
                {
                    Ok(article) => article.word_count(),
                    Err(ServiceError::NotFound { .. }) => 0,
                    Err(e) => return Err(e),
                }
            }
            other => {
                return Err(ServiceError::invalid_query(
                    "content_type",
                    format!("no reading threshold for '{}' content", other),
                ))
            }
        };

        let estimated = words as f64 / self.config.words_per_minute;
        let threshold = (estimated * self.config.completion_ratio).max(self.config.minimum_minutes);
        Ok(ThresholdEstimate {
            content_type: kind,
            reference: reference.to_string(),
            word_count: words,
            estimated_read_minutes: estimated,
            threshold_minutes: threshold,
        })
    }
}

fn parse_number(reference: &str, field: &str) -> Result<u32> {
    reference.trim().parse::<u32>().map_err(|_| {
        ServiceError::invalid_query(field, format!("'{}' is not a valid {} number", reference, field))
    })
}

/// Article references are dotted: "{chapter}.{article}"
fn parse_article_reference(reference: &str) -> Result<(u32, u32)> {
    let (chapter, article) = reference.trim().split_once('.').ok_or_else(|| {
        ServiceError::invalid_query(
            "reference",
            format!("'{}' is not a chapter.article reference", reference),
        )
    })?;
    Ok((parse_number(chapter, "chapter")?, parse_number(article, "article")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheManager, MemoryBackend};
    use crate::config::CacheConfig;
    use crate::document::test_fixtures::sample_json;
    use crate::document::DocumentStore;

    struct Fixture {
        estimator: ReadingCompletionEstimator,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let doc_path = dir.path().join("constitution.json");
        std::fs::write(&doc_path, sample_json()).unwrap();
        let cache = Arc::new(CacheManager::new(
            Arc::new(MemoryBackend::new()),
            "constitution",
        ));
        let content = Arc::new(ContentCache::new(
            cache,
            Arc::new(DocumentStore::new(&doc_path)),
            CacheConfig::default(),
        ));
        let estimator = ReadingCompletionEstimator::new(content, ReadingConfig::default());
        Fixture {
            estimator,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_short_content_hits_the_floor() {
        let fx = fixture();
        // 400 words at 200 wpm is a 2-minute read; 30% of that is 0.6,
        // below the 2.0-minute floor
        let estimate = fx.estimator.threshold(ContentKind::Article, "2.9").await.unwrap();
        assert!(estimate.word_count < 400);
        assert_eq!(estimate.threshold_minutes, 2.0);
    }

    #[tokio::test]
    async fn test_threshold_scales_with_length() {
        let fx = fixture();
        let config = ReadingConfig::default();
        let compute = |words: f64| (words / config.words_per_minute * config.completion_ratio)
            .max(config.minimum_minutes);
        // Above the floor the threshold is strictly monotone in word count
        assert_eq!(compute(400.0), 2.0);
        assert!(compute(2000.0) < compute(4000.0));
        assert_eq!(compute(2000.0), 3.0);
    }

    #[tokio::test]
    async fn test_unknown_reference_resolves_to_floor() {
        let fx = fixture();
        let estimate = fx.estimator.threshold(ContentKind::Chapter, "999").await.unwrap();
        assert_eq!(estimate.word_count, 0);
        assert_eq!(estimate.threshold_minutes, 2.0);

        let estimate = fx.estimator.threshold(ContentKind::Article, "2.999").await.unwrap();
        assert_eq!(estimate.threshold_minutes, 2.0);
    }

    #[tokio::test]
    async fn test_malformed_references_rejected() {
        let fx = fixture();
        assert!(matches!(
            fx.estimator.threshold(ContentKind::Chapter, "two").await.unwrap_err(),
            ServiceError::InvalidQuery { .. }
        ));
        assert!(matches!(
            fx.estimator.threshold(ContentKind::Article, "29").await.unwrap_err(),
            ServiceError::InvalidQuery { .. }
        ));
        assert!(matches!(
            fx.estimator.threshold(ContentKind::Search, "1").await.unwrap_err(),
            ServiceError::InvalidQuery { .. }
        ));
    }

    #[tokio::test]
    async fn test_chapter_counts_exceed_single_articles() {
        let fx = fixture();
        let chapter = fx.estimator.threshold(ContentKind::Chapter, "2").await.unwrap();
        let article = fx.estimator.threshold(ContentKind::Article, "2.9").await.unwrap();
        assert!(chapter.word_count >= article.word_count);
    }
}
