//! # Document Model Module
//!
//! ## Purpose
//! Data model for the hierarchical constitution document (preamble, chapters,
//! articles, clauses, sub-clauses) and the `DocumentStore` that loads it from
//! the JSON source file.
//!
//! ## Input/Output Specification
//! - **Input**: Structured JSON document file (read-only at runtime)
//! - **Output**: Typed document tree, per-node lookups, document-order traversal
//! - **Invariant**: the document is immutable per load; the store is the source
//!   of truth whenever the cache is cold
//!
//! ## Key Features
//! - Historical field aliasing (`sub_clause_letter` -> `sub_clause_id`) resolved
//!   once at the serde boundary
//! - Structural validation at load time (malformed sources are fatal)
//! - Generic visitor-based tree walk shared by search and word counting

use crate::errors::{Result, ServiceError};
use crate::utils::TextUtils;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root of the hierarchical legal document. Immutable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Document title
    #[serde(default)]
    pub title: String,
    /// Preamble text
    #[serde(default)]
    pub preamble: String,
    /// Ordered chapters
    pub chapters: Vec<Chapter>,
}

/// A chapter, optionally grouped into parts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    /// Chapter number, unique within the document
    pub chapter_number: u32,
    /// Chapter title
    pub chapter_title: String,
    /// Articles attached directly to the chapter
    #[serde(default)]
    pub articles: Vec<Article>,
    /// Part groupings; a pure structural layer with no own content
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A part grouping inside a chapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    /// Part number, unique within its chapter
    pub part_number: u32,
    /// Part title
    pub part_title: String,
    /// Articles grouped under this part
    #[serde(default)]
    pub articles: Vec<Article>,
}

/// An article within a chapter or part
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    /// Article number, unique within its chapter or part
    pub article_number: u32,
    /// Article title
    pub article_title: String,
    /// Ordered clauses
    #[serde(default)]
    pub clauses: Vec<Clause>,
}

/// A clause within an article
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clause {
    /// Opaque ordered label; non-numeric in some source data
    pub clause_number: String,
    /// Clause text
    #[serde(default)]
    pub content: String,
    /// Ordered sub-clauses
    #[serde(default)]
    pub sub_clauses: Vec<SubClause>,
}

/// A sub-clause, possibly with nested sub-items of the same shape.
///
/// Older extractions emitted the identifier as `sub_clause_letter` (and the
/// nested form as `sub_clause_number`); both deserialize into `sub_clause_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubClause {
    /// Letter or roman-numeral identifier
    #[serde(alias = "sub_clause_letter", alias = "sub_clause_number")]
    pub sub_clause_id: String,
    /// Sub-clause text
    #[serde(default)]
    pub content: String,
    /// Nested numbered sub-items
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested_sub_clauses: Vec<SubClause>,
}

/// A node encountered during the fixed document-order traversal.
///
/// Traversal order: preamble, then chapters ascending by position, and within
/// each chapter its title, then every article (direct articles first, then
/// part-grouped articles) with title, clauses and sub-clauses in document order.
#[derive(Debug, Clone, Copy)]
pub enum DocNode<'a> {
    Preamble(&'a str),
    Chapter(&'a Chapter),
    Article {
        chapter: &'a Chapter,
        part: Option<&'a Part>,
        article: &'a Article,
    },
    Clause {
        chapter: &'a Chapter,
        part: Option<&'a Part>,
        article: &'a Article,
        clause: &'a Clause,
    },
    SubClause {
        chapter: &'a Chapter,
        part: Option<&'a Part>,
        article: &'a Article,
        clause: &'a Clause,
        sub_clause: &'a SubClause,
    },
}

impl Document {
    /// Visit every node in document order. Search and the completion
    /// estimator both build on this single traversal.
    pub fn walk<'a, F: FnMut(DocNode<'a>)>(&'a self, visit: &mut F) {
        visit(DocNode::Preamble(&self.preamble));
        for chapter in &self.chapters {
            visit(DocNode::Chapter(chapter));
            for article in &chapter.articles {
                Self::walk_article(chapter, None, article, visit);
            }
            for part in &chapter.parts {
                for article in &part.articles {
                    Self::walk_article(chapter, Some(part), article, visit);
                }
            }
        }
    }

    fn walk_article<'a, F: FnMut(DocNode<'a>)>(
        chapter: &'a Chapter,
        part: Option<&'a Part>,
        article: &'a Article,
        visit: &mut F,
    ) {
        visit(DocNode::Article { chapter, part, article });
        for clause in &article.clauses {
            visit(DocNode::Clause { chapter, part, article, clause });
            for sub_clause in &clause.sub_clauses {
                Self::walk_sub_clause(chapter, part, article, clause, sub_clause, visit);
            }
        }
    }

    fn walk_sub_clause<'a, F: FnMut(DocNode<'a>)>(
        chapter: &'a Chapter,
        part: Option<&'a Part>,
        article: &'a Article,
        clause: &'a Clause,
        sub_clause: &'a SubClause,
        visit: &mut F,
    ) {
        visit(DocNode::SubClause { chapter, part, article, clause, sub_clause });
        for nested in &sub_clause.nested_sub_clauses {
            Self::walk_sub_clause(chapter, part, article, clause, nested, visit);
        }
    }

    /// Find a chapter by number
    pub fn chapter(&self, number: u32) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.chapter_number == number)
    }

    /// Find an article by chapter and article number
    pub fn article(&self, chapter_number: u32, article_number: u32) -> Option<&Article> {
        self.chapter(chapter_number)?
            .all_articles()
            .find(|a| a.article_number == article_number)
    }

    /// Total word count across the title, preamble and every chapter
    pub fn word_count(&self) -> usize {
        TextUtils::word_count(&self.title)
            + TextUtils::word_count(&self.preamble)
            + self.chapters.iter().map(Chapter::word_count).sum::<usize>()
    }
}

impl Chapter {
    /// Iterate every article in the chapter, direct articles before
    /// part-grouped ones, preserving document order.
    pub fn all_articles(&self) -> impl Iterator<Item = &Article> {
        self.articles
            .iter()
            .chain(self.parts.iter().flat_map(|p| p.articles.iter()))
    }

    /// Total word count across the chapter title and all contained articles
    pub fn word_count(&self) -> usize {
        TextUtils::word_count(&self.chapter_title)
            + self.all_articles().map(Article::word_count).sum::<usize>()
    }
}

impl Article {
    /// Total word count across the article title, clause contents and
    /// sub-clause contents (nested sub-items included)
    pub fn word_count(&self) -> usize {
        TextUtils::word_count(&self.article_title)
            + self.clauses.iter().map(Clause::word_count).sum::<usize>()
    }
}

impl Clause {
    fn word_count(&self) -> usize {
        TextUtils::word_count(&self.content)
            + self.sub_clauses.iter().map(SubClause::word_count).sum::<usize>()
    }
}

impl SubClause {
    fn word_count(&self) -> usize {
        TextUtils::word_count(&self.content)
            + self
                .nested_sub_clauses
                .iter()
                .map(SubClause::word_count)
                .sum::<usize>()
    }
}

/// Loads the immutable document from its JSON source file.
///
/// The store is consulted on every cache miss and on `reload()`. Load
/// failures are fatal (`SourceUnavailable`), never masked as cache misses.
pub struct DocumentStore {
    file_path: PathBuf,
}

impl DocumentStore {
    /// Create a store reading from the given source file
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    /// Path of the source file
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Load and validate the document from disk
    pub async fn load(&self) -> Result<Document> {
        let raw = tokio::fs::read_to_string(&self.file_path)
            .await
            .map_err(|e| ServiceError::SourceUnavailable {
                path: self.file_path.to_string_lossy().to_string(),
                details: e.to_string(),
            })?;

        let document: Document =
            serde_json::from_str(&raw).map_err(|e| ServiceError::SourceUnavailable {
                path: self.file_path.to_string_lossy().to_string(),
                details: format!("malformed document JSON: {}", e),
            })?;

        Self::validate(&document).map_err(|details| ServiceError::SourceUnavailable {
            path: self.file_path.to_string_lossy().to_string(),
            details,
        })?;

        tracing::info!(
            chapters = document.chapters.len(),
            "Document loaded from {:?}",
            self.file_path
        );
        Ok(document)
    }

    fn validate(document: &Document) -> std::result::Result<(), String> {
        if document.chapters.is_empty() {
            return Err("document contains no chapters".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for chapter in &document.chapters {
            if chapter.chapter_number == 0 {
                return Err("chapter numbers must be positive".to_string());
            }
            if !seen.insert(chapter.chapter_number) {
                return Err(format!("duplicate chapter number {}", chapter.chapter_number));
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::sample_document;
    use super::*;

    #[test]
    fn test_sub_clause_id_aliases() {
        let doc = sample_document();
        let clause = &doc.chapters[0].articles[0].clauses[0];
        assert_eq!(clause.sub_clauses[0].sub_clause_id, "a");
        // `sub_clause_letter` alias
        assert_eq!(clause.sub_clauses[1].sub_clause_id, "b");
        // nested `sub_clause_number` alias
        assert_eq!(clause.sub_clauses[2].nested_sub_clauses[0].sub_clause_id, "i");
    }

    #[test]
    fn test_lookups_span_parts() {
        let doc = sample_document();
        assert_eq!(doc.chapter(2).unwrap().chapter_title, "The Republic");
        assert!(doc.chapter(999).is_none());
        // Article 19 lives inside a part grouping
        let article = doc.article(4, 19).unwrap();
        assert_eq!(article.article_title, "Rights and fundamental freedoms");
        assert!(doc.article(2, 19).is_none());
    }

    #[test]
    fn test_walk_visits_nested_sub_clauses_in_order() {
        let doc = sample_document();
        let mut sub_ids = Vec::new();
        doc.walk(&mut |node| {
            if let DocNode::SubClause { sub_clause, .. } = node {
                sub_ids.push(sub_clause.sub_clause_id.clone());
            }
        });
        assert_eq!(sub_ids, vec!["a", "b", "c", "i"]);
    }

    #[test]
    fn test_walk_order_preamble_first() {
        let doc = sample_document();
        let mut kinds = Vec::new();
        doc.walk(&mut |node| {
            kinds.push(match node {
                DocNode::Preamble(_) => "preamble",
                DocNode::Chapter(_) => "chapter",
                DocNode::Article { .. } => "article",
                DocNode::Clause { .. } => "clause",
                DocNode::SubClause { .. } => "sub_clause",
            });
        });
        assert_eq!(kinds[0], "preamble");
        assert_eq!(kinds[1], "chapter");
        assert_eq!(kinds[2], "article");
    }

    #[test]
    fn test_word_counts_recurse() {
        let doc = sample_document();
        let article = doc.article(2, 9).unwrap();
        // title(5) + clause1(7) + subs(3+3+5+3) + clause2(6)
        assert_eq!(article.word_count(), 32);
        let chapter = doc.chapter(2).unwrap();
        assert_eq!(chapter.word_count(), article.word_count() + 2);
    }

    #[tokio::test]
    async fn test_store_missing_file_is_source_unavailable() {
        let store = DocumentStore::new("/nonexistent/constitution.json");
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, ServiceError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_store_rejects_malformed_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("constitution.json");
        std::fs::write(&path, r#"{"chapters": "not a list"}"#).unwrap();
        let err = DocumentStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, ServiceError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_store_rejects_duplicate_chapter_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("constitution.json");
        std::fs::write(
            &path,
            r#"{"preamble": "", "chapters": [
                {"chapter_number": 1, "chapter_title": "One", "articles": [], "parts": []},
                {"chapter_number": 1, "chapter_title": "One again", "articles": [], "parts": []}
            ]}"#,
        )
        .unwrap();
        let err = DocumentStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, ServiceError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_store_loads_valid_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("constitution.json");
        std::fs::write(&path, super::test_fixtures::sample_json()).unwrap();
        let doc = DocumentStore::new(&path).load().await.unwrap();
        assert_eq!(doc.chapters.len(), 2);
    }
}
