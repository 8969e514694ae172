//! # Error Handling Module
//!
//! ## Purpose
//! Centralized error handling for the constitution service, providing the error
//! kinds every component reports and the propagation policy between them.
//!
//! ## Input/Output Specification
//! - **Input**: Error conditions from cache, storage, document, search and API layers
//! - **Output**: Structured error types with context, mapped to HTTP statuses at the edge
//! - **Error Categories**: Content, Search, Cache, Storage, Configuration
//!
//! ## Propagation Policy
//! - `NotFound` and `InvalidQuery` are caller-facing and must stay distinguishable
//!   from generic failures.
//! - `SourceUnavailable` is caller-facing and fatal for the request: a missing or
//!   malformed document source must never be cached as an empty document.
//! - `CacheUnavailable` is internal only. The cache layer swallows it, logs a
//!   warning, and degrades to a miss/no-op; it never reaches a caller.

use thiserror::Error;

/// Result type used throughout the application
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Error types for the constitution content service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Requested chapter/article/search scope does not exist
    #[error("{resource} '{reference}' not found")]
    NotFound { resource: String, reference: String },

    /// Document source missing or malformed; fatal for the request
    #[error("Document source '{path}' is unavailable: {details}")]
    SourceUnavailable { path: String, details: String },

    /// Malformed query or filter combination
    #[error("Invalid query parameter '{field}': {reason}")]
    InvalidQuery { field: String, reason: String },

    /// Cache backend unreachable; swallowed inside the cache layer
    #[error("Cache backend unavailable: {details}")]
    CacheUnavailable { details: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Durable store errors
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Binary record encoding errors
    #[error("Record serialization error: {0}")]
    Encoding(#[from] bincode::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal system errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ServiceError {
    /// Build a `NotFound` for a named resource
    pub fn not_found(resource: impl Into<String>, reference: impl std::fmt::Display) -> Self {
        ServiceError::NotFound {
            resource: resource.into(),
            reference: reference.to_string(),
        }
    }

    /// Build an `InvalidQuery` for a named field
    pub fn invalid_query(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ServiceError::InvalidQuery {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error kind is part of the caller-facing contract.
    /// Everything else is reported as a generic internal failure.
    pub fn is_caller_facing(&self) -> bool {
        matches!(
            self,
            ServiceError::NotFound { .. }
                | ServiceError::InvalidQuery { .. }
                | ServiceError::SourceUnavailable { .. }
        )
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            ServiceError::NotFound { .. } => "content",
            ServiceError::SourceUnavailable { .. } => "document_source",
            ServiceError::InvalidQuery { .. } => "search",
            ServiceError::CacheUnavailable { .. } => "cache",
            ServiceError::Storage(_) | ServiceError::Encoding(_) => "storage",
            ServiceError::Config { .. } => "configuration",
            ServiceError::Json(_) | ServiceError::Internal { .. } => "generic",
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Internal {
            message: format!("IO error: {}", err),
        }
    }
}

impl From<toml::de::Error> for ServiceError {
    fn from(err: toml::de::Error) -> Self {
        ServiceError::Config {
            message: format!("TOML parse error: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_facing_kinds() {
        assert!(ServiceError::not_found("chapter", 999).is_caller_facing());
        assert!(ServiceError::invalid_query("chapter", "must be numeric").is_caller_facing());
        assert!(ServiceError::SourceUnavailable {
            path: "constitution.json".into(),
            details: "missing".into(),
        }
        .is_caller_facing());
        assert!(!ServiceError::CacheUnavailable {
            details: "connection refused".into(),
        }
        .is_caller_facing());
    }

    #[test]
    fn test_categories() {
        assert_eq!(ServiceError::not_found("article", "2.9").category(), "content");
        assert_eq!(
            ServiceError::CacheUnavailable { details: "x".into() }.category(),
            "cache"
        );
    }
}
