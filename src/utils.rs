//! # Utilities Module
//!
//! ## Purpose
//! Common utility functions used throughout the constitution service for
//! text measurement, request hashing, and performance timing.
//!
//! ## Input/Output Specification
//! - **Input**: Text fragments, request signatures, durations
//! - **Output**: Word counts, stable hashes, elapsed timings

use sha2::{Digest, Sha256};
use std::time::Instant;

/// Performance timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Start a new timer with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("Timer '{}' completed in {}ms", self.name, elapsed);
        elapsed
    }
}

/// Text processing utilities
pub struct TextUtils;

impl TextUtils {
    /// Count whitespace-delimited non-empty tokens
    pub fn word_count(text: &str) -> usize {
        text.split_whitespace().count()
    }

    /// Truncate text to a character limit with ellipsis.
    /// Respects char boundaries so multi-byte text never panics.
    pub fn truncate(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }

    /// Stable hex digest of a request signature, used for cache keys.
    pub fn signature_hash(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count() {
        assert_eq!(TextUtils::word_count(""), 0);
        assert_eq!(TextUtils::word_count("   "), 0);
        assert_eq!(TextUtils::word_count("the national flag;"), 3);
        assert_eq!(TextUtils::word_count("  spaced   out\ttokens\n"), 3);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(TextUtils::truncate("short", 20), "short");
        assert_eq!(TextUtils::truncate("this is a very long text", 10), "this is...");
    }

    #[test]
    fn test_truncate_multibyte() {
        // Must not panic on a non-ASCII boundary
        let truncated = TextUtils::truncate("sheria ya Kenya — katiba yetu ya kudumu", 12);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_signature_hash_stable_and_separated() {
        let a = TextUtils::signature_hash(&["rights", "1", "10"]);
        let b = TextUtils::signature_hash(&["rights", "1", "10"]);
        assert_eq!(a, b);
        // Field separator prevents ["ab","c"] colliding with ["a","bc"]
        assert_ne!(
            TextUtils::signature_hash(&["ab", "c"]),
            TextUtils::signature_hash(&["a", "bc"])
        );
    }
}
