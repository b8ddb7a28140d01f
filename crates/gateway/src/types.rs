//! Shared value types for the gateway domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. a code vocabulary whose sentinels
//! are pairwise distinct) and participate in classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Return codes
// ---------------------------------------------------------------------------

/// A numeric code in the bus's native return-code vocabulary.
///
/// Backends report raw application codes; the status table maps HTTP
/// statuses onto these codes; the outcome normalizer folds them into the four
/// canonical outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReturnCode(i64);

impl ReturnCode {
    /// "No error" sentinel.
    pub const SUCCESS: Self = Self(0);
    /// Requested entity does not exist.
    pub const NOT_FOUND: Self = Self(6);
    /// Generic service failure reported for every non-soft failure.
    pub const SERVICE_FAILURE: Self = Self(11);
    /// The operation timed out.
    pub const TIMEOUT: Self = Self(13);

    /// Creates a [`ReturnCode`] from a raw integer.
    pub fn new(code: i64) -> Self {
        Self(code)
    }

    /// Returns the underlying integer value.
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------

/// The three sentinel codes the outcome normalizer recognises.
///
/// Every other code maps to a generic failure. The sentinels must be
/// pairwise distinct; [`CodeVocabulary::new`] enforces this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeVocabulary {
    success: ReturnCode,
    timeout: ReturnCode,
    not_found: ReturnCode,
}

impl CodeVocabulary {
    /// Creates a vocabulary, returning `None` if any two sentinels coincide.
    #[must_use]
    pub fn new(success: ReturnCode, timeout: ReturnCode, not_found: ReturnCode) -> Option<Self> {
        if success == timeout || success == not_found || timeout == not_found {
            None
        } else {
            Some(Self {
                success,
                timeout,
                not_found,
            })
        }
    }

    /// Code meaning "no error".
    pub fn success(self) -> ReturnCode {
        self.success
    }

    /// Code meaning "timed out, retry later".
    pub fn timeout(self) -> ReturnCode {
        self.timeout
    }

    /// Code meaning "entity not found".
    pub fn not_found(self) -> ReturnCode {
        self.not_found
    }
}

impl Default for CodeVocabulary {
    fn default() -> Self {
        Self {
            success: ReturnCode::SUCCESS,
            timeout: ReturnCode::TIMEOUT,
            not_found: ReturnCode::NOT_FOUND,
        }
    }
}

// ---------------------------------------------------------------------------
// Content types
// ---------------------------------------------------------------------------

/// MIME type sent with the outbound request body.
///
/// Determined entirely by the request buffer's format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// `application/json`
    Json,
    /// `text/plain`
    Text,
    /// `application/octet-stream`
    OctetStream,
}

impl ContentType {
    /// Returns the header value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Text => "text/plain",
            Self::OctetStream => "application/octet-stream",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Milliseconds between this timestamp and now; zero if it lies in the future.
    pub fn elapsed_ms(self) -> u64 {
        u64::try_from((Utc::now() - self.0).num_milliseconds()).unwrap_or(0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_rejects_colliding_sentinels() {
        assert!(CodeVocabulary::new(ReturnCode::new(0), ReturnCode::new(0), ReturnCode::new(6)).is_none());
        assert!(CodeVocabulary::new(ReturnCode::new(0), ReturnCode::new(13), ReturnCode::new(13)).is_none());
        assert!(CodeVocabulary::new(ReturnCode::new(0), ReturnCode::new(13), ReturnCode::new(4)).is_some());
    }

    #[test]
    fn test_content_type_header_values() {
        assert_eq!(ContentType::Json.as_str(), "application/json");
        assert_eq!(ContentType::Text.as_str(), "text/plain");
        assert_eq!(ContentType::OctetStream.as_str(), "application/octet-stream");
    }

    #[test]
    fn test_elapsed_ms_counts_from_the_timestamp() {
        let earlier = Timestamp(Utc::now() - chrono::Duration::milliseconds(250));
        assert!(earlier.elapsed_ms() >= 250);

        let later = Timestamp(Utc::now() + chrono::Duration::seconds(60));
        assert_eq!(later.elapsed_ms(), 0);
    }
}
