//! Core types shared across the enrichment pipeline
//!
//! - [`ErrorCode`]: the stable failure taxonomy recorded in audit logs
//! - [`EnrichmentOutcome`]: the structured result every enrichment call returns

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Stable failure codes for enrichment attempts
///
/// Serialized in SCREAMING_SNAKE_CASE; these strings are persisted in
/// `enrichment_logs.error_code` and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Content source has no page for the city
    WikipediaNotFound,
    /// Content source throttled the request
    RateLimited,
    /// Upstream or transport-level timeout
    Timeout,
    /// Our own hard timeout around the fetch fired
    FirecrawlTimeout,
    /// Credentials rejected by the content source
    AuthFailed,
    /// Connection-level failure
    NetworkError,
    /// Catch-all
    EnrichmentError,
    /// Another invocation holds the city's enrichment lock
    LockContended,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::WikipediaNotFound,
        ErrorCode::RateLimited,
        ErrorCode::FirecrawlTimeout,
        ErrorCode::Timeout,
        ErrorCode::AuthFailed,
        ErrorCode::NetworkError,
        ErrorCode::EnrichmentError,
        ErrorCode::LockContended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::WikipediaNotFound => "WIKIPEDIA_NOT_FOUND",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::FirecrawlTimeout => "FIRECRAWL_TIMEOUT",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::EnrichmentError => "ENRICHMENT_ERROR",
            ErrorCode::LockContended => "LOCK_CONTENDED",
        }
    }

    /// Parse a persisted code string
    pub fn parse(value: &str) -> Option<ErrorCode> {
        Self::ALL.into_iter().find(|code| code.as_str() == value)
    }

    /// Classify an opaque failure message
    ///
    /// Case-insensitive substring rules, first match wins:
    /// 1. "404" / "not found" → `WIKIPEDIA_NOT_FOUND`
    /// 2. "429" / "rate limit" → `RATE_LIMITED`
    /// 3. "timeout" / "timed out" → `TIMEOUT`
    /// 4. "401" / "403" / "unauthorized" / "forbidden" / "invalid api key" → `AUTH_FAILED`
    /// 5. "network" / "connection" → `NETWORK_ERROR`
    /// 6. otherwise → `ENRICHMENT_ERROR`
    pub fn classify(message: &str) -> ErrorCode {
        const RULES: &[(&[&str], ErrorCode)] = &[
            (&["404", "not found"], ErrorCode::WikipediaNotFound),
            (&["429", "rate limit"], ErrorCode::RateLimited),
            (&["timeout", "timed out"], ErrorCode::Timeout),
            (
                &["401", "403", "unauthorized", "forbidden", "invalid api key"],
                ErrorCode::AuthFailed,
            ),
            (&["network", "connection"], ErrorCode::NetworkError),
        ];

        let lowered = message.to_lowercase();
        RULES
            .iter()
            .find(|(needles, _)| needles.iter().any(|needle| lowered.contains(needle)))
            .map(|(_, code)| *code)
            .unwrap_or(ErrorCode::EnrichmentError)
    }

    /// Find a code name already embedded in a message
    ///
    /// The name must stand alone: `GATEWAY_TIMEOUT` does not contain
    /// `TIMEOUT`. Matching is case-sensitive so that ordinary words such as
    /// "timeout" go through [`ErrorCode::classify`] instead. Leftmost wins.
    pub fn find_in_message(message: &str) -> Option<ErrorCode> {
        EMBEDDED_CODE
            .find(message)
            .and_then(|found| Self::parse(found.as_str()))
    }

    /// Embedded code if present, otherwise [`ErrorCode::classify`]
    pub fn from_message(message: &str) -> ErrorCode {
        Self::find_in_message(message).unwrap_or_else(|| Self::classify(message))
    }

    /// Structural mapping of an HTTP status, when it has one
    pub fn from_status(status: u16) -> Option<ErrorCode> {
        match status {
            404 | 410 => Some(ErrorCode::WikipediaNotFound),
            429 => Some(ErrorCode::RateLimited),
            408 | 504 => Some(ErrorCode::Timeout),
            401 | 403 => Some(ErrorCode::AuthFailed),
            _ => None,
        }
    }
}

/// Any code name as a standalone token; `_` counts as a word character
static EMBEDDED_CODE: Lazy<Regex> = Lazy::new(|| {
    let names: Vec<&str> = ErrorCode::ALL.iter().map(ErrorCode::as_str).collect();
    Regex::new(&format!(r"\b({})\b", names.join("|"))).unwrap()
});

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Enrichment Result
// ============================================================================

/// Result of one `enrich_city` call
///
/// Failures are reported here rather than as `Err` so that an incidental
/// page visit can never fail its request because of enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentOutcome {
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl EnrichmentOutcome {
    pub fn succeeded(duration_ms: u64) -> Self {
        Self {
            success: true,
            duration_ms,
            error: None,
            error_code: None,
        }
    }

    pub fn failed(duration_ms: u64, error: impl Into<String>, error_code: ErrorCode) -> Self {
        Self {
            success: false,
            duration_ms,
            error: Some(error.into()),
            error_code: Some(error_code),
        }
    }

    /// True when the attempt lost the lock race
    pub fn is_contended(&self) -> bool {
        self.error_code == Some(ErrorCode::LockContended)
    }
}
