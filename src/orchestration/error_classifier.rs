//! # Provider Error Classification
//!
//! Maps free-form error text reported by provider adapters onto a small
//! taxonomy used for logging and alerting. Classification never drives retry
//! or failover decisions; those are owned by the job pipeline.
//!
//! ## Usage
//!
//! ```rust
//! use notify_gateway::orchestration::error_classifier::ErrorKind;
//!
//! assert_eq!(ErrorKind::classify("HTTP 429 Too Many Requests"), ErrorKind::RateLimit);
//! assert_eq!(ErrorKind::classify("connection reset by peer"), ErrorKind::Network);
//! assert_eq!(ErrorKind::classify("something odd"), ErrorKind::Unknown);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a provider-side failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts and connection errors
    Network,

    /// Credential rejection
    Auth,

    /// Provider-side throttling
    RateLimit,

    /// Malformed request
    Validation,

    #[default]
    Unknown,
}

/// Patterns checked in order; the first matching category wins
const PATTERNS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::RateLimit,
        &["rate limit", "rate-limit", "429", "too many requests", "throttl", "quota"],
    ),
    (
        ErrorKind::Auth,
        &["unauthorized", "401", "403", "forbidden", "credential", "api key", "token"],
    ),
    (
        ErrorKind::Network,
        &["timeout", "timed out", "connection", "dns", "unreachable", "reset"],
    ),
    (
        ErrorKind::Validation,
        &["invalid", "malformed", "400", "422", "validation", "not a valid"],
    ),
];

impl ErrorKind {
    /// Classify error text by case-insensitive pattern matching
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        PATTERNS
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
            .map(|(kind, _)| *kind)
            .unwrap_or(Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
