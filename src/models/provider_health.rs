use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    #[default]
    Closed,
    /// Failure mode - calls are rejected until the timeout elapses
    Open,
    /// Testing recovery - trial traffic is allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            _ => Err(format!("Invalid circuit state: {s}")),
        }
    }
}

/// Health and circuit state of one provider, stored as a hash in the shared
/// counter store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProviderHealthRecord {
    pub circuit_state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub average_response_time_ms: f64,
}

impl ProviderHealthRecord {
    pub const CIRCUIT_STATE: &'static str = "circuit_state";
    pub const FAILURE_COUNT: &'static str = "failure_count";
    pub const SUCCESS_COUNT: &'static str = "success_count";
    pub const OPENED_AT: &'static str = "opened_at";
    pub const LAST_SUCCESS: &'static str = "last_success";
    pub const LAST_FAILURE: &'static str = "last_failure";
    pub const LAST_ERROR: &'static str = "last_error";
    pub const TOTAL_REQUESTS: &'static str = "total_requests";
    pub const SUCCESSFUL_REQUESTS: &'static str = "successful_requests";
    pub const AVERAGE_RESPONSE_TIME_MS: &'static str = "average_response_time_ms";

    /// Rebuild a record from stored hash fields. Missing or unparsable fields
    /// fall back to their defaults, so an expired record reads as `closed`.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        fn parse<T: std::str::FromStr + Default>(fields: &HashMap<String, String>, key: &str) -> T {
            fields
                .get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default()
        }

        fn timestamp(fields: &HashMap<String, String>, key: &str) -> Option<DateTime<Utc>> {
            fields
                .get(key)
                .filter(|v| !v.is_empty())
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|dt| dt.with_timezone(&Utc))
        }

        Self {
            circuit_state: parse(fields, Self::CIRCUIT_STATE),
            failure_count: parse(fields, Self::FAILURE_COUNT),
            success_count: parse(fields, Self::SUCCESS_COUNT),
            opened_at: timestamp(fields, Self::OPENED_AT),
            last_success: timestamp(fields, Self::LAST_SUCCESS),
            last_failure: timestamp(fields, Self::LAST_FAILURE),
            last_error: fields
                .get(Self::LAST_ERROR)
                .filter(|v| !v.is_empty())
                .cloned(),
            total_requests: parse(fields, Self::TOTAL_REQUESTS),
            successful_requests: parse(fields, Self::SUCCESSFUL_REQUESTS),
            average_response_time_ms: parse(fields, Self::AVERAGE_RESPONSE_TIME_MS),
        }
    }

    /// Fields describing the circuit; counters are written with atomic increments
    pub fn circuit_fields(&self) -> Vec<(String, String)> {
        vec![
            (Self::CIRCUIT_STATE.to_string(), self.circuit_state.to_string()),
            (Self::FAILURE_COUNT.to_string(), self.failure_count.to_string()),
            (Self::SUCCESS_COUNT.to_string(), self.success_count.to_string()),
            (Self::OPENED_AT.to_string(), format_timestamp(self.opened_at)),
        ]
    }

    /// Share of successful requests, `None` before the first request
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_requests == 0 {
            None
        } else {
            Some(self.successful_requests as f64 / self.total_requests as f64)
        }
    }
}

pub(crate) fn format_timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|dt| dt.to_rfc3339()).unwrap_or_default()
}
