//! Error types shared by the query/write layer
//!
//! Every backend, the orchestrator and both front-ends report failures
//! through [`MetricsError`]. The CLI prints the message and exits non-zero;
//! the agent server turns it into an error-flagged tool result.

use crate::stats::StatsError;
use thiserror::Error;

/// Errors surfaced by query and write operations
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Bad or missing arguments
    #[error("{0}")]
    InvalidInput(String),

    /// A remote call was attempted without a bearer token
    #[error("missing token: set --token, TALLY_TOKEN, or token in the config source")]
    AuthRequired,

    /// The operation is not valid for the active driver
    #[error("{0}")]
    UnsupportedForDriver(String),

    /// Nothing recorded for the requested path
    #[error("no data available for path {path} in the selected timeframe")]
    NoData { path: String },

    /// The value path is not present in the fetched series
    #[error("unknown path: {0}")]
    UnknownPath(String),

    /// Reshaping produced no path that exists in the series
    #[error("no matching data found for path {path} in the selected timeframe")]
    NoMatchingData { path: String },

    /// Remote API answered with a non-2xx status
    #[error("{}", api_message(.status, .body))]
    Api { status: u16, body: String },

    /// Local storage failure, possibly with setup guidance appended
    #[error("{0}")]
    Storage(String),

    /// Network-level failure or timeout
    #[error("request failed: {0}")]
    Transport(String),

    /// Malformed response body or payload
    #[error("decode response: {0}")]
    Decode(String),

    /// Unrecognized driver or malformed connection parameters
    #[error("{0}")]
    Config(String),
}

fn api_message(status: &u16, body: &str) -> String {
    if body.is_empty() {
        format!("api request failed with status {}", status)
    } else {
        format!("api request failed with status {}: {}", status, body)
    }
}

impl MetricsError {
    pub fn invalid(message: impl Into<String>) -> Self {
        MetricsError::InvalidInput(message.into())
    }
}

impl From<reqwest::Error> for MetricsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MetricsError::Decode(err.to_string())
        } else {
            MetricsError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for MetricsError {
    fn from(err: serde_json::Error) -> Self {
        MetricsError::Decode(err.to_string())
    }
}

impl From<StatsError> for MetricsError {
    fn from(err: StatsError) -> Self {
        match err {
            StatsError::Config(message) => MetricsError::Config(message),
            StatsError::InvalidGranularity(_) | StatsError::Range(_) => {
                MetricsError::InvalidInput(err.to_string())
            }
            other => MetricsError::Storage(other.to_string()),
        }
    }
}

/// Result type alias for query and write operations
pub type MetricsResult<T> = Result<T, MetricsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MetricsError::NoData {
            path: "count".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "no data available for path count in the selected timeframe"
        );

        let err = MetricsError::UnknownPath("cuont".to_string());
        assert_eq!(err.to_string(), "unknown path: cuont");
    }

    #[test]
    fn test_api_error_display() {
        let err = MetricsError::Api {
            status: 404,
            body: String::new(),
        };
        assert_eq!(err.to_string(), "api request failed with status 404");

        let err = MetricsError::Api {
            status: 422,
            body: "{\"error\":\"bad key\"}".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "api request failed with status 422: {\"error\":\"bad key\"}"
        );
    }

    #[test]
    fn test_stats_error_conversion() {
        let err: MetricsError = StatsError::Config("invalid week-start: x".to_string()).into();
        assert!(matches!(err, MetricsError::Config(_)));

        let err: MetricsError = StatsError::InvalidGranularity("1x".to_string()).into();
        assert!(matches!(err, MetricsError::InvalidInput(_)));

        let err: MetricsError = StatsError::Serialization("bad".to_string()).into();
        assert_eq!(err.to_string(), "Serialization error: bad");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: MetricsError = json_err.into();
        assert!(matches!(err, MetricsError::Decode(_)));
    }
}
