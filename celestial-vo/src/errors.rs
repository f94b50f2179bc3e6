//! Error types for registry, cone search and TAP operations.
//!
//! | Variant | Raised by | Recoverable? |
//! |---------|-----------|--------------|
//! | [`Http`](VoError::Http) | transport failure (DNS, TLS, timeout, reset) | Yes |
//! | [`Status`](VoError::Status) | non-success HTTP status, with the service's error text when given | Yes |
//! | [`VoTable`](VoError::VoTable) | malformed VOTable document | No |
//! | [`Query`](VoError::Query) | service rejected the query (`QUERY_STATUS=ERROR`) | No |
//! | [`Truncated`](VoError::Truncated) | a listing that must be complete hit the row limit | No |
//! | [`JobFailed`](VoError::JobFailed) | async job ended in `ERROR` or `ABORTED` | No |
//! | [`Timeout`](VoError::Timeout) | async job did not finish within the wait budget | Yes |
//! | [`InvalidArgument`](VoError::InvalidArgument) | caller input (coordinates, identifiers) | No |
//! | [`InvalidSchema`](VoError::InvalidSchema) | duplicate column names | No |
//!
//! Remote failures inside a batch are wrapped in [`TargetFailure`] so the
//! offending service and table travel with the error.

use thiserror::Error;

pub type VoResult<T> = Result<T, VoError>;

#[derive(Debug, Error)]
pub enum VoError {
    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("HTTP status {status} from {url}{}", detail(.message.as_deref()))]
    Status {
        url: String,
        status: u16,
        message: Option<String>,
    },

    #[error("VOTable error: {message}")]
    VoTable { message: String },

    #[error("Query rejected by service: {message}")]
    Query { message: String },

    #[error("Truncated result: {message}")]
    Truncated { message: String },

    #[error("Job {job_url} ended in phase {phase}: {message}")]
    JobFailed {
        job_url: String,
        phase: String,
        message: String,
    },

    #[error("Job {job_url} did not complete within {waited_secs} s")]
    Timeout { job_url: String, waited_secs: u64 },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Invalid schema for {table}: {message}")]
    InvalidSchema { table: String, message: String },

    #[error("Unsupported: {message}")]
    Unsupported { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VoError {
    pub fn http(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Http {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn votable(message: impl Into<String>) -> Self {
        Self::VoTable {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for failures where retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

fn detail(message: Option<&str>) -> String {
    message
        .map(|m| format!(": {}", m))
        .unwrap_or_default()
}

/// A remote failure attributed to one service/table in a batch.
#[derive(Debug, Error)]
#[error("{service_id} {table}: {error}")]
pub struct TargetFailure {
    pub service_id: String,
    pub table: String,
    #[source]
    pub error: VoError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_status_error_display() {
        let error = VoError::Status {
            url: "http://example.org/tap/sync".to_string(),
            status: 503,
            message: None,
        };
        assert_eq!(
            error.to_string(),
            "HTTP status 503 from http://example.org/tap/sync"
        );
    }

    #[test]
    fn test_status_error_display_with_service_message() {
        let error = VoError::Status {
            url: "http://example.org/tap/sync".to_string(),
            status: 400,
            message: Some("unknown table cat.nope".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "HTTP status 400 from http://example.org/tap/sync: unknown table cat.nope"
        );
    }

    #[test]
    fn test_query_error_display() {
        let error = VoError::query("Column 'raj2000' not found");
        assert_eq!(
            error.to_string(),
            "Query rejected by service: Column 'raj2000' not found"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(VoError::http("http://x", "connection reset").is_transient());
        assert!(VoError::Status {
            url: "http://x".into(),
            status: 502,
            message: None,
        }
        .is_transient());
        assert!(!VoError::Status {
            url: "http://x".into(),
            status: 404,
            message: None,
        }
        .is_transient());
        assert!(!VoError::query("syntax error").is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = Error::new(ErrorKind::NotFound, "no such file");
        let error: VoError = io_error.into();
        assert!(matches!(error, VoError::Io(_)));
        assert!(error.to_string().contains("no such file"));
    }

    #[test]
    fn test_target_failure_carries_identifiers() {
        let failure = TargetFailure {
            service_id: "ivo://example/tap".to_string(),
            table: "cat.obs".to_string(),
            error: VoError::http("http://example.org/tap/sync", "timed out"),
        };
        let message = failure.to_string();
        assert!(message.starts_with("ivo://example/tap cat.obs:"));
        assert!(message.contains("timed out"));
        assert!(std::error::Error::source(&failure).is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VoError>();
        assert_send_sync::<TargetFailure>();
    }
}
