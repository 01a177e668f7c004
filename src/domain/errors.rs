//! Query Errors
//!
//! The error record every failed query resolves to, and the failover
//! wrapper that attaches the failing endpoint's identity.

use crate::domain::value_objects::ErrorType;

/// A classified query failure.
///
/// The `Display` form is the ready-to-show reason string.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    /// Error envelope returned by the backend, or synthesized from an
    /// unusable response.
    #[error("{error_type}: {message}")]
    Api {
        status: String,
        error_type: ErrorType,
        message: String,
    },
    #[error("connection refused")]
    ConnectionRefused,
    /// Dial, DNS or other transport failure.
    #[error("connection error: {0}")]
    Connection(String),
    /// The request did not complete within the endpoint timeout.
    #[error("connection timeout")]
    Timeout,
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    /// The endpoint is stopped or was never started.
    #[error("query queue is closed")]
    Closed,
    /// A worker failed without producing a reply.
    #[error("query worker failed: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn api(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self::Api {
            status: "error".to_string(),
            error_type,
            message: message.into(),
        }
    }

    pub fn bad_response(message: impl Into<String>) -> Self {
        Self::api(ErrorType::BadResponse, message)
    }

    /// The `status` field of the record.
    pub fn status(&self) -> &str {
        match self {
            Self::Api { status, .. } => status,
            _ => "error",
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::Api { error_type, .. } => *error_type,
            Self::Timeout => ErrorType::Timeout,
            Self::Canceled | Self::DeadlineExceeded => ErrorType::Canceled,
            Self::ConnectionRefused | Self::Connection(_) | Self::Closed | Self::Internal(_) => {
                ErrorType::Unknown
            }
        }
    }

    /// The caller gave up. Never an endpoint failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }

    /// The endpoint could not serve the query; another failover member may.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Api { error_type, .. } => *error_type == ErrorType::Server,
            Self::ConnectionRefused | Self::Connection(_) | Self::Timeout | Self::Closed => true,
            Self::Canceled | Self::DeadlineExceeded | Self::Internal(_) => false,
        }
    }

    /// The query itself is wrong; retrying elsewhere will not help.
    pub fn is_semantic(&self) -> bool {
        self.error_type().is_semantic()
    }

    /// Short, low-cardinality label for error counters.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Api { error_type, .. } => error_type.as_str(),
            Self::ConnectionRefused => "connection_refused",
            Self::Connection(_) => "connection_error",
            Self::Timeout => "connection_timeout",
            Self::Canceled | Self::DeadlineExceeded => "canceled",
            Self::Closed => "closed",
            Self::Internal(_) => "internal",
        }
    }
}

/// Error returned by a failover group: the last member's failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{source}")]
pub struct FailoverError {
    /// Logical name of the failing endpoint.
    pub name: String,
    /// Display URI of the failing endpoint.
    pub uri: String,
    pub source: QueryError,
}

impl FailoverError {
    pub fn new(name: impl Into<String>, uri: impl Into<String>, source: QueryError) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            source,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn query_error(&self) -> &QueryError {
        &self.source
    }

    pub fn is_unavailable(&self) -> bool {
        self.source.is_unavailable()
    }
}
