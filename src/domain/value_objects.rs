//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Deserializer, Serialize};

/// Classification of a failed query.
///
/// The string forms match the `errorType` values of the Prometheus HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorType {
    /// Malformed query or parameters.
    BadData,
    /// Query evaluation timed out on the backend.
    Timeout,
    /// Query was canceled.
    Canceled,
    /// Backend failed to evaluate the query.
    Execution,
    /// Response was malformed or had an unexpected shape.
    BadResponse,
    /// 5xx class failure.
    Server,
    /// 4xx class failure.
    Client,
    /// Anything we cannot classify.
    Unknown,
}

impl ErrorType {
    /// Parse an `errorType` value, falling back to [`ErrorType::Unknown`].
    pub fn from_wire(s: &str) -> Self {
        match s {
            "bad_data" => Self::BadData,
            "timeout" => Self::Timeout,
            "canceled" => Self::Canceled,
            "execution" => Self::Execution,
            "bad_response" => Self::BadResponse,
            "server_error" => Self::Server,
            "client_error" => Self::Client,
            _ => Self::Unknown,
        }
    }

    /// Convert to the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadData => "bad_data",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Execution => "execution",
            Self::BadResponse => "bad_response",
            Self::Server => "server_error",
            Self::Client => "client_error",
            Self::Unknown => "unknown",
        }
    }

    /// Errors a retry cannot fix: the query itself is wrong.
    pub fn is_semantic(&self) -> bool {
        matches!(self, Self::BadData | Self::Client)
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric type as reported by the metadata API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    GaugeHistogram,
    Summary,
    Info,
    StateSet,
    Unknown,
}

impl MetricType {
    pub fn from_str(s: &str) -> Self {
        match s {
            "counter" => Self::Counter,
            "gauge" => Self::Gauge,
            "histogram" => Self::Histogram,
            "gaugehistogram" => Self::GaugeHistogram,
            "summary" => Self::Summary,
            "info" => Self::Info,
            "stateset" => Self::StateSet,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::GaugeHistogram => "gaugehistogram",
            Self::Summary => "summary",
            Self::Info => "info",
            Self::StateSet => "stateset",
            Self::Unknown => "unknown",
        }
    }
}

impl Default for MetricType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl<'de> Deserialize<'de> for MetricType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_str(&s))
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
