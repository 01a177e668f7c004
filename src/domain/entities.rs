//! Domain Entities - Query results
//!
//! Decoded responses returned to callers of the query engine.
//! They carry no transport details beyond the display URI of the
//! endpoint that produced them.

use crate::domain::errors::QueryError;
use crate::domain::value_objects::MetricType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label set of a series.
pub type Labels = BTreeMap<String, String>;

/// One sample of an instant vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub metric: Labels,
    /// Unix timestamp in seconds
    pub timestamp: f64,
    pub value: f64,
}

impl Sample {
    /// Value of the `__name__` label, if set.
    pub fn name(&self) -> Option<&str> {
        self.metric.get("__name__").map(String::as_str)
    }
}

/// A single (timestamp, value) point of a range series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplePair {
    pub timestamp: f64,
    pub value: f64,
}

/// One series of a range vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeSeries {
    pub metric: Labels,
    pub values: Vec<SamplePair>,
}

/// Metadata entry for a metric.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricMetadata {
    #[serde(rename = "type", default)]
    pub metric_type: MetricType,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub unit: String,
}

/// Query execution timings reported by the backend, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryTimings {
    pub eval_total_time: f64,
    pub result_sort_time: f64,
    pub query_preparation_time: f64,
    pub inner_eval_time: f64,
    pub exec_queue_time: f64,
    pub exec_total_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuerySamples {
    pub total_queryable_samples: i64,
    pub peak_samples: i64,
}

/// Execution statistics from `data.stats`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryStats {
    pub timings: QueryTimings,
    pub samples: QuerySamples,
}

/// Decoded body of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Vector(Vec<Sample>),
    Matrix(Vec<RangeSeries>),
    Metadata(Vec<MetricMetadata>),
}

impl Payload {
    fn kind(&self) -> &'static str {
        match self {
            Payload::Vector(_) => "vector",
            Payload::Matrix(_) => "matrix",
            Payload::Metadata(_) => "metadata",
        }
    }
}

/// What an endpoint produces for any query, and what the cache stores.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    pub uri: String,
    pub payload: Payload,
    pub stats: Option<QueryStats>,
}

/// Result of an instant query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub uri: String,
    pub series: Vec<Sample>,
    pub stats: Option<QueryStats>,
}

/// Result of a range query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeQueryResult {
    pub uri: String,
    pub series: Vec<RangeSeries>,
    pub stats: Option<QueryStats>,
}

/// Result of a metadata lookup for one metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataResult {
    pub uri: String,
    pub metadata: Vec<MetricMetadata>,
}

impl MetadataResult {
    pub fn has_type(&self, metric_type: MetricType) -> bool {
        self.metadata.iter().any(|m| m.metric_type == metric_type)
    }
}

fn unexpected(expected: &str, got: &Payload) -> QueryError {
    QueryError::bad_response(format!(
        "unexpected payload, expected {}, got {}",
        expected,
        got.kind()
    ))
}

impl TryFrom<QueryOutput> for QueryResult {
    type Error = QueryError;

    fn try_from(out: QueryOutput) -> Result<Self, Self::Error> {
        match out.payload {
            Payload::Vector(series) => Ok(Self {
                uri: out.uri,
                series,
                stats: out.stats,
            }),
            other => Err(unexpected("vector", &other)),
        }
    }
}

impl TryFrom<QueryOutput> for RangeQueryResult {
    type Error = QueryError;

    fn try_from(out: QueryOutput) -> Result<Self, Self::Error> {
        match out.payload {
            Payload::Matrix(series) => Ok(Self {
                uri: out.uri,
                series,
                stats: out.stats,
            }),
            other => Err(unexpected("matrix", &other)),
        }
    }
}

impl TryFrom<QueryOutput> for MetadataResult {
    type Error = QueryError;

    fn try_from(out: QueryOutput) -> Result<Self, Self::Error> {
        match out.payload {
            Payload::Metadata(metadata) => Ok(Self {
                uri: out.uri,
                metadata,
            }),
            other => Err(unexpected("metadata", &other)),
        }
    }
}
