mod dashmap_query_metrics;
mod endpoint_client;
pub mod error_classifier;
pub mod response_decoder;

pub use dashmap_query_metrics::{ApiMetrics, DashMapQueryMetrics};
pub use endpoint_client::{sanitize_uri, EndpointClient, QueryRequest};
