mod query_endpoint;
mod query_metrics;

pub use query_endpoint::QueryEndpoint;
pub use query_metrics::QueryMetrics;
