//! Query Metrics Port
//!
//! Defines the observability collaborator the query engine reports to.

use std::time::Duration;

/// Sink for query engine counters.
///
/// This is an outbound port: the engine calls it, adapters decide whether
/// the numbers end up in a Prometheus exposition, a log, or nowhere.
pub trait QueryMetrics: Send + Sync {
    /// A network call is about to be made.
    fn query_started(&self, name: &str, api: &str);

    /// A network call finished, successfully or not.
    fn query_finished(&self, name: &str, api: &str, elapsed: Duration);

    /// A network call failed with a classified, non-cancellation error.
    fn query_failed(&self, name: &str, api: &str, reason: &str);

    /// A query was answered from the cache.
    fn cache_hit(&self, name: &str, api: &str);
}
