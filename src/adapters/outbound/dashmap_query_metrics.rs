//! DashMap Query Metrics
//!
//! Implements QueryMetrics with DashMap-backed counters and Prometheus
//! text exposition.

use crate::domain::ports::QueryMetrics;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters for one `(endpoint name, api)` pair.
#[derive(Debug, Default)]
pub struct ApiMetrics {
    /// Network calls started
    pub queries_total: AtomicU64,
    /// Network calls in flight
    pub running: AtomicUsize,
    /// Sum of call durations in microseconds
    pub duration_sum_us: AtomicU64,
    /// Queries answered from the cache
    pub cache_hits: AtomicU64,
}

impl ApiMetrics {
    /// Average call duration in milliseconds.
    pub fn avg_duration_ms(&self) -> f64 {
        let count = self.queries_total.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.duration_sum_us.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0
    }
}

type ApiKey = (String, String);

/// Query counters keyed by endpoint name and API path.
pub struct DashMapQueryMetrics {
    apis: DashMap<ApiKey, Arc<ApiMetrics>>,
    /// (name, api, reason) -> failures
    errors: DashMap<(String, String, String), AtomicU64>,
}

impl DashMapQueryMetrics {
    pub fn new() -> Self {
        Self {
            apis: DashMap::new(),
            errors: DashMap::new(),
        }
    }

    fn get_or_create(&self, name: &str, api: &str) -> Arc<ApiMetrics> {
        self.apis
            .entry((name.to_string(), api.to_string()))
            .or_default()
            .clone()
    }

    /// Get counters for one endpoint and API.
    pub fn get(&self, name: &str, api: &str) -> Option<Arc<ApiMetrics>> {
        self.apis
            .get(&(name.to_string(), api.to_string()))
            .map(|e| e.clone())
    }

    pub fn queries_total(&self, name: &str, api: &str) -> u64 {
        self.get(name, api)
            .map(|m| m.queries_total.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn running(&self, name: &str, api: &str) -> usize {
        self.get(name, api)
            .map(|m| m.running.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn cache_hits(&self, name: &str, api: &str) -> u64 {
        self.get(name, api)
            .map(|m| m.cache_hits.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn errors(&self, name: &str, api: &str, reason: &str) -> u64 {
        self.errors
            .get(&(name.to_string(), api.to_string(), reason.to_string()))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Failures across all reasons.
    pub fn errors_total(&self, name: &str) -> u64 {
        self.errors
            .iter()
            .filter(|e| e.key().0 == name)
            .map(|e| e.value().load(Ordering::Relaxed))
            .sum()
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let mut apis: Vec<(ApiKey, Arc<ApiMetrics>)> = self
            .apis
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        apis.sort_by(|a, b| a.0.cmp(&b.0));

        let mut output = String::new();

        output.push_str("# HELP promlint_prometheus_queries_total Total number of queries sent to Prometheus\n");
        output.push_str("# TYPE promlint_prometheus_queries_total counter\n");
        for ((name, api), metrics) in &apis {
            output.push_str(&format!(
                "promlint_prometheus_queries_total{{name=\"{}\",endpoint=\"{}\"}} {}\n",
                name,
                api,
                metrics.queries_total.load(Ordering::Relaxed)
            ));
        }

        output.push_str("# HELP promlint_prometheus_queries_running Number of in-flight Prometheus queries\n");
        output.push_str("# TYPE promlint_prometheus_queries_running gauge\n");
        for ((name, api), metrics) in &apis {
            output.push_str(&format!(
                "promlint_prometheus_queries_running{{name=\"{}\",endpoint=\"{}\"}} {}\n",
                name,
                api,
                metrics.running.load(Ordering::Relaxed)
            ));
        }

        output.push_str("# HELP promlint_prometheus_query_duration_avg_ms Average Prometheus query duration in milliseconds\n");
        output.push_str("# TYPE promlint_prometheus_query_duration_avg_ms gauge\n");
        for ((name, api), metrics) in &apis {
            output.push_str(&format!(
                "promlint_prometheus_query_duration_avg_ms{{name=\"{}\",endpoint=\"{}\"}} {:.2}\n",
                name,
                api,
                metrics.avg_duration_ms()
            ));
        }

        output.push_str("# HELP promlint_prometheus_cache_hits_total Total number of queries answered from cache\n");
        output.push_str("# TYPE promlint_prometheus_cache_hits_total counter\n");
        for ((name, api), metrics) in &apis {
            output.push_str(&format!(
                "promlint_prometheus_cache_hits_total{{name=\"{}\",endpoint=\"{}\"}} {}\n",
                name,
                api,
                metrics.cache_hits.load(Ordering::Relaxed)
            ));
        }

        let mut errors: Vec<((String, String, String), u64)> = self
            .errors
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        errors.sort_by(|a, b| a.0.cmp(&b.0));

        output.push_str("# HELP promlint_prometheus_query_errors_total Total number of failed Prometheus queries\n");
        output.push_str("# TYPE promlint_prometheus_query_errors_total counter\n");
        for ((name, api, reason), count) in &errors {
            output.push_str(&format!(
                "promlint_prometheus_query_errors_total{{name=\"{}\",endpoint=\"{}\",reason=\"{}\"}} {}\n",
                name, api, reason, count
            ));
        }

        output
    }
}

impl Default for DashMapQueryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryMetrics for DashMapQueryMetrics {
    fn query_started(&self, name: &str, api: &str) {
        let metrics = self.get_or_create(name, api);
        metrics.queries_total.fetch_add(1, Ordering::Relaxed);
        metrics.running.fetch_add(1, Ordering::Relaxed);
    }

    fn query_finished(&self, name: &str, api: &str, elapsed: Duration) {
        if let Some(m) = self.get(name, api) {
            let mut current = m.running.load(Ordering::Relaxed);
            while current > 0 {
                match m.running.compare_exchange_weak(
                    current,
                    current - 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(c) => current = c,
                }
            }
            m.duration_sum_us
                .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        }
    }

    fn query_failed(&self, name: &str, api: &str, reason: &str) {
        self.errors
            .entry((name.to_string(), api.to_string(), reason.to_string()))
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    fn cache_hit(&self, name: &str, api: &str) {
        self.get_or_create(name, api)
            .cache_hits
            .fetch_add(1, Ordering::Relaxed);
    }
}
