//! Query Descriptors
//!
//! A [`Query`] describes one read operation against the backend. It knows
//! its API path, its cache key and which cache TTL applies to it.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Width of the time buckets instant query cache keys are rounded to.
pub const INSTANT_QUERY_BUCKET: Duration = Duration::from_secs(60);

pub const QUERY_PATH: &str = "/api/v1/query";
pub const QUERY_RANGE_PATH: &str = "/api/v1/query_range";
pub const METADATA_PATH: &str = "/api/v1/metadata";

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Instant query evaluated at "now"; `at` only picks the cache bucket.
    Instant { expr: String, at: SystemTime },
    Range {
        expr: String,
        start: SystemTime,
        end: SystemTime,
        step: Duration,
    },
    Metadata { metric: String },
}

/// Which cache TTL a query is stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheClass {
    Query,
    Metadata,
}

impl Query {
    pub fn instant(expr: impl Into<String>) -> Self {
        Self::Instant {
            expr: expr.into(),
            at: SystemTime::now(),
        }
    }

    pub fn range(expr: impl Into<String>, start: SystemTime, end: SystemTime, step: Duration) -> Self {
        Self::Range {
            expr: expr.into(),
            start,
            end,
            step,
        }
    }

    pub fn metadata(metric: impl Into<String>) -> Self {
        Self::Metadata {
            metric: metric.into(),
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Self::Instant { .. } => QUERY_PATH,
            Self::Range { .. } => QUERY_RANGE_PATH,
            Self::Metadata { .. } => METADATA_PATH,
        }
    }

    pub fn cache_class(&self) -> CacheClass {
        match self {
            Self::Instant { .. } | Self::Range { .. } => CacheClass::Query,
            Self::Metadata { .. } => CacheClass::Metadata,
        }
    }

    /// Deterministic cache and partition key.
    ///
    /// Instant queries within the same [`INSTANT_QUERY_BUCKET`] share a key.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Instant { expr, at } => {
                let bucket = unix_secs(*at) as u64 / INSTANT_QUERY_BUCKET.as_secs();
                format!("{}\n{}\n{}", self.path(), expr, bucket)
            }
            Self::Range {
                expr,
                start,
                end,
                step,
            } => format!(
                "{}\n{}\n{}\n{}\n{}",
                self.path(),
                expr,
                format_time(*start),
                format_time(*end),
                step.as_secs_f64()
            ),
            Self::Metadata { metric } => format!("{}\n{}", self.path(), metric),
        }
    }

    /// Form or query-string parameters for the request.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Instant { expr, .. } => vec![("query", expr.clone()), ("stats", "all".to_string())],
            Self::Range {
                expr,
                start,
                end,
                step,
            } => vec![
                ("query", expr.clone()),
                ("start", format_time(*start)),
                ("end", format_time(*end)),
                ("step", step.as_secs_f64().to_string()),
                ("stats", "all".to_string()),
            ],
            Self::Metadata { metric } => vec![("metric", metric.clone())],
        }
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instant { expr, .. } => f.write_str(expr),
            Self::Range {
                expr,
                start,
                end,
                step,
            } => write!(
                f,
                "{} [{} .. {} step {}s]",
                expr,
                format_time(*start),
                format_time(*end),
                step.as_secs_f64()
            ),
            Self::Metadata { metric } => f.write_str(metric),
        }
    }
}

fn unix_secs(t: SystemTime) -> f64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// Format a timestamp as decimal Unix seconds, as the HTTP API expects.
pub fn format_time(t: SystemTime) -> String {
    unix_secs(t).to_string()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_paths() {
        assert_eq!(Query::instant("up").path(), "/api/v1/query");
        assert_eq!(
            Query::range("up", at(0), at(60), Duration::from_secs(15)).path(),
            "/api/v1/query_range"
        );
        assert_eq!(Query::metadata("up").path(), "/api/v1/metadata");
    }

    #[test]
    fn test_instant_key_bucketed() {
        let a = Query::Instant {
            expr: "up".into(),
            at: at(1_700_000_000),
        };
        let b = Query::Instant {
            expr: "up".into(),
            at: at(1_700_000_010),
        };
        let c = Query::Instant {
            expr: "up".into(),
            at: at(1_700_000_000 + 3600),
        };
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn test_keys_differ_by_operation_and_expr() {
        let now = at(1_700_000_000);
        let q1 = Query::Instant {
            expr: "up".into(),
            at: now,
        };
        let q2 = Query::Instant {
            expr: "down".into(),
            at: now,
        };
        let q3 = Query::metadata("up");
        assert_ne!(q1.cache_key(), q2.cache_key());
        assert_ne!(q1.cache_key(), q3.cache_key());
    }

    #[test]
    fn test_range_key_includes_step() {
        let a = Query::range("up", at(0), at(600), Duration::from_secs(15));
        let b = Query::range("up", at(0), at(600), Duration::from_secs(30));
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_cache_class() {
        assert_eq!(Query::instant("up").cache_class(), CacheClass::Query);
        assert_eq!(
            Query::range("up", at(0), at(1), Duration::from_secs(1)).cache_class(),
            CacheClass::Query
        );
        assert_eq!(Query::metadata("up").cache_class(), CacheClass::Metadata);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(at(1_700_000_000)), "1700000000");
        assert_eq!(
            format_time(UNIX_EPOCH + Duration::from_millis(1_500)),
            "1.5"
        );
    }

    #[test]
    fn test_range_params() {
        let q = Query::range("rate(x[5m])", at(10), at(70), Duration::from_secs(30));
        let params = q.params();
        assert_eq!(params[0], ("query", "rate(x[5m])".to_string()));
        assert_eq!(params[1], ("start", "10".to_string()));
        assert_eq!(params[2], ("end", "70".to_string()));
        assert_eq!(params[3], ("step", "30".to_string()));
    }

    #[test]
    fn test_metadata_params() {
        assert_eq!(
            Query::metadata("foo").params(),
            vec![("metric", "foo".to_string())]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Query::instant("up == 0").to_string(), "up == 0");
        assert_eq!(Query::metadata("foo").to_string(), "foo");
    }
}
