//! promlint Library
//!
//! Query execution engine used by online rule checks: bounded per-endpoint
//! worker pools with request deduplication, caching, rate limiting and
//! failover across Prometheus servers.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::outbound::{DashMapQueryMetrics, EndpointClient};
pub use application::{CounterCheck, FailoverGroup};
pub use config::{load_config, Config, ConfigError, EndpointConfig, TlsConfig};
pub use domain::entities::{MetadataResult, QueryResult, RangeQueryResult};
pub use domain::ports::{QueryEndpoint, QueryMetrics};
pub use domain::{ErrorType, FailoverError, QueryContext, QueryError};
