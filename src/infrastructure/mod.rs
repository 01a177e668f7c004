//! Infrastructure Layer
//!
//! Concurrency and caching building blocks used by the endpoint client.

pub mod cache;
pub mod partition_lock;
pub mod rate_limiter;
pub mod worker_pool;

pub use cache::TtlCache;
pub use partition_lock::{PartitionGuard, PartitionLock};
pub use rate_limiter::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use worker_pool::{JobHandler, WorkerPool};
