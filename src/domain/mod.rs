//! Domain Layer
//!
//! Query descriptors, results, errors and the ports the engine talks through.

pub mod context;
pub mod entities;
pub mod errors;
pub mod ports;
pub mod query;
pub mod value_objects;

pub use context::QueryContext;
pub use entities::{
    Labels, MetadataResult, MetricMetadata, Payload, QueryOutput, QueryResult, QueryStats,
    RangeQueryResult, RangeSeries, Sample, SamplePair,
};
pub use errors::{FailoverError, QueryError};
pub use query::Query;
pub use value_objects::{ErrorType, MetricType};
