//! Query Endpoint Port
//!
//! The seam between a failover group and the clients it delegates to.

use crate::domain::context::QueryContext;
use crate::domain::entities::QueryOutput;
use crate::domain::errors::QueryError;
use crate::domain::query::Query;
use async_trait::async_trait;

/// A backend that can execute queries.
#[async_trait]
pub trait QueryEndpoint: Send + Sync {
    /// Logical name of the endpoint.
    fn name(&self) -> &str;

    /// Credential-redacted URI, safe to print.
    fn uri(&self) -> &str;

    /// Execute one query and wait for its result.
    async fn execute(&self, ctx: &QueryContext, query: Query) -> Result<QueryOutput, QueryError>;

    /// Stop accepting queries and wait for in-flight ones to finish.
    async fn close(&self);
}
