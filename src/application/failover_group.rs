//! Failover Group
//!
//! Presents an ordered list of endpoints as one logical Prometheus server.
//! Members are tried in order, moving on only when a member is unavailable.

use crate::config::ConfigError;
use crate::domain::context::QueryContext;
use crate::domain::entities::{MetadataResult, QueryOutput, QueryResult, RangeQueryResult};
use crate::domain::errors::{FailoverError, QueryError};
use crate::domain::ports::QueryEndpoint;
use crate::domain::query::Query;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub struct FailoverGroup {
    name: String,
    members: Vec<Arc<dyn QueryEndpoint>>,
    tags: Vec<String>,
}

impl FailoverGroup {
    /// Create a group. Members are tried in the given order.
    pub fn new(
        name: impl Into<String>,
        members: Vec<Arc<dyn QueryEndpoint>>,
        tags: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if members.is_empty() {
            return Err(ConfigError::NoUris(name));
        }
        Ok(Self {
            name,
            members,
            tags,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Redacted member URIs in failover order.
    pub fn uris(&self) -> Vec<String> {
        self.members.iter().map(|m| m.uri().to_string()).collect()
    }

    /// Run `query` on the first member able to serve it.
    pub async fn execute(&self, ctx: &QueryContext, query: Query) -> Result<QueryOutput, FailoverError> {
        let mut last_err = None;

        for member in &self.members {
            match member.execute(ctx, query.clone()).await {
                Ok(output) => return Ok(output),
                Err(err) if err.is_unavailable() => {
                    tracing::warn!(
                        "prometheus {:?} at {} is unavailable, trying next server: {}",
                        member.name(),
                        member.uri(),
                        err
                    );
                    last_err = Some(FailoverError::new(member.name(), member.uri(), err));
                }
                Err(err) => return Err(FailoverError::new(member.name(), member.uri(), err)),
            }
        }

        Err(last_err.unwrap_or_else(|| FailoverError::new(&self.name, "", QueryError::Closed)))
    }

    fn typed<T>(&self, output: QueryOutput) -> Result<T, FailoverError>
    where
        T: TryFrom<QueryOutput, Error = QueryError>,
    {
        let uri = output.uri.clone();
        T::try_from(output).map_err(|e| FailoverError::new(&self.name, uri, e))
    }

    pub async fn query(&self, ctx: &QueryContext, expr: &str) -> Result<QueryResult, FailoverError> {
        let output = self.execute(ctx, Query::instant(expr)).await?;
        self.typed(output)
    }

    pub async fn range_query(
        &self,
        ctx: &QueryContext,
        expr: &str,
        start: SystemTime,
        end: SystemTime,
        step: Duration,
    ) -> Result<RangeQueryResult, FailoverError> {
        let output = self.execute(ctx, Query::range(expr, start, end, step)).await?;
        self.typed(output)
    }

    pub async fn metadata(&self, ctx: &QueryContext, metric: &str) -> Result<MetadataResult, FailoverError> {
        let output = self.execute(ctx, Query::metadata(metric)).await?;
        self.typed(output)
    }

    /// Stop every member.
    pub async fn close(&self) {
        for member in &self.members {
            member.close().await;
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod tests {
    use super::*;
    use crate::domain::entities::{MetricMetadata, Payload};
    use crate::domain::value_objects::{ErrorType, MetricType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Endpoint returning the same canned answer for every query.
    pub(crate) struct StubEndpoint {
        pub uri: String,
        pub answer: Result<Payload, QueryError>,
        pub calls: AtomicUsize,
        pub closed: AtomicUsize,
    }

    impl StubEndpoint {
        pub(crate) fn new(uri: &str, answer: Result<Payload, QueryError>) -> Arc<Self> {
            Arc::new(Self {
                uri: uri.to_string(),
                answer,
                calls: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryEndpoint for StubEndpoint {
        fn name(&self) -> &str {
            "prom"
        }

        fn uri(&self) -> &str {
            &self.uri
        }

        async fn execute(&self, ctx: &QueryContext, _query: Query) -> Result<QueryOutput, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            self.answer.clone().map(|payload| QueryOutput {
                uri: self.uri.clone(),
                payload,
                stats: None,
            })
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn group(members: &[Arc<StubEndpoint>]) -> FailoverGroup {
        FailoverGroup::new(
            "prom",
            members
                .iter()
                .map(|m| m.clone() as Arc<dyn QueryEndpoint>)
                .collect(),
            vec!["prod".to_string()],
        )
        .unwrap()
    }

    fn vector() -> Result<Payload, QueryError> {
        Ok(Payload::Vector(vec![]))
    }

    #[test]
    fn test_empty_group_rejected() {
        assert!(matches!(
            FailoverGroup::new("prom", vec![], vec![]),
            Err(ConfigError::NoUris(_))
        ));
    }

    #[test]
    fn test_identity() {
        let a = StubEndpoint::new("http://a", vector());
        let b = StubEndpoint::new("http://b", vector());
        let g = group(&[a, b]);
        assert_eq!(g.name(), "prom");
        assert!(g.has_tag("prod"));
        assert!(!g.has_tag("dev"));
        assert_eq!(g.tags(), &["prod".to_string()]);
        assert_eq!(g.uris(), vec!["http://a", "http://b"]);
    }

    #[tokio::test]
    async fn test_first_member_success() {
        let a = StubEndpoint::new("http://a", vector());
        let b = StubEndpoint::new("http://b", vector());
        let g = group(&[a.clone(), b.clone()]);

        let result = g.query(&QueryContext::new(), "up").await.unwrap();
        assert_eq!(result.uri, "http://a");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_fails_over_on_unavailable() {
        let a = StubEndpoint::new("http://a", Err(QueryError::ConnectionRefused));
        let b = StubEndpoint::new(
            "http://b",
            Err(QueryError::api(ErrorType::Server, "server error: 503")),
        );
        let c = StubEndpoint::new("http://c", vector());
        let g = group(&[a.clone(), b.clone(), c.clone()]);

        let result = g.query(&QueryContext::new(), "up").await.unwrap();
        assert_eq!(result.uri, "http://c");
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_semantic_error_stops() {
        let a = StubEndpoint::new("http://a", Err(QueryError::api(ErrorType::BadData, "parse error")));
        let b = StubEndpoint::new("http://b", vector());
        let g = group(&[a.clone(), b.clone()]);

        let err = g.query(&QueryContext::new(), "sum(").await.unwrap_err();
        assert_eq!(err.uri(), "http://a");
        assert_eq!(err.query_error().error_type(), ErrorType::BadData);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_unavailable_returns_last() {
        let a = StubEndpoint::new("http://a", Err(QueryError::Timeout));
        let b = StubEndpoint::new("http://b", Err(QueryError::ConnectionRefused));
        let g = group(&[a, b]);

        let err = g.query(&QueryContext::new(), "up").await.unwrap_err();
        assert_eq!(err.uri(), "http://b");
        assert_eq!(err.name, "prom");
        assert_eq!(err.query_error(), &QueryError::ConnectionRefused);
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_cancellation_stops() {
        let a = StubEndpoint::new("http://a", vector());
        let b = StubEndpoint::new("http://b", vector());
        let g = group(&[a.clone(), b.clone()]);

        let ctx = QueryContext::new();
        ctx.cancel();
        let err = g.query(&ctx, "up").await.unwrap_err();
        assert!(err.query_error().is_canceled());
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_metadata_typed() {
        let a = StubEndpoint::new(
            "http://a",
            Ok(Payload::Metadata(vec![MetricMetadata {
                metric_type: MetricType::Counter,
                help: String::new(),
                unit: String::new(),
            }])),
        );
        let g = group(&[a]);

        let md = g.metadata(&QueryContext::new(), "foo").await.unwrap();
        assert!(md.has_type(MetricType::Counter));
    }

    #[tokio::test]
    async fn test_payload_mismatch_is_bad_response() {
        let a = StubEndpoint::new("http://a", vector());
        let g = group(&[a]);

        let err = g.metadata(&QueryContext::new(), "foo").await.unwrap_err();
        assert_eq!(err.query_error().error_type(), ErrorType::BadResponse);
        assert_eq!(err.uri(), "http://a");
    }

    #[tokio::test]
    async fn test_close_stops_all_members() {
        let a = StubEndpoint::new("http://a", vector());
        let b = StubEndpoint::new("http://b", vector());
        let g = group(&[a.clone(), b.clone()]);

        g.close().await;
        assert_eq!(a.closed.load(Ordering::SeqCst), 1);
        assert_eq!(b.closed.load(Ordering::SeqCst), 1);
    }
}
