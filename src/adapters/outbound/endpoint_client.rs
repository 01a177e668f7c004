//! Endpoint Client
//!
//! Executes queries against one Prometheus-compatible endpoint through a
//! bounded worker pool. Every query passes through the same pipeline:
//! cache lookup, per-key lock, cache recheck, rate limiter, HTTP request,
//! streaming decode, cache fill.

use super::error_classifier::{classify_status, classify_transport};
use super::response_decoder::decode_payload;
use crate::config::{ConfigError, EndpointConfig};
use crate::domain::context::QueryContext;
use crate::domain::entities::{
    MetadataResult, Payload, QueryOutput, QueryResult, QueryStats, RangeQueryResult,
};
use crate::domain::errors::QueryError;
use crate::domain::ports::{QueryEndpoint, QueryMetrics};
use crate::domain::query::{CacheClass, Query};
use crate::infrastructure::{
    JobHandler, PartitionLock, RateLimitConfig, RateLimiter, TtlCache, WorkerPool,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::io::{self, BufReader, Read};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::oneshot;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tokio_util::sync::CancellationToken;

/// Read buffer between the response stream and the JSON decoder.
const DECODE_BUFFER_SIZE: usize = 64 * 1024;

/// A query waiting in the worker queue.
pub struct QueryRequest {
    query: Query,
    ctx: QueryContext,
    reply: oneshot::Sender<Result<QueryOutput, QueryError>>,
}

/// Replace the password of a URI with `xxx`.
pub fn sanitize_uri(uri: &str) -> String {
    match reqwest::Url::parse(uri) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("xxx"));
            url.to_string()
        }
        _ => uri.to_string(),
    }
}

/// Append an API path to the base URL, keeping any base path and query
/// string.
fn api_url(base: &reqwest::Url, api: &str) -> reqwest::Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .extend(api.split('/').filter(|s| !s.is_empty()));
    }
    url
}

/// Marks a network call as running until dropped.
struct RunningQuery<'a> {
    metrics: &'a dyn QueryMetrics,
    name: &'a str,
    api: &'a str,
    start: Instant,
}

impl<'a> RunningQuery<'a> {
    fn start(metrics: &'a dyn QueryMetrics, name: &'a str, api: &'a str) -> Self {
        metrics.query_started(name, api);
        Self {
            metrics,
            name,
            api,
            start: Instant::now(),
        }
    }
}

impl Drop for RunningQuery<'_> {
    fn drop(&mut self) {
        self.metrics
            .query_finished(self.name, self.api, self.start.elapsed());
    }
}

fn build_http_client(config: &EndpointConfig) -> Result<reqwest::Client, ConfigError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ConfigError::InvalidHeader(name.as_str().to_string()))?;
        headers.insert(name, value);
    }

    let mut builder = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(config.timeout)
        .gzip(true);

    if let Some(path) = &config.tls.ca_cert {
        let pem = std::fs::read(path)
            .map_err(|e| ConfigError::Tls(format!("{}: {}", path.display(), e)))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| ConfigError::Tls(format!("{}: {}", path.display(), e)))?;
        builder = builder.add_root_certificate(cert);
    }

    if let (Some(cert_path), Some(key_path)) = (&config.tls.client_cert, &config.tls.client_key) {
        let mut pem = std::fs::read(cert_path)
            .map_err(|e| ConfigError::Tls(format!("{}: {}", cert_path.display(), e)))?;
        let key = std::fs::read(key_path)
            .map_err(|e| ConfigError::Tls(format!("{}: {}", key_path.display(), e)))?;
        pem.extend_from_slice(&key);
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| ConfigError::Tls(format!("client identity: {}", e)))?;
        builder = builder.identity(identity);
    }

    if config.tls.skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(|e| ConfigError::Http(e.to_string()))
}

/// State shared by all workers of one client.
struct ClientInner {
    name: String,
    base_url: reqwest::Url,
    safe_uri: String,
    http: reqwest::Client,
    cache: Option<Arc<TtlCache<QueryOutput>>>,
    locker: PartitionLock,
    limiter: Option<RateLimiter>,
    metrics: Arc<dyn QueryMetrics>,
    query_cache_ttl: Duration,
    metadata_cache_ttl: Duration,
}

impl ClientInner {
    fn cached(&self, key: &str, api: &str) -> Option<QueryOutput> {
        let hit = self.cache.as_ref()?.get(key)?;
        self.metrics.cache_hit(&self.name, api);
        tracing::debug!("cache hit on {} for {}", self.safe_uri, key.replace('\n', " "));
        Some(hit)
    }

    fn ttl(&self, query: &Query) -> Duration {
        match query.cache_class() {
            CacheClass::Query => self.query_cache_ttl,
            CacheClass::Metadata => self.metadata_cache_ttl,
        }
    }

    async fn process(&self, ctx: &QueryContext, query: &Query) -> Result<QueryOutput, QueryError> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let api = query.path();
        let key = query.cache_key();

        if let Some(hit) = self.cached(&key, api) {
            return Ok(hit);
        }

        let _guard = ctx.run(self.locker.lock(&key)).await?;

        // Someone else may have filled the cache while we waited.
        if let Some(hit) = self.cached(&key, api) {
            return Ok(hit);
        }

        if let Some(limiter) = &self.limiter {
            ctx.run(limiter.acquire()).await?;
        }

        let result = {
            let _running = RunningQuery::start(self.metrics.as_ref(), &self.name, api);
            ctx.run(self.fetch(query)).await.and_then(|r| r)
        };

        match result {
            Ok(output) => {
                if let Some(cache) = &self.cache {
                    cache.set(key, output.clone(), self.ttl(query));
                }
                Ok(output)
            }
            Err(err) => {
                if let Some(canceled) = ctx.err() {
                    return Err(canceled);
                }
                if err.is_canceled() {
                    return Err(err);
                }
                self.metrics.query_failed(&self.name, api, err.reason());
                tracing::error!(
                    "Query returned an error: uri={} query={:?} error={}",
                    self.safe_uri,
                    query.to_string(),
                    err
                );
                Err(err)
            }
        }
    }

    async fn fetch(&self, query: &Query) -> Result<QueryOutput, QueryError> {
        tracing::debug!("running {} on {}: {}", query.path(), self.safe_uri, query);

        let url = api_url(&self.base_url, query.path());
        let params = query.params();
        let request = match query {
            Query::Metadata { .. } => self.http.get(url).query(&params),
            _ => self.http.post(url).form(&params),
        };

        let response = request.send().await.map_err(|e| classify_transport(&e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let (payload, stats) = decode_response(query.clone(), response).await?;
        Ok(QueryOutput {
            uri: self.safe_uri.clone(),
            payload,
            stats,
        })
    }
}

/// Decode a response body on a blocking thread, streaming it as it arrives.
async fn decode_response(
    query: Query,
    response: reqwest::Response,
) -> Result<(Payload, Option<QueryStats>), QueryError> {
    let stream = response
        .bytes_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    let reader = body_reader(SyncIoBridge::new(StreamReader::new(Box::pin(stream))));

    tokio::task::spawn_blocking(move || decode_payload(&query, reader))
        .await
        .map_err(|e| QueryError::Internal(format!("response decoder failed: {}", e)))?
}

/// serde_json reads one byte at a time; every read on the bridge is a
/// round trip to the runtime.
fn body_reader<R: Read>(reader: R) -> BufReader<R> {
    BufReader::with_capacity(DECODE_BUFFER_SIZE, reader)
}

#[async_trait]
impl JobHandler<QueryRequest> for ClientInner {
    async fn handle(&self, request: QueryRequest) {
        let QueryRequest { query, ctx, reply } = request;
        let result = self.process(&ctx, &query).await;
        // The caller may have given up already.
        let _ = reply.send(result);
    }
}

/// Client for a single Prometheus server.
pub struct EndpointClient {
    inner: Arc<ClientInner>,
    pool: WorkerPool<QueryRequest>,
}

impl EndpointClient {
    /// Build a client. Workers are not running until [`EndpointClient::start_workers`].
    pub fn new(config: EndpointConfig, metrics: Arc<dyn QueryMetrics>) -> Result<Self, ConfigError> {
        config.validate()?;
        let http = build_http_client(&config)?;
        let safe_uri = sanitize_uri(&config.uri);
        let base_url = reqwest::Url::parse(&config.uri).map_err(|e| ConfigError::InvalidUri {
            uri: safe_uri.clone(),
            reason: e.to_string(),
        })?;

        let limiter = match config.rate_limit {
            0 => None,
            rps => Some(RateLimiter::new(RateLimitConfig::per_second(rps))),
        };
        let cache = config.cache_enabled.then(|| Arc::new(TtlCache::new()));

        let pool = WorkerPool::new(format!("{} ({})", config.name, safe_uri), config.concurrency);

        Ok(Self {
            inner: Arc::new(ClientInner {
                name: config.name,
                base_url,
                safe_uri,
                http,
                cache,
                locker: PartitionLock::new(),
                limiter,
                metrics,
                query_cache_ttl: config.query_cache_ttl,
                metadata_cache_ttl: config.metadata_cache_ttl,
            }),
            pool,
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Credential-redacted URI.
    pub fn safe_uri(&self) -> &str {
        &self.inner.safe_uri
    }

    pub fn concurrency(&self) -> usize {
        self.pool.concurrency()
    }

    pub fn live_workers(&self) -> usize {
        self.pool.live_workers()
    }

    /// Number of keys currently being fetched or waited on.
    pub fn in_flight_keys(&self) -> usize {
        self.inner.locker.len()
    }

    pub fn start_workers(&self) {
        self.pool.start(self.inner.clone());
    }

    /// Stop accepting queries, finish queued ones and wait for the workers.
    pub async fn stop(&self) {
        self.pool.stop().await;
    }

    /// Purge expired cache entries every `interval` until `cancel` fires.
    pub fn start_cache_sweeper(&self, interval: Duration, cancel: CancellationToken) {
        if let Some(cache) = &self.inner.cache {
            TtlCache::start_sweeper(cache.clone(), interval, cancel);
        }
    }

    /// Submit a query and wait for its result.
    pub async fn execute(&self, ctx: &QueryContext, query: Query) -> Result<QueryOutput, QueryError> {
        tracing::debug!("scheduling {} on {}: {}", query.path(), self.inner.safe_uri, query);

        let (reply, rx) = oneshot::channel();
        let request = QueryRequest {
            query,
            ctx: ctx.clone(),
            reply,
        };
        self.pool.submit(request, ctx).await?;

        match ctx.run(rx).await? {
            Ok(result) => result,
            Err(_) => Err(QueryError::Internal(
                "worker dropped the query without replying".to_string(),
            )),
        }
    }

    /// Instant query evaluated at the current time.
    pub async fn query(&self, ctx: &QueryContext, expr: &str) -> Result<QueryResult, QueryError> {
        QueryResult::try_from(self.execute(ctx, Query::instant(expr)).await?)
    }

    pub async fn range_query(
        &self,
        ctx: &QueryContext,
        expr: &str,
        start: SystemTime,
        end: SystemTime,
        step: Duration,
    ) -> Result<RangeQueryResult, QueryError> {
        RangeQueryResult::try_from(self.execute(ctx, Query::range(expr, start, end, step)).await?)
    }

    pub async fn metadata(&self, ctx: &QueryContext, metric: &str) -> Result<MetadataResult, QueryError> {
        MetadataResult::try_from(self.execute(ctx, Query::metadata(metric)).await?)
    }
}

#[async_trait]
impl QueryEndpoint for EndpointClient {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn uri(&self) -> &str {
        &self.inner.safe_uri
    }

    async fn execute(&self, ctx: &QueryContext, query: Query) -> Result<QueryOutput, QueryError> {
        EndpointClient::execute(self, ctx, query).await
    }

    async fn close(&self) {
        self.stop().await;
    }
}
