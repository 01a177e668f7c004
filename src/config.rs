use std::path::PathBuf;
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Default number of workers per endpoint.
pub const DEFAULT_CONCURRENCY: usize = 16;
/// Default requests per second per endpoint.
pub const DEFAULT_RATE_LIMIT: u64 = 100;
/// How long instant and range query results are cached.
pub const DEFAULT_QUERY_CACHE_TTL: Duration = Duration::from_secs(120);
/// How long metadata results are cached.
pub const DEFAULT_METADATA_CACHE_TTL: Duration = Duration::from_secs(600);
/// How often expired cache entries are purged in the background.
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("invalid header {0:?}")]
    InvalidHeader(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("TLS configuration error: {0}")]
    Tls(String),
    #[error("failed to build HTTP client: {0}")]
    Http(String),
    #[error("prometheus {0:?} has no URIs configured")]
    NoUris(String),
}

#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub skip_verify: bool,
}

/// Settings for one endpoint client.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub name: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub tls: TlsConfig,
    pub timeout: Duration,
    pub concurrency: usize,
    /// Requests per second, 0 disables rate limiting
    pub rate_limit: u64,
    pub cache_enabled: bool,
    pub query_cache_ttl: Duration,
    pub metadata_cache_ttl: Duration,
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            headers: Vec::new(),
            tls: TlsConfig::default(),
            timeout: DEFAULT_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
            rate_limit: DEFAULT_RATE_LIMIT,
            cache_enabled: true,
            query_cache_ttl: DEFAULT_QUERY_CACHE_TTL,
            metadata_cache_ttl: DEFAULT_METADATA_CACHE_TTL,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn rate_limit(mut self, rps: u64) -> Self {
        self.rate_limit = rps;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn query_cache_ttl(mut self, ttl: Duration) -> Self {
        self.query_cache_ttl = ttl;
        self
    }

    pub fn metadata_cache_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_cache_ttl = ttl;
        self
    }

    /// Check the settings that do not need I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Zero("concurrency"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Zero("timeout"));
        }

        let url = reqwest::Url::parse(&self.uri).map_err(|e| ConfigError::InvalidUri {
            uri: self.uri.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUri {
                uri: self.uri.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        for (name, value) in &self.headers {
            if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err()
                || reqwest::header::HeaderValue::from_str(value).is_err()
            {
                return Err(ConfigError::InvalidHeader(name.clone()));
            }
        }

        if self.tls.client_cert.is_some() != self.tls.client_key.is_some() {
            return Err(ConfigError::Tls(
                "client certificate and key must be set together".to_string(),
            ));
        }

        Ok(())
    }
}

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    /// Failover order
    pub uris: Vec<String>,
    pub headers: Vec<(String, String)>,
    pub tags: Vec<String>,
    pub timeout_secs: u64,
    pub concurrency: usize,
    pub rate_limit: u64,
    pub cache_enabled: bool,
    pub tls: TlsConfig,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "prom".to_string(),
            uris: vec!["http://localhost:9090".to_string()],
            headers: Vec::new(),
            tags: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            concurrency: DEFAULT_CONCURRENCY,
            rate_limit: DEFAULT_RATE_LIMIT,
            cache_enabled: true,
            tls: TlsConfig::default(),
            debug: false,
        }
    }
}

impl Config {
    /// One endpoint config per URI, in failover order.
    pub fn endpoint_configs(&self) -> Vec<EndpointConfig> {
        self.uris
            .iter()
            .map(|uri| {
                EndpointConfig::new(self.name.clone(), uri.clone())
                    .headers(self.headers.clone())
                    .tls(self.tls.clone())
                    .timeout(Duration::from_secs(self.timeout_secs))
                    .concurrency(self.concurrency)
                    .rate_limit(self.rate_limit)
                    .cache_enabled(self.cache_enabled)
            })
            .collect()
    }
}

pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Build the config from an arbitrary variable lookup.
pub fn load_config_from<F>(lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();

    let name = lookup("PROMLINT_PROMETHEUS_NAME").unwrap_or(defaults.name);

    let uris = lookup("PROMLINT_PROMETHEUS_URIS")
        .map(|v| split_list(&v))
        .unwrap_or(defaults.uris);
    if uris.is_empty() {
        return Err(ConfigError::NoUris(name));
    }

    let headers = match lookup("PROMLINT_PROMETHEUS_HEADERS") {
        Some(v) => parse_headers(&v)?,
        None => Vec::new(),
    };

    let tags = lookup("PROMLINT_PROMETHEUS_TAGS")
        .map(|v| split_list(&v))
        .unwrap_or_default();

    let timeout_secs = lookup("PROMLINT_PROMETHEUS_TIMEOUT_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.timeout_secs);

    let concurrency = lookup("PROMLINT_PROMETHEUS_CONCURRENCY")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.concurrency);

    let rate_limit = lookup("PROMLINT_PROMETHEUS_RATE_LIMIT")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.rate_limit);

    let cache_enabled = lookup("PROMLINT_PROMETHEUS_CACHE_ENABLED")
        .map(|v| parse_bool(&v))
        .unwrap_or(defaults.cache_enabled);

    // TLS settings
    let tls = TlsConfig {
        ca_cert: lookup("PROMLINT_TLS_CA_CERT").map(PathBuf::from),
        client_cert: lookup("PROMLINT_TLS_CLIENT_CERT").map(PathBuf::from),
        client_key: lookup("PROMLINT_TLS_CLIENT_KEY").map(PathBuf::from),
        skip_verify: lookup("PROMLINT_TLS_SKIP_VERIFY")
            .map(|v| parse_bool(&v))
            .unwrap_or(false),
    };

    let debug = lookup("DEBUG").is_some();

    Ok(Config {
        name,
        uris,
        headers,
        tags,
        timeout_secs,
        concurrency,
        rate_limit,
        cache_enabled,
        tls,
        debug,
    })
}

fn parse_bool(v: &str) -> bool {
    v == "1" || v.to_lowercase() == "true"
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_headers(v: &str) -> Result<Vec<(String, String)>, ConfigError> {
    split_list(v)
        .into_iter()
        .map(|pair| match pair.split_once('=') {
            Some((k, val)) if !k.trim().is_empty() => {
                Ok((k.trim().to_string(), val.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidHeader(pair)),
        })
        .collect()
}
