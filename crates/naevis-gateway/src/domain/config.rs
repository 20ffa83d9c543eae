//! Gateway configuration with validation.
//!
//! Defaults reproduce the production deployment. The runtime crate layers
//! environment overrides on top before calling [`NaevisConfig::validate`].

use naevis_store::{ClientOptions, PoolBounds, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NaevisConfig {
    /// HTTP listener and request limits
    pub http: HttpConfig,
    /// Bearer token verification
    pub auth: AuthConfig,
    /// Per-client rate limiting
    pub rate_limit: RateLimitConfig,
    /// CORS policy for API routes
    pub cors: CorsConfig,
    /// Response security headers
    pub security_headers: SecurityHeadersConfig,
    /// Store pool, gate and retry policy
    pub store: StoreConfig,
    /// Graceful shutdown
    pub shutdown: ShutdownConfig,
}

impl NaevisConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.http.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "request_timeout cannot be 0".into(),
            ));
        }
        if self.http.max_body_bytes == 0 {
            return Err(ConfigError::InvalidLimit("max_body_bytes cannot be 0".into()));
        }

        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        if self.rate_limit.requests_per_second == 0 || self.rate_limit.writes_per_second == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "per-second budgets cannot be 0".into(),
            ));
        }
        if self.rate_limit.max_tracked_clients == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "max_tracked_clients cannot be 0".into(),
            ));
        }

        self.cors.validate()?;
        self.store.validate()?;

        // A hung store attempt must never outlive the transport deadline.
        if self.store.per_attempt_timeout >= self.http.request_timeout {
            return Err(ConfigError::InvalidTimeout(format!(
                "store per_attempt_timeout ({:?}) must be shorter than http request_timeout ({:?})",
                self.store.per_attempt_timeout, self.http.request_timeout
            )));
        }

        if self.shutdown.drain_deadline.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "drain_deadline cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 10000)
    pub port: u16,
    /// Whole-request deadline enforced by the timeout decorator
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Largest accepted JSON request body
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 10000,
            request_timeout: Duration::from_secs(15),
            max_body_bytes: 1 << 20,
        }
    }
}

/// Bearer token verification
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret shared with the token issuer
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    /// Clock skew tolerated on `exp`, in seconds
    pub leeway_secs: u64,
}

// The secret never reaches logs.
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Sustained requests per second per client (reads)
    pub requests_per_second: u32,
    /// Sustained requests per second per client (writes)
    pub writes_per_second: u32,
    /// Burst allowance for reads
    pub burst_size: u32,
    /// Burst allowance for writes
    pub write_burst_size: u32,
    /// Buckets idle longer than this are dropped
    #[serde(with = "humantime_serde")]
    pub bucket_ttl: Duration,
    /// How often stale buckets are swept
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// Upper bound on tracked client addresses
    pub max_tracked_clients: usize,
    /// Addresses never limited
    pub whitelist: Vec<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 1,
            writes_per_second: 1,
            burst_size: 12,
            write_burst_size: 6,
            bucket_ttl: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
            max_tracked_clients: 10_000,
            whitelist: vec![],
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,
    /// Allowed origins ("*" for all, incompatible with credentials)
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers
    pub allowed_headers: Vec<String>,
    /// Expose headers
    pub expose_headers: Vec<String>,
    /// Max age for preflight cache (seconds)
    pub max_age: u64,
    /// Allow credentials
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "https://indium.netlify.app".to_string(),
            ],
            allowed_methods: ["HEAD", "GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: [
                "Content-Type",
                "Authorization",
                "Idempotency-Key",
                "X-Requested-With",
            ]
            .iter()
            .map(|h| h.to_string())
            .collect(),
            expose_headers: vec![],
            max_age: 600,
            allow_credentials: true,
        }
    }
}

impl CorsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled || !self.allow_credentials {
            return Ok(());
        }
        let wildcard = |values: &[String]| values.iter().any(|v| v == "*");
        if wildcard(&self.allowed_origins) || wildcard(&self.allowed_headers) {
            return Err(ConfigError::InvalidCors(
                "wildcard origins or headers cannot be combined with credentials".into(),
            ));
        }
        Ok(())
    }
}

/// Security response headers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityHeadersConfig {
    pub enabled: bool,
    pub content_security_policy: String,
    pub referrer_policy: String,
    pub permissions_policy: String,
    /// Strict-Transport-Security max-age, only sent over TLS
    pub hsts_max_age: u64,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            content_security_policy: "default-src 'none'; frame-ancestors 'none'; base-uri 'none'"
                .to_string(),
            referrer_policy: "no-referrer".to_string(),
            permissions_policy: "geolocation=(), microphone=(), camera=()".to_string(),
            hsts_max_age: 63_072_000,
        }
    }
}

/// Store client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub min_pool: usize,
    pub max_pool: usize,
    /// Simultaneous guarded operations
    pub gate_capacity: usize,
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub per_attempt_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
    /// Startup connectivity probe deadline
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Liveness probe deadline
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// How long opening a session may wait for a free pool slot
    #[serde(with = "humantime_serde")]
    pub pool_acquire_timeout: Duration,
    /// Utilization log period
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            min_pool: 10,
            max_pool: 100,
            gate_capacity: 100,
            max_attempts: 2,
            per_attempt_timeout: Duration::from_secs(5),
            backoff: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
            pool_acquire_timeout: Duration::from_secs(5),
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pool == 0 || self.min_pool > self.max_pool {
            return Err(ConfigError::InvalidPool {
                min: self.min_pool,
                max: self.max_pool,
            });
        }
        if self.gate_capacity == 0 {
            return Err(ConfigError::InvalidLimit("gate_capacity cannot be 0".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidLimit("max_attempts cannot be 0".into()));
        }
        if self.per_attempt_timeout.is_zero() || self.probe_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "store timeouts cannot be 0".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.per_attempt_timeout, self.backoff)
    }

    pub fn pool_bounds(&self) -> Result<PoolBounds, ConfigError> {
        PoolBounds::new(self.min_pool, self.max_pool).map_err(|_| ConfigError::InvalidPool {
            min: self.min_pool,
            max: self.max_pool,
        })
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            gate_capacity: self.gate_capacity,
            retry: self.retry_policy(),
            connect_timeout: self.connect_timeout,
            probe_timeout: self.probe_timeout,
        }
    }
}

/// Graceful shutdown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight requests may run after the stop signal
    #[serde(with = "humantime_serde")]
    pub drain_deadline: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_deadline: Duration::from_secs(10),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("http port cannot be 0")]
    InvalidPort,
    #[error("jwt secret is not configured")]
    MissingSecret,
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid pool bounds: min {min}, max {max}")]
    InvalidPool { min: usize, max: usize },
    #[error("invalid cors policy: {0}")]
    InvalidCors(String),
}

/// Duration fields as human-readable strings: "200ms", "5s", "10m".
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 || duration.as_secs() == 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse "200ms", "5s", "10m" or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| "invalid milliseconds")
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| "invalid seconds")
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| "invalid minutes")
    } else {
        s.parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| "invalid duration")
    }
}
