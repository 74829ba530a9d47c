//! Server configuration module
//! Handles dynamic configuration parameters for the board server

use crate::constants::{
    DEFAULT_DATABASE_URL, DEFAULT_HOST, DEFAULT_INITIAL_SCORE, DEFAULT_MAX_POST_LENGTH, DEFAULT_OUTBOUND_QUEUE,
    DEFAULT_PORT, DEFAULT_POST_RATE_BURST, DEFAULT_POST_RATE_PER_SEC, DEFAULT_PUBLIC_DIR,
    DEFAULT_RATE_SWEEP_SECS, DEFAULT_SHUTDOWN_DRAIN_SECS, DEFAULT_STORE_LOCK_TIMEOUT_SECS,
    DEFAULT_TRENDING_LIMIT, DEFAULT_VOTE_RATE_BURST, DEFAULT_VOTE_RATE_PER_SEC,
};
use crate::error::{MurmurError, Result};
use crate::storage::StoreLocation;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Token bucket parameters for one class of write operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Tokens added back per second
    pub per_second: f64,
    /// Bucket capacity, also the number of requests admitted instantly
    pub burst: u32,
}

impl RateLimitConfig {
    pub fn new(per_second: f64, burst: u32) -> Self {
        Self { per_second, burst }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.per_second.is_finite() || self.per_second <= 0.0 {
            return Err(MurmurError::ConfigError(format!(
                "{} refill rate must be a positive number, got {}",
                name, self.per_second
            )));
        }
        if self.burst == 0 {
            return Err(MurmurError::ConfigError(format!(
                "{} burst must be at least 1",
                name
            )));
        }
        Ok(())
    }
}

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret expected in the X-Admin-Token header
    pub admin_token: String,
    /// Allowed CORS origin, None allows any origin
    pub cors_origin: Option<String>,
    /// Maximum post length in characters
    pub max_post_length: usize,
    pub initial_score: i64,
    pub trending_limit: usize,
    pub post_rate: RateLimitConfig,
    pub vote_rate: RateLimitConfig,
    /// How often idle rate buckets are swept
    pub rate_sweep_interval: Duration,
    /// Per-connection outbound queue capacity; a full queue evicts the client
    pub outbound_queue_capacity: usize,
    /// Time given to connections to flush on shutdown
    pub shutdown_drain_timeout: Duration,
    /// Longest a transaction waits for a post row lock
    pub store_lock_timeout: Duration,
    /// `sqlite://<path>` or `memory://`
    pub database_url: String,
    /// Directory holding index.html, served at the root path
    pub public_dir: PathBuf,
    /// Honour X-Forwarded-For style headers from trusted proxies
    pub trust_proxy_headers: bool,
    pub trusted_proxies: Vec<IpAddr>,
}

impl ServerConfig {
    /// Build the default configuration around an admin token.
    pub fn with_admin_token(admin_token: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            admin_token: admin_token.into(),
            cors_origin: None,
            max_post_length: DEFAULT_MAX_POST_LENGTH,
            initial_score: DEFAULT_INITIAL_SCORE,
            trending_limit: DEFAULT_TRENDING_LIMIT,
            post_rate: RateLimitConfig::new(DEFAULT_POST_RATE_PER_SEC, DEFAULT_POST_RATE_BURST),
            vote_rate: RateLimitConfig::new(DEFAULT_VOTE_RATE_PER_SEC, DEFAULT_VOTE_RATE_BURST),
            rate_sweep_interval: Duration::from_secs(DEFAULT_RATE_SWEEP_SECS),
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE,
            shutdown_drain_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_DRAIN_SECS),
            store_lock_timeout: Duration::from_secs(DEFAULT_STORE_LOCK_TIMEOUT_SECS),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            public_dir: PathBuf::from(DEFAULT_PUBLIC_DIR),
            trust_proxy_headers: false,
            trusted_proxies: Vec::new(),
        }
    }

    /// Check the values that would make the server misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        if self.admin_token.trim().is_empty() {
            return Err(MurmurError::ConfigError(
                "admin token must not be empty".to_string(),
            ));
        }
        if self.admin_token.len() < 16 {
            log::warn!("Admin token is shorter than 16 characters, consider a longer secret");
        }
        if self.max_post_length == 0 {
            return Err(MurmurError::ConfigError(
                "max post length must be at least 1".to_string(),
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(MurmurError::ConfigError(
                "outbound queue capacity must be at least 1".to_string(),
            ));
        }
        if self.trending_limit == 0 {
            return Err(MurmurError::ConfigError(
                "trending limit must be at least 1".to_string(),
            ));
        }
        if self.rate_sweep_interval.is_zero() {
            return Err(MurmurError::ConfigError(
                "rate sweep interval must be non-zero".to_string(),
            ));
        }
        if self.store_lock_timeout.is_zero() {
            return Err(MurmurError::ConfigError(
                "store lock timeout must be non-zero".to_string(),
            ));
        }
        StoreLocation::parse(&self.database_url)?;
        if let Some(origin) = &self.cors_origin {
            let scheme_ok = origin.starts_with("http://") || origin.starts_with("https://");
            if !scheme_ok || !origin.chars().all(|c| c.is_ascii_graphic()) {
                return Err(MurmurError::ConfigError(format!(
                    "CORS origin must look like scheme://host[:port], got {:?}",
                    origin
                )));
            }
        }
        self.post_rate.validate("post rate limit")?;
        self.vote_rate.validate("vote rate limit")?;
        Ok(())
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let admin_token = env::var("MURMUR_ADMIN_TOKEN")
            .or_else(|_| env::var("X_ADMIN_TOKEN"))
            .map_err(|_| {
                MurmurError::ConfigError(
                    "MURMUR_ADMIN_TOKEN (or X_ADMIN_TOKEN) environment variable is required. \
                     Generate one with: openssl rand -base64 32"
                        .to_string(),
                )
            })?;

        let mut config = Self::with_admin_token(admin_token);

        config.host = env::var("MURMUR_HOST").unwrap_or(config.host);
        config.port = env::var("MURMUR_PORT")
            .or_else(|_| env::var("PORT"))
            .ok()
            .map(|p| parse_value("MURMUR_PORT", &p))
            .transpose()?
            .unwrap_or(config.port);

        config.cors_origin = env::var("MURMUR_CORS_ORIGIN")
            .or_else(|_| env::var("CORS_ORIGIN"))
            .ok()
            .filter(|origin| !origin.is_empty() && origin != "*");

        config.max_post_length = env_or("MURMUR_MAX_POST_LENGTH", config.max_post_length)?;
        config.initial_score = env_or("MURMUR_INITIAL_SCORE", config.initial_score)?;
        config.trending_limit = env_or("MURMUR_TRENDING_LIMIT", config.trending_limit)?;

        config.post_rate = RateLimitConfig::new(
            env_or("MURMUR_POST_RATE_PER_SEC", config.post_rate.per_second)?,
            env_or("MURMUR_POST_RATE_BURST", config.post_rate.burst)?,
        );
        config.vote_rate = RateLimitConfig::new(
            env_or("MURMUR_VOTE_RATE_PER_SEC", config.vote_rate.per_second)?,
            env_or("MURMUR_VOTE_RATE_BURST", config.vote_rate.burst)?,
        );

        let sweep_secs = env_or("MURMUR_RATE_SWEEP_SECS", config.rate_sweep_interval.as_secs())?;
        config.rate_sweep_interval = Duration::from_secs(sweep_secs);

        config.outbound_queue_capacity =
            env_or("MURMUR_OUTBOUND_QUEUE", config.outbound_queue_capacity)?;

        let drain_secs = env_or(
            "MURMUR_SHUTDOWN_DRAIN_SECS",
            config.shutdown_drain_timeout.as_secs(),
        )?;
        config.shutdown_drain_timeout = Duration::from_secs(drain_secs);

        let lock_secs = env_or(
            "MURMUR_STORE_LOCK_TIMEOUT_SECS",
            config.store_lock_timeout.as_secs(),
        )?;
        config.store_lock_timeout = Duration::from_secs(lock_secs);

        if let Ok(url) = env::var("MURMUR_DATABASE_URL").or_else(|_| env::var("DATABASE_URL")) {
            config.database_url = url;
        }

        if let Ok(dir) = env::var("MURMUR_PUBLIC_DIR") {
            config.public_dir = PathBuf::from(dir);
        }

        config.trust_proxy_headers = env::var("MURMUR_TRUST_PROXY_HEADERS")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false); // SECURITY: Default to false, peers can forge headers

        if let Ok(list) = env::var("MURMUR_TRUSTED_PROXIES") {
            config.trusted_proxies = parse_ip_list(&list)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        MurmurError::ConfigError(format!("{} has an invalid value: {:?}", name, raw))
    })
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_ip_list(list: &str) -> Result<Vec<IpAddr>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| parse_value("MURMUR_TRUSTED_PROXIES", entry))
        .collect()
}
