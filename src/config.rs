use crate::client_ip::TrustedProxies;
use crate::error::{RateLimitError, Result};
use crate::rate_limit_config::{FailurePolicy, RateLimit, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS};
use crate::store::WindowMode;
use clap::error::ErrorKind;
use clap::Parser;
use std::net::SocketAddr;
use validator::{Validate, ValidationError};

/// Process configuration for the demo server, read from flags or the
/// environment.
#[derive(Debug, Clone, Parser, Validate)]
#[command(name = "redis-ratelimit", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    #[validate(custom(function = "validate_redis_url"))]
    pub redis_url: String,

    /// Requests admitted per client and path within one window
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value_t = DEFAULT_MAX_REQUESTS)]
    #[validate(range(min = 1))]
    pub max_requests: u64,

    /// Window length in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value_t = DEFAULT_WINDOW_SECS)]
    #[validate(range(min = 1))]
    pub window_secs: u64,

    /// Do not extend a window on every request (requires Redis 7)
    #[arg(long, env = "RATE_LIMIT_FIXED_WINDOW")]
    pub fixed_window: bool,

    /// Let requests through when Redis is unreachable
    #[arg(long, env = "RATE_LIMIT_FAIL_OPEN")]
    pub fail_open: bool,

    /// Address prefixes whose forwarded headers are trusted
    #[arg(
        long,
        env = "TRUSTED_PROXIES",
        value_delimiter = ',',
        default_value = "172.,10.,192.168."
    )]
    pub trusted_proxies: Vec<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    /// The values used when neither flags nor the environment set anything.
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_requests: DEFAULT_MAX_REQUESTS,
            window_secs: DEFAULT_WINDOW_SECS,
            fixed_window: false,
            fail_open: false,
            trusted_proxies: TrustedProxies::default().prefixes().to_vec(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `.env`, the environment and the command line.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        let config = match Self::try_parse() {
            Ok(config) => config,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                e.exit()
            }
            Err(e) => return Err(RateLimitError::Configuration(e.to_string())),
        };
        config.validated()
    }

    pub fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(|e| RateLimitError::Configuration(e.to_string()))?;
        Ok(self)
    }

    pub fn window_mode(&self) -> WindowMode {
        if self.fixed_window {
            WindowMode::Fixed
        } else {
            WindowMode::Refreshing
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        if self.fail_open {
            FailurePolicy::FailOpen
        } else {
            FailurePolicy::FailClosed
        }
    }

    /// Prefixes whose forwarded headers are trusted, shared by the rate
    /// limiter and the request log.
    pub fn trusted(&self) -> TrustedProxies {
        TrustedProxies::new(self.trusted_proxies.iter().cloned())
    }

    /// Rate limit builder preloaded with these settings; the store is still
    /// to be provided.
    pub fn rate_limit(&self) -> RateLimit {
        RateLimit::builder()
            .max_requests(self.max_requests)
            .window_secs(self.window_secs)
            .window_mode(self.window_mode())
            .failure_policy(self.failure_policy())
            .trusted_proxies(self.trusted())
    }
}

fn validate_redis_url(url: &str) -> std::result::Result<(), ValidationError> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        Ok(())
    } else {
        Err(ValidationError::new("redis_url_scheme"))
    }
}
