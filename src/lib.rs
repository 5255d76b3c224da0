pub mod client_ip;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod server;
pub mod store;

pub use client_ip::TrustedProxies;
pub use config::Config;
pub use error::{RateLimitError, Result};
pub use key_generator::{bucket_key, request_path, ClientIpSelector, KeySelector};
pub use middleware::{ClientIp, RateLimitLayer, RateLimitService};
pub use rate_limit_config::{FailurePolicy, RateLimit, RateLimitRule, RejectionHandler, TooManyRequests};
pub use rate_limiter::{Decision, RateLimiter};
pub use server::create_app;
pub use store::{CounterStore, MemoryStore, RedisStore, WindowMode};
