use crate::client_ip::TrustedProxies;
use crate::error::{RateLimitError, Result};
use crate::key_generator::{ClientIpSelector, KeySelector};
use crate::middleware::RateLimitLayer;
use crate::rate_limiter::RateLimiter;
use crate::store::{CounterStore, WindowMode};
use async_trait::async_trait;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Response;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_MAX_REQUESTS: u64 = 10;
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// What to do with a request when the counter store cannot be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Let the request through unlimited and log a warning.
    FailOpen,
    /// Answer `503 Service Unavailable` without running the handler.
    #[default]
    FailClosed,
}

/// Produces the response for a request that exceeded its limit.
///
/// `response` arrives as `429 Too Many Requests` with an empty body and the
/// `Retry-After` header already set; handlers may rewrite any part of it.
/// The handler receives the request head only, since the body is never read
/// for a rejected request.
///
/// Handlers may await, e.g. to record the rejection somewhere; plain
/// `Fn(&Parts, &mut Response)` closures are accepted as well.
#[async_trait]
pub trait RejectionHandler: Send + Sync {
    async fn on_rate_limited(&self, request: &Parts, response: &mut Response);
}

#[async_trait]
impl<F> RejectionHandler for F
where
    F: Fn(&Parts, &mut Response) + Send + Sync,
{
    async fn on_rate_limited(&self, request: &Parts, response: &mut Response) {
        self(request, response)
    }
}

/// Default rejection: `429 Too Many Requests` with no body.
#[derive(Debug, Clone, Copy, Default)]
pub struct TooManyRequests;

#[async_trait]
impl RejectionHandler for TooManyRequests {
    async fn on_rate_limited(&self, _request: &Parts, response: &mut Response) {
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    }
}

/// Limits attached to one protected scope.
#[derive(Clone)]
pub struct RateLimitRule {
    /// Requests admitted per key within one window.
    pub max_requests: u64,
    /// Window length; also the counter's time-to-live and the `Retry-After`
    /// value.
    pub window_secs: u64,
    pub window_mode: WindowMode,
    pub failure_policy: FailurePolicy,
    pub key_selector: Arc<dyn KeySelector>,
    pub on_rate_limited: Arc<dyn RejectionHandler>,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_secs: DEFAULT_WINDOW_SECS,
            window_mode: WindowMode::default(),
            failure_policy: FailurePolicy::default(),
            key_selector: Arc::new(ClientIpSelector::default()),
            on_rate_limited: Arc::new(TooManyRequests),
        }
    }
}

impl fmt::Debug for RateLimitRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitRule")
            .field("max_requests", &self.max_requests)
            .field("window_secs", &self.window_secs)
            .field("window_mode", &self.window_mode)
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}

impl RateLimitRule {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
            ..Self::default()
        }
    }

    /// Validate rule parameters
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(RateLimitError::Configuration(
                "max_requests must be greater than 0".to_string(),
            ));
        }
        if self.window_secs == 0 {
            return Err(RateLimitError::Configuration(
                "window_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for a [`RateLimitLayer`].
///
/// ```rust,ignore
/// let store = RedisStore::connect("redis://127.0.0.1:6379").await?;
/// let app = Router::new()
///     .route("/hello", get(hello))
///     .route_layer(
///         RateLimit::builder()
///             .store(store)
///             .max_requests(50)
///             .window_secs(30)
///             .build()?,
///     );
/// ```
#[derive(Default)]
pub struct RateLimit {
    store: Option<Arc<dyn CounterStore>>,
    rule: RateLimitRule,
}

impl RateLimit {
    pub fn builder() -> Self {
        Self::default()
    }

    /// Counter store shared by every instance enforcing this rule. Required.
    pub fn store(self, store: impl CounterStore + 'static) -> Self {
        self.shared_store(Arc::new(store))
    }

    pub fn shared_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn max_requests(mut self, max_requests: u64) -> Self {
        self.rule.max_requests = max_requests;
        self
    }

    pub fn window_secs(mut self, window_secs: u64) -> Self {
        self.rule.window_secs = window_secs;
        self
    }

    pub fn window_mode(mut self, window_mode: WindowMode) -> Self {
        self.rule.window_mode = window_mode;
        self
    }

    pub fn failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.rule.failure_policy = failure_policy;
        self
    }

    /// Identify clients by IP, trusting forwarded headers only from these
    /// prefixes.
    pub fn trusted_proxies(self, trusted: TrustedProxies) -> Self {
        self.key_selector(ClientIpSelector::new(trusted))
    }

    pub fn key_selector(mut self, selector: impl KeySelector + 'static) -> Self {
        self.rule.key_selector = Arc::new(selector);
        self
    }

    pub fn on_rate_limited(mut self, handler: impl RejectionHandler + 'static) -> Self {
        self.rule.on_rate_limited = Arc::new(handler);
        self
    }

    /// Finish the rule and wrap it in a layer.
    ///
    /// Fails when no store was provided or the limits are zero; the scope
    /// must not be served unprotected in that case.
    pub fn build(self) -> Result<RateLimitLayer> {
        let store = self.store.ok_or_else(|| {
            RateLimitError::Configuration("a counter store must be provided".to_string())
        })?;
        let limiter = RateLimiter::new(store, self.rule)?;
        Ok(RateLimitLayer::new(Arc::new(limiter)))
    }
}
