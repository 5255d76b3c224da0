use crate::client_ip::{client_ip, TrustedProxies};
use crate::error::RateLimitError;
use crate::key_generator::request_path;
use crate::rate_limit_config::FailurePolicy;
use crate::rate_limiter::{Decision, RateLimiter};
use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, request::Parts, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{error, info, warn};

/// Attaches a rate limit to a router scope.
///
/// Install with `Router::route_layer` to limit only matched routes, or
/// `Router::layer` to also count requests that end in a 404.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let limiter = self.limiter.clone();
        // Keep the service that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            // Resolve before awaiting; the request body is not `Sync`.
            let identity = limiter.identify(&request);
            let path = request_path(&request);

            match limiter.check(&path, &identity).await {
                Ok(Decision::Allowed { .. }) => inner.call(request).await,
                Ok(Decision::Limited {
                    retry_after_secs, ..
                }) => {
                    let (parts, _body) = request.into_parts();
                    Ok(reject(&limiter, &parts, retry_after_secs).await)
                }
                Err(err @ RateLimitError::MalformedCount { .. }) => {
                    error!(
                        target: "redis_ratelimit::middleware",
                        path = %path,
                        identity = %identity,
                        error = %err,
                        "Counter store returned a malformed count"
                    );
                    Ok(err.into_response())
                }
                Err(err) => match limiter.rule().failure_policy {
                    FailurePolicy::FailOpen => {
                        warn!(
                            target: "redis_ratelimit::middleware",
                            path = %path,
                            identity = %identity,
                            error = %err,
                            "Rate limit check failed, allowing request"
                        );
                        inner.call(request).await
                    }
                    FailurePolicy::FailClosed => {
                        error!(
                            target: "redis_ratelimit::middleware",
                            path = %path,
                            identity = %identity,
                            error = %err,
                            "Rate limit check failed, rejecting request"
                        );
                        Ok(err.into_response())
                    }
                },
            }
        })
    }
}

/// Build the rejection for a limited request: `Retry-After` first, then the
/// rule's handler.
async fn reject(limiter: &RateLimiter, request: &Parts, retry_after_secs: u64) -> Response {
    let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
    limiter
        .rule()
        .on_rate_limited
        .on_rate_limited(request, &mut response)
        .await;
    response
}

/// Client address resolved by [`logging_middleware`], available to handlers
/// through `Extension<ClientIp>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// Logging middleware for request/response tracking.
///
/// Install with `axum::middleware::from_fn_with_state` so the client address
/// is resolved against the same trusted proxies as the rate limiter.
pub async fn logging_middleware(
    State(trusted): State<TrustedProxies>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = client_ip(&request, &trusted);
    request
        .extensions_mut()
        .insert(ClientIp(client_ip.clone()));

    info!(
        target: "redis_ratelimit::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "redis_ratelimit::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}
