//! Key generation utilities for rate limiting.

use crate::client_ip::{client_ip, TrustedProxies};
use axum::extract::{OriginalUri, Request};

/// Namespace every counter key lives under.
pub const KEY_PREFIX: &str = "ratelimit";

/// Build the counter key for a request path and a client identity.
///
/// Neither part is escaped, so a `:` inside the path or the identity (IPv6
/// addresses, custom selectors) can make two different pairs share a key.
pub fn bucket_key(path: &str, identity: &str) -> String {
    format!("{}:{}:{}", KEY_PREFIX, path, identity)
}

/// Path component of the bucket key: the full request path as the client
/// sent it.
///
/// Routers nested with `Router::nest` see their prefix stripped from
/// `uri()`, so the path comes from [`OriginalUri`] when axum recorded one.
pub fn request_path(request: &Request) -> String {
    request
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.path())
        .unwrap_or_else(|| request.uri().path())
        .to_string()
}

/// Derives the string that identifies the requester of a request.
///
/// Implementations must be pure and always return a value; an empty string
/// buckets the request together with every other empty-identity request.
pub trait KeySelector: Send + Sync {
    fn select(&self, request: &Request) -> String;
}

impl<F> KeySelector for F
where
    F: Fn(&Request) -> String + Send + Sync,
{
    fn select(&self, request: &Request) -> String {
        self(request)
    }
}

/// Default selector: the client IP, honouring forwarded headers from trusted
/// proxies.
#[derive(Debug, Clone, Default)]
pub struct ClientIpSelector {
    trusted: TrustedProxies,
}

impl ClientIpSelector {
    pub fn new(trusted: TrustedProxies) -> Self {
        Self { trusted }
    }

    pub fn trusted_proxies(&self) -> &TrustedProxies {
        &self.trusted
    }
}

impl KeySelector for ClientIpSelector {
    fn select(&self, request: &Request) -> String {
        client_ip(request, &self.trusted)
    }
}
