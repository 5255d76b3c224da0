//! Client identity resolution for bucketing requests.
//!
//! The resolved identity is the connection's IP address, unless the
//! connection comes from a trusted proxy range, in which case the address the
//! proxy reports in `CF-Connecting-IP` or `X-Forwarded-For` is used instead.
//!
//! Trusting forwarded headers only for private prefixes keeps public clients
//! from spoofing their identity directly, but any host inside those ranges can
//! still claim an arbitrary address. Deploy accordingly.

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use std::net::SocketAddr;

pub const CF_CONNECTING_IP: &str = "cf-connecting-ip";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Identity used when the host did not record a connection address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Address prefixes whose forwarded headers are taken at face value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedProxies {
    prefixes: Vec<String>,
}

impl TrustedProxies {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Trust nobody; every request is identified by its connection address.
    pub fn none() -> Self {
        Self { prefixes: Vec::new() }
    }

    pub fn is_trusted(&self, address: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| address.starts_with(prefix.as_str()))
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

impl Default for TrustedProxies {
    /// Docker bridge networks, tunnel daemons on `10.0.0.0/8`, and local
    /// IPv4 networks.
    fn default() -> Self {
        Self::new(["172.", "10.", "192.168."])
    }
}

/// Resolve the identity of the requester from its connection address and
/// headers.
pub fn resolve_client_ip(
    remote_address: Option<&str>,
    headers: &HeaderMap,
    trusted: &TrustedProxies,
) -> String {
    let remote = match remote_address {
        Some(address) if !address.is_empty() => address,
        _ => UNKNOWN_CLIENT,
    };

    if trusted.is_trusted(remote) {
        let forwarded = [CF_CONNECTING_IP, X_FORWARDED_FOR].into_iter().find_map(|name| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
        });
        if let Some(forwarded) = forwarded {
            return forwarded.to_string();
        }
    }

    remote.to_string()
}

/// Client IP of an axum request.
///
/// The connection address comes from the [`ConnectInfo`] extension, so the
/// app must be served with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn client_ip(request: &Request, trusted: &TrustedProxies) -> String {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    resolve_client_ip(remote.as_deref(), request.headers(), trusted)
}
