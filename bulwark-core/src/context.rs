//! Per-request caller context.
//!
//! A [`RequestContext`] is built once by the ingress layer for each inbound call
//! and passed explicitly to every guard and audit operation. It is an owned
//! value: nothing is stored in ambient or thread-local state, so a context can
//! never outlive the request that produced it or leak onto another request
//! served by the same worker.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Placeholder recorded when no client address can be resolved.
pub const UNKNOWN_CLIENT_IP: &str = "unknown";

/// Headers consulted for the client address, highest priority first.
///
/// `X-Forwarded-For` may hold a comma separated chain; only the first hop
/// (the original client) is used.
pub const FORWARDED_IP_HEADERS: &[&str] = &[
    "X-Forwarded-For",
    "X-Real-IP",
    "Proxy-Client-IP",
    "WL-Proxy-Client-IP",
    "HTTP_X_FORWARDED_FOR",
    "HTTP_X_FORWARDED",
    "HTTP_X_CLUSTER_CLIENT_IP",
    "HTTP_CLIENT_IP",
    "HTTP_FORWARDED_FOR",
    "HTTP_FORWARDED",
    "HTTP_VIA",
    "REMOTE_ADDR",
];

/// Resolved client information for one inbound call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    client_ip: String,
    user_agent: Option<String>,
    principal: Option<String>,
}

impl RequestContext {
    pub fn new(client_ip: impl Into<String>, user_agent: Option<String>) -> Self {
        let client_ip = client_ip.into();
        let client_ip = if client_ip.trim().is_empty() {
            UNKNOWN_CLIENT_IP.to_string()
        } else {
            client_ip
        };

        Self {
            client_ip,
            user_agent: user_agent.filter(|ua| !ua.trim().is_empty()),
            principal: None,
        }
    }

    /// Build a context from request headers and the transport peer address.
    ///
    /// `header` is a case-insensitive header lookup supplied by the ingress
    /// framework.
    pub fn from_headers<'a, F>(header: F, peer: Option<SocketAddr>) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let client_ip = resolve_client_ip(&header, peer);
        let user_agent = header("User-Agent").map(str::to_string);
        Self::new(client_ip, user_agent)
    }

    /// Attach the authenticated principal making this call.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }
}

/// Resolve the best-effort client IP.
///
/// Walks [`FORWARDED_IP_HEADERS`] in order, skipping blank values and the
/// literal `unknown` some proxies emit, then falls back to the peer address.
pub fn resolve_client_ip<'a, F>(header: F, peer: Option<SocketAddr>) -> String
where
    F: Fn(&str) -> Option<&'a str>,
{
    FORWARDED_IP_HEADERS
        .iter()
        .filter_map(|name| header(name))
        .filter_map(first_hop)
        .next()
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT_IP.to_string())
}

fn first_hop(value: &str) -> Option<String> {
    let candidate = value.split(',').next()?.trim();
    if candidate.is_empty() || candidate.eq_ignore_ascii_case(UNKNOWN_CLIENT_IP) {
        None
    } else {
        Some(candidate.to_string())
    }
}
