//! Route matching logic.
//!
//! # Design Decisions
//! - Host matching is case-insensitive and ignores the port
//! - Path matching is case-sensitive
//! - A route without conditions matches everything

use axum::http::{header, request::Parts};

/// A condition evaluated against a request head.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    fn matches(&self, parts: &Parts) -> bool;
}

/// Host of the request without its port, from the `Host` header or the URI.
pub fn request_host(parts: &Parts) -> Option<&str> {
    let raw = parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| parts.uri.host())?;
    Some(strip_port(raw))
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // [v6]:port
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase, without a port.
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            expected_host: strip_port(&host).to_ascii_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, parts: &Parts) -> bool {
        request_host(parts).is_some_and(|h| h.eq_ignore_ascii_case(&self.expected_host))
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, parts: &Parts) -> bool {
        parts.uri.path().starts_with(&self.prefix)
    }
}
