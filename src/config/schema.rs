//! Configuration schema definitions.
//!
//! Every section is defaulted so a minimal file only lists upstreams and routes.

use std::time::Duration;

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::health::HealthCheckInfo;
use crate::load_balancer::RetryDelay;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct EdgeConfig {
    /// Public listener settings.
    pub listener: ListenerConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Operational HTTP surface.
    pub admin: AdminConfig,

    /// Request context recycling.
    pub context_pool: ContextPoolConfig,

    /// Upstream pools, each with its own policy and health checker.
    pub upstreams: Vec<UpstreamConfig>,

    /// Routes mapping requests to upstreams.
    pub routes: Vec<RouteConfig>,
}

impl EdgeConfig {
    pub fn upstream(&self, name: &str) -> Option<&UpstreamConfig> {
        self.upstreams.iter().find(|u| u.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest request body buffered for forwarding, in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    /// Admin API bind address.
    pub bind_address: String,

    /// Bearer token; empty disables authentication.
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
            api_key: String::new(),
        }
    }
}

/// Request context pool sizing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ContextPoolConfig {
    /// Initial capacity of each context's value map.
    pub data_capacity: usize,

    /// Idle contexts kept for reuse.
    pub max_idle: usize,
}

impl Default for ContextPoolConfig {
    fn default() -> Self {
        Self {
            data_capacity: crate::context::pool::DEFAULT_DATA_CAPACITY,
            max_idle: crate::context::pool::DEFAULT_MAX_IDLE,
        }
    }
}

/// One upstream pool.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Unique upstream name, referenced by routes.
    pub name: String,

    /// Balancer policy registered in the balancer registry.
    pub policy: String,

    /// Deadline for a whole forward including retries; 0 disables it.
    pub timeout_ms: u64,

    pub retry: RetryConfig,

    pub health_check: HealthCheckConfig,

    pub servers: Vec<ServerConfig>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            policy: "round_robin".to_string(),
            timeout_ms: 0,
            retry: RetryConfig::default(),
            health_check: HealthCheckConfig::default(),
            servers: Vec::new(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Backend server definition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Unique id within the upstream.
    pub id: String,

    /// Base URL (e.g., "http://127.0.0.1:3000").
    pub address: String,

    /// Weight for weighted policies (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,

    /// Delay before the first retry in milliseconds; 0 retries immediately.
    pub base_delay_ms: u64,

    /// Cap for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Double the delay on every retry instead of keeping it fixed.
    pub exponential: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_delay_ms: 0,
            max_delay_ms: 2000,
            exponential: false,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> RetryDelay {
        let base = Duration::from_millis(self.base_delay_ms);
        match (self.base_delay_ms, self.exponential) {
            (0, _) => RetryDelay::None,
            (_, false) => RetryDelay::Fixed(base),
            (_, true) => RetryDelay::Exponential {
                base,
                max: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            },
        }
    }
}

/// Active health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,

    /// Path to probe, relative to each server's base URL.
    pub path: String,

    /// Probe method (GET, HEAD, ...).
    pub method: String,

    pub interval_ms: u64,

    /// 0 falls back to the interval.
    pub timeout_ms: u64,

    /// Consecutive failures before marking a server offline.
    pub failure_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/health".to_string(),
            method: "GET".to_string(),
            interval_ms: 10_000,
            timeout_ms: 5_000,
            failure_threshold: 3,
        }
    }
}

impl HealthCheckConfig {
    /// Probe settings; a disabled check yields a zero (inactive) info.
    ///
    /// The method is checked by validation; an unparsable one falls back to GET.
    pub fn to_info(&self) -> HealthCheckInfo {
        if !self.enabled {
            return HealthCheckInfo::default();
        }
        let method = probe_method(&self.method).unwrap_or_default();
        HealthCheckInfo::new(
            Duration::from_millis(self.interval_ms),
            Duration::from_millis(self.timeout_ms),
            self.failure_threshold,
        )
        .with_path(self.path.clone())
        .with_method(method)
    }
}

/// Standard HTTP method named by `raw`, case-insensitive.
pub fn probe_method(raw: &str) -> Option<Method> {
    let method = Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).ok()?;
    match method {
        Method::GET
        | Method::HEAD
        | Method::POST
        | Method::PUT
        | Method::DELETE
        | Method::OPTIONS
        | Method::PATCH
        | Method::TRACE => Some(method),
        _ => None,
    }
}

/// Route configuration mapping requests to upstreams.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Route identifier for logging.
    pub name: String,

    /// Host header to match (exact, case-insensitive, port ignored).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Upstream name to forward to.
    pub upstream: String,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}
