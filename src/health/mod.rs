//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! checker.rs (one task per server)
//!     → Server::check with a per-probe deadline
//!     → state.rs (consecutive failure counting, transitions)
//!     → on transition: every Updater.set_server_online(id, online)
//!     → LoadBalancer flips the registry entry and republishes
//! ```
//!
//! # Design Decisions
//! - Probes never surface errors synchronously; only transitions leave the checker
//! - A panicking probe counts as one failure and never stops its loop
//! - Updaters are named so several pools can follow one checker

pub mod checker;
pub mod state;

pub use checker::HealthChecker;
pub use state::ProbeState;

use std::time::Duration;

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::upstream::ServerRef;

/// Sink for server membership and health transitions.
pub trait Updater: Send + Sync {
    fn upsert_server(&self, server: ServerRef);

    fn remove_server(&self, id: &str);

    fn set_server_online(&self, id: &str, online: bool);
}

/// Probe configuration for one checking scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckInfo {
    /// Path appended to the server's base address.
    pub path: String,
    /// Probe method.
    #[serde(with = "method_serde")]
    pub method: Method,
    /// Consecutive failures before a server is marked offline.
    pub failure_threshold: u32,
    /// Per-probe deadline; zero falls back to the interval.
    pub timeout: Duration,
    /// Delay between probes; zero disables checking.
    pub interval: Duration,
}

impl HealthCheckInfo {
    pub fn new(interval: Duration, timeout: Duration, failure_threshold: u32) -> Self {
        Self {
            interval,
            timeout,
            failure_threshold,
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// No health checking is configured.
    pub fn is_zero(&self) -> bool {
        self.interval.is_zero()
    }

    pub fn threshold(&self) -> u32 {
        self.failure_threshold.max(1)
    }

    pub fn probe_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            self.interval
        } else {
            self.timeout
        }
    }
}

impl Default for HealthCheckInfo {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            method: Method::GET,
            failure_threshold: 1,
            timeout: Duration::ZERO,
            interval: Duration::ZERO,
        }
    }
}

mod method_serde {
    use axum::http::Method;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(method: &Method, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(method.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Method, D::Error> {
        let raw = String::deserialize(d)?;
        Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).map_err(D::Error::custom)
    }
}
