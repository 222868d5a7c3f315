//! Balancer construction by policy name.
//!
//! # Design Decisions
//! - The registry is an explicit object; `global()` is only a convenience
//!   default pre-loaded with the built-in policies
//! - Builders are plain closures so callers can register policies that
//!   capture their own state (e.g. a `ConsistentHash` key function)

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::config::{RetryConfig, UpstreamConfig};
use crate::error::{Error, Result};
use crate::load_balancer::{
    Balancer, LeastConn, Random, Retry, RoundRobin, SourceIpHash, WeightedRandom,
    WeightedRoundRobin,
};

/// Per-upstream options handed to a builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalancerConfig {
    pub retry: RetryConfig,
}

impl From<&UpstreamConfig> for BalancerConfig {
    fn from(upstream: &UpstreamConfig) -> Self {
        Self {
            retry: upstream.retry.clone(),
        }
    }
}

/// Constructs a fresh balancer instance.
pub type BuildFn = Arc<dyn Fn(&BalancerConfig) -> Result<Arc<dyn Balancer>> + Send + Sync>;

/// Named balancer builders.
pub struct BalancerRegistry {
    builders: RwLock<HashMap<String, BuildFn>>,
}

impl BalancerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            builders: RwLock::new(HashMap::new()),
        }
    }

    /// A registry holding the built-in policies.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(RoundRobin::POLICY, |_| Ok(Arc::new(RoundRobin::new())));
        registry.register(WeightedRoundRobin::POLICY, |_| {
            Ok(Arc::new(WeightedRoundRobin::new()))
        });
        registry.register(Random::POLICY, |_| Ok(Arc::new(Random::new())));
        registry.register(WeightedRandom::POLICY, |_| Ok(Arc::new(WeightedRandom::new())));
        registry.register(SourceIpHash::POLICY, |_| Ok(Arc::new(SourceIpHash::new())));
        registry.register(LeastConn::POLICY, |_| Ok(Arc::new(LeastConn::new())));
        registry
    }

    /// Process-wide registry with the built-in policies.
    pub fn global() -> &'static BalancerRegistry {
        static GLOBAL: OnceLock<BalancerRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::with_builtins)
    }

    /// Register `build` under `policy`, replacing any previous builder.
    pub fn register<F>(&self, policy: impl Into<String>, build: F)
    where
        F: Fn(&BalancerConfig) -> Result<Arc<dyn Balancer>> + Send + Sync + 'static,
    {
        let policy = policy.into();
        tracing::debug!(policy = %policy, "Registered balancer policy");
        self.builders.write().insert(policy, Arc::new(build));
    }

    /// Returns true if a builder was removed.
    pub fn unregister(&self, policy: &str) -> bool {
        self.builders.write().remove(policy).is_some()
    }

    pub fn contains(&self, policy: &str) -> bool {
        self.builders.read().contains_key(policy)
    }

    /// Registered policy names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builders.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a balancer for `policy`, wrapped in [`Retry`] when retries are enabled.
    pub fn build(&self, policy: &str, config: &BalancerConfig) -> Result<Arc<dyn Balancer>> {
        // Clone the builder out so it runs without the lock held.
        let build = self
            .builders
            .read()
            .get(policy)
            .cloned()
            .ok_or_else(|| Error::UnknownPolicy(policy.to_string()))?;

        let balancer = build(config)?;
        if !config.retry.enabled {
            return Ok(balancer);
        }
        Ok(Arc::new(Retry::new(balancer).with_delay(config.retry.delay())))
    }
}

impl Default for BalancerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for BalancerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalancerRegistry")
            .field("policies", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::ConsistentHash;

    #[test]
    fn test_builtin_names() {
        let registry = BalancerRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec![
                "least_conn",
                "random",
                "round_robin",
                "source_ip_hash",
                "weight_random",
                "weight_round_robin",
            ]
        );
        assert!(BalancerRegistry::global().contains("round_robin"));
        assert!(BalancerRegistry::new().names().is_empty());
    }

    #[test]
    fn test_build_and_unknown_policy() {
        let registry = BalancerRegistry::with_builtins();
        let lb = registry
            .build("weight_round_robin", &BalancerConfig::default())
            .unwrap();
        assert_eq!(lb.policy(), "weight_round_robin");

        let err = registry
            .build("fastest", &BalancerConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownPolicy(name) if name == "fastest"));
    }

    #[test]
    fn test_retry_wrapping() {
        let registry = BalancerRegistry::with_builtins();
        let config = BalancerConfig {
            retry: RetryConfig {
                enabled: true,
                ..RetryConfig::default()
            },
        };
        let lb = registry.build("least_conn", &config).unwrap();
        assert_eq!(lb.policy(), "retry_least_conn");
    }

    #[test]
    fn test_register_custom_and_unregister() {
        let registry = BalancerRegistry::new();
        registry.register("tenant_hash", |_| {
            Ok(Arc::new(ConsistentHash::new("tenant_hash", |ctx| {
                ctx.get("tenant").and_then(|v| v.as_u64())
            })))
        });
        assert!(registry.contains("tenant_hash"));
        assert_eq!(
            registry
                .build("tenant_hash", &BalancerConfig::default())
                .unwrap()
                .policy(),
            "tenant_hash"
        );

        assert!(registry.unregister("tenant_hash"));
        assert!(!registry.unregister("tenant_hash"));
        assert!(!registry.contains("tenant_hash"));
    }
}
