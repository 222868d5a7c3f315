//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing upstreams)
//! - Check policies against the balancer registry
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function of the config and the registry

use std::collections::HashSet;

use url::Url;

use crate::config::schema::{probe_method, EdgeConfig};
use crate::load_balancer::BalancerRegistry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("upstream #{0} has an empty name")]
    EmptyUpstreamName(usize),

    #[error("upstream `{0}` is defined more than once")]
    DuplicateUpstream(String),

    #[error("upstream `{upstream}` defines server `{server}` more than once")]
    DuplicateServer { upstream: String, server: String },

    #[error("upstream `{upstream}` has an empty server id")]
    EmptyServerId { upstream: String },

    #[error("server `{server}` in upstream `{upstream}` has invalid address `{address}`")]
    InvalidAddress {
        upstream: String,
        server: String,
        address: String,
    },

    #[error("upstream `{upstream}` uses unknown policy `{policy}`")]
    UnknownPolicy { upstream: String, policy: String },

    #[error("upstream `{upstream}` uses unknown health check method `{method}`")]
    UnknownMethod { upstream: String, method: String },

    #[error("route `{route}` references unknown upstream `{upstream}`")]
    UnknownUpstream { route: String, upstream: String },
}

/// Validate `config`, returning every problem found.
pub fn validate_config(
    config: &EdgeConfig,
    registry: &BalancerRegistry,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut upstreams = HashSet::new();

    for (idx, upstream) in config.upstreams.iter().enumerate() {
        if upstream.name.is_empty() {
            errors.push(ValidationError::EmptyUpstreamName(idx));
        } else if !upstreams.insert(upstream.name.as_str()) {
            errors.push(ValidationError::DuplicateUpstream(upstream.name.clone()));
        }

        if !registry.contains(&upstream.policy) {
            errors.push(ValidationError::UnknownPolicy {
                upstream: upstream.name.clone(),
                policy: upstream.policy.clone(),
            });
        }

        if upstream.health_check.enabled && probe_method(&upstream.health_check.method).is_none() {
            errors.push(ValidationError::UnknownMethod {
                upstream: upstream.name.clone(),
                method: upstream.health_check.method.clone(),
            });
        }

        let mut ids = HashSet::new();
        for server in &upstream.servers {
            if server.id.is_empty() {
                errors.push(ValidationError::EmptyServerId {
                    upstream: upstream.name.clone(),
                });
            } else if !ids.insert(server.id.as_str()) {
                errors.push(ValidationError::DuplicateServer {
                    upstream: upstream.name.clone(),
                    server: server.id.clone(),
                });
            }

            if !is_valid_address(&server.address) {
                errors.push(ValidationError::InvalidAddress {
                    upstream: upstream.name.clone(),
                    server: server.id.clone(),
                    address: server.address.clone(),
                });
            }
        }
    }

    for route in &config.routes {
        if !upstreams.contains(route.upstream.as_str()) {
            errors.push(ValidationError::UnknownUpstream {
                route: route.name.clone(),
                upstream: route.upstream.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_valid_address(address: &str) -> bool {
    match Url::parse(address) {
        Ok(url) => matches!(url.scheme(), "http") && url.host_str().is_some(),
        Err(_) => false,
    }
}
