//! Random and weighted random strategies.
//!
//! Both draw from `fastrand`'s thread-local generator, so concurrent callers
//! never contend on a shared source.

use std::sync::Arc;

use crate::context::RequestContext;
use crate::load_balancer::Balancer;
use crate::upstream::{effective_weight, ServerRef};

/// Uniform random selector.
#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub const POLICY: &'static str = "random";

    pub fn new() -> Self {
        Self
    }
}

impl Balancer for Random {
    fn policy(&self) -> &str {
        Self::POLICY
    }

    fn select(&self, _ctx: &RequestContext, servers: &[ServerRef]) -> Option<ServerRef> {
        pick_uniform(servers)
    }
}

/// Random selector biased by server weight.
#[derive(Debug, Default)]
pub struct WeightedRandom;

impl WeightedRandom {
    pub const POLICY: &'static str = "weight_random";

    pub fn new() -> Self {
        Self
    }
}

impl Balancer for WeightedRandom {
    fn policy(&self) -> &str {
        Self::POLICY
    }

    fn select(&self, _ctx: &RequestContext, servers: &[ServerRef]) -> Option<ServerRef> {
        let total: u64 = servers
            .iter()
            .map(|s| u64::from(effective_weight(s.as_ref())))
            .sum();
        if total == 0 {
            return pick_uniform(servers);
        }

        let draw = fastrand::u64(0..total);
        let mut acc = 0u64;
        for server in servers {
            acc += u64::from(effective_weight(server.as_ref()));
            if draw < acc {
                return Some(Arc::clone(server));
            }
        }
        servers.last().cloned()
    }
}

pub(crate) fn pick_uniform(servers: &[ServerRef]) -> Option<ServerRef> {
    if servers.is_empty() {
        return None;
    }
    Some(Arc::clone(&servers[fastrand::usize(..servers.len())]))
}
