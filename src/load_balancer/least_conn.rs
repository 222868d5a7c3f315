//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::context::RequestContext;
use crate::load_balancer::Balancer;
use crate::upstream::{ServerRef, VecPool};

/// Least connections selector.
/// Selects the server with the fewest in-flight requests. Ties keep the
/// snapshot order (weight, then id), so equal loads always resolve the same way.
#[derive(Debug, Default)]
pub struct LeastConn {
    scratch: VecPool<(u64, usize)>,
}

impl LeastConn {
    pub const POLICY: &'static str = "least_conn";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for LeastConn {
    fn policy(&self) -> &str {
        Self::POLICY
    }

    fn select(&self, _ctx: &RequestContext, servers: &[ServerRef]) -> Option<ServerRef> {
        if servers.is_empty() {
            return None;
        }

        let mut loads = self.scratch.get(servers.len());
        loads.extend(
            servers
                .iter()
                .enumerate()
                .map(|(idx, s)| (s.runtime_state().current, idx)),
        );
        // Stable: equal loads stay in snapshot order.
        loads.sort_by_key(|&(current, _)| current);
        let (_, idx) = loads[0];
        self.scratch.put(loads);

        Some(Arc::clone(&servers[idx]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StaticServer;

    #[test]
    fn test_least_conn() {
        let lb = LeastConn::new();
        let ctx = RequestContext::new();
        let a = StaticServer::new("a", 1);
        let b = StaticServer::new("b", 1);
        let c = StaticServer::new("c", 1);
        a.set_in_flight(5);
        b.set_in_flight(1);
        c.set_in_flight(3);
        let servers: Vec<ServerRef> = vec![a.clone(), b.clone(), c.clone()];

        for _ in 0..10 {
            assert_eq!(lb.select(&ctx, &servers).unwrap().id(), "b");
        }

        b.set_in_flight(4);
        assert_eq!(lb.select(&ctx, &servers).unwrap().id(), "c");
    }

    #[test]
    fn test_ties_are_stable() {
        let lb = LeastConn::new();
        let ctx = RequestContext::new();
        let servers: Vec<ServerRef> = ["x", "y", "z"]
            .iter()
            .map(|id| {
                let s = StaticServer::new(id, 1);
                s.set_in_flight(2);
                s.into_ref()
            })
            .collect();

        for _ in 0..10 {
            assert_eq!(lb.select(&ctx, &servers).unwrap().id(), "x");
        }
    }

    #[test]
    fn test_scratch_is_reused() {
        let lb = LeastConn::new();
        let ctx = RequestContext::new();
        let servers: Vec<ServerRef> = vec![StaticServer::new("a", 1), StaticServer::new("b", 1)]
            .into_iter()
            .map(StaticServer::into_ref)
            .collect();
        lb.select(&ctx, &servers);
        lb.select(&ctx, &servers);
        assert_eq!(lb.scratch.idle(), 1);
    }
}
