//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::load_balancer::Balancer;
use crate::upstream::ServerRef;

/// Round-robin selector.
/// A single wrapping counter indexes into the current snapshot.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub const POLICY: &'static str = "round_robin";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for RoundRobin {
    fn policy(&self) -> &str {
        Self::POLICY
    }

    fn select(&self, _ctx: &RequestContext, servers: &[ServerRef]) -> Option<ServerRef> {
        if servers.is_empty() {
            return None;
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(&servers[n % servers.len()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StaticServer;
    use std::collections::HashMap;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let ctx = RequestContext::new();
        let servers: Vec<ServerRef> = ["a", "b", "c"]
            .iter()
            .map(|id| StaticServer::new(id, 1).into_ref())
            .collect();

        let picks: Vec<String> = (0..4)
            .map(|_| lb.select(&ctx, &servers).unwrap().id().to_string())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_equal_visits_per_cycle() {
        let lb = RoundRobin::new();
        let ctx = RequestContext::new();
        let servers: Vec<ServerRef> = (0..5)
            .map(|i| StaticServer::new(&format!("s{i}"), 1).into_ref())
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..5 * 7 {
            let s = lb.select(&ctx, &servers).unwrap();
            *counts.entry(s.id().to_string()).or_default() += 1;
        }
        assert_eq!(counts.len(), 5);
        assert!(counts.values().all(|&c| c == 7));
    }

    #[test]
    fn test_counter_wraps() {
        let lb = RoundRobin {
            counter: AtomicUsize::new(usize::MAX),
        };
        let ctx = RequestContext::new();
        let servers: Vec<ServerRef> = vec![StaticServer::new("a", 1), StaticServer::new("b", 1)]
            .into_iter()
            .map(StaticServer::into_ref)
            .collect();
        assert!(lb.select(&ctx, &servers).is_some());
        assert_eq!(lb.select(&ctx, &servers).unwrap().id(), "a");
    }
}
