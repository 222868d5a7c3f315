//! Smooth weighted round-robin.
//!
//! Each selection adds every server's weight to its running accumulator,
//! picks the largest accumulator and subtracts the total weight from the
//! winner. Over one cycle of `total weight` calls every server is picked
//! exactly `weight` times, interleaved rather than in bursts.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::RequestContext;
use crate::load_balancer::Balancer;
use crate::upstream::{effective_weight, ServerRef};

/// Selections between sweeps of accumulators for departed servers.
const GC_EVERY: u64 = 1000;

#[derive(Debug, Default)]
struct State {
    current: HashMap<String, i64>,
    selections: u64,
}

/// Weighted round-robin selector.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    state: Mutex<State>,
}

impl WeightedRoundRobin {
    pub const POLICY: &'static str = "weight_round_robin";

    pub fn new() -> Self {
        Self::default()
    }

    /// Number of servers with a live accumulator.
    pub fn tracked(&self) -> usize {
        self.state.lock().current.len()
    }
}

impl Balancer for WeightedRoundRobin {
    fn policy(&self) -> &str {
        Self::POLICY
    }

    fn select(&self, _ctx: &RequestContext, servers: &[ServerRef]) -> Option<ServerRef> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut total: i64 = 0;
        let mut best: Option<(usize, i64)> = None;

        for (idx, server) in servers.iter().enumerate() {
            let weight = i64::from(effective_weight(server.as_ref()));
            total += weight;

            let acc = match state.current.get_mut(server.id()) {
                Some(acc) => {
                    *acc += weight;
                    *acc
                }
                None => {
                    state.current.insert(server.id().to_string(), weight);
                    weight
                }
            };
            if best.map_or(true, |(_, max)| acc > max) {
                best = Some((idx, acc));
            }
        }

        let (idx, _) = best?;
        let winner = &servers[idx];
        if let Some(acc) = state.current.get_mut(winner.id()) {
            *acc -= total;
        }

        state.selections = state.selections.wrapping_add(1);
        if state.selections % GC_EVERY == 0 {
            state
                .current
                .retain(|id, _| servers.iter().any(|s| s.id() == id));
        }
        Some(Arc::clone(winner))
    }
}
