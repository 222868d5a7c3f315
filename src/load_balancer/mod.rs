//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! handler → facade.rs (LoadBalancer::serve)
//!     → discovery.on_servers() snapshot (empty → NoAvailableServers)
//!     → optional deadline for the whole forward
//!     → Balancer::forward:
//!         - one server: dispatch directly
//!         - otherwise: select() by policy, then Server::serve
//!     → retry.rs re-runs forward on failure with a fresh snapshot
//! ```
//!
//! # Design Decisions
//! - Selection is synchronous and separate from dispatch, so every policy
//!   shares the same fast paths
//! - Policies never look at server status; discovery already filtered it
//! - Weighted policies treat weight 0 as 1

pub mod builder;
pub mod facade;
pub mod hash;
pub mod least_conn;
pub mod random;
pub mod retry;
pub mod round_robin;
pub mod weighted_round_robin;

pub use builder::{BalancerConfig, BalancerRegistry, BuildFn};
pub use facade::LoadBalancer;
pub use hash::{ConsistentHash, SourceIpHash};
pub use least_conn::LeastConn;
pub use random::{Random, WeightedRandom};
pub use retry::{Retry, RetryDelay};
pub use round_robin::RoundRobin;
pub use weighted_round_robin::WeightedRoundRobin;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::upstream::{ServerDiscovery, ServerRef};

/// A server selection policy.
#[async_trait]
pub trait Balancer: Send + Sync {
    /// Stable policy name used for registration and metrics.
    fn policy(&self) -> &str;

    /// Pick a server from a non-empty, sorted snapshot.
    fn select(&self, ctx: &RequestContext, servers: &[ServerRef]) -> Option<ServerRef>;

    /// Forward the request to one of the online servers.
    async fn forward(&self, ctx: &mut RequestContext, discovery: &dyn ServerDiscovery) -> Result<()> {
        let servers = discovery.on_servers();
        let server = match servers.len() {
            0 => return Err(Error::NoAvailableServers),
            1 => servers[0].clone(),
            _ => self
                .select(ctx, &servers)
                .ok_or(Error::NoAvailableServers)?,
        };
        server.serve(ctx).await
    }
}

impl std::fmt::Debug for dyn Balancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Balancer").field("policy", &self.policy()).finish()
    }
}
