//! Upstream server abstraction and registry.
//!
//! # Data Flow
//! ```text
//! config / deployment tooling
//!     → http.rs (HttpBackend: one Server per backend endpoint)
//!     → registry.rs (ServersManager: entries + published snapshots)
//!     → ServerDiscovery (online / offline / all views)
//!     → load balancer selects from the online view
//! ```
//!
//! # Design Decisions
//! - Servers are immutable handles; status lives on the registry entry
//! - Snapshots are sorted by (weight, id) so index-based policies are stable
//! - Readers load snapshots without taking the registry lock

pub mod http;
pub mod pool;
pub mod registry;

pub use self::http::HttpBackend;
pub use self::pool::VecPool;
pub use self::registry::ServersManager;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::Result;
use crate::health::HealthCheckInfo;

/// Shared handle to a server.
pub type ServerRef = Arc<dyn Server>;

/// An immutable, published list of servers.
pub type Servers = Arc<Vec<ServerRef>>;

/// Runtime counters of a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RuntimeState {
    /// Requests dispatched to the server.
    pub total: u64,
    /// Requests that completed without a forwarding error.
    pub success: u64,
    /// Requests currently in flight.
    pub current: u64,
}

/// Registry-owned status of a server.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Online = 0,
    Offline = 1,
}

impl ServerStatus {
    pub fn from_online(online: bool) -> Self {
        if online {
            ServerStatus::Online
        } else {
            ServerStatus::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == ServerStatus::Online
    }
}

impl From<u8> for ServerStatus {
    fn from(val: u8) -> Self {
        match val {
            0 => ServerStatus::Online,
            _ => ServerStatus::Offline,
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Online => f.write_str("online"),
            ServerStatus::Offline => f.write_str("offline"),
        }
    }
}

/// One backend endpoint.
#[async_trait]
pub trait Server: Send + Sync {
    /// Stable identifier, unique within a registry.
    fn id(&self) -> &str;

    /// Static weight used by weighted policies.
    fn weight(&self) -> u32 {
        1
    }

    fn runtime_state(&self) -> RuntimeState {
        RuntimeState::default()
    }

    /// Probe the server. Deadlines are enforced by the caller.
    async fn check(&self, info: &HealthCheckInfo) -> Result<()>;

    /// Dispatch the request held by `ctx`, writing the outcome back into it.
    async fn serve(&self, ctx: &mut RequestContext) -> Result<()>;
}

impl fmt::Debug for dyn Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id())
            .field("weight", &self.weight())
            .finish()
    }
}

/// Weight used by every weighted policy; zero counts as one.
pub fn effective_weight(server: &dyn Server) -> u32 {
    server.weight().max(1)
}

/// A source of server snapshots, partitioned by status.
pub trait ServerDiscovery: Send + Sync {
    fn on_servers(&self) -> Servers;

    fn off_servers(&self) -> Servers;

    fn all_servers(&self) -> Servers;

    fn online_num(&self) -> usize {
        self.on_servers().len()
    }
}

/// A fixed list of online servers.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    servers: Servers,
    empty: Servers,
}

impl StaticDiscovery {
    pub fn new(servers: Vec<ServerRef>) -> Self {
        Self {
            servers: Arc::new(servers),
            empty: Arc::new(Vec::new()),
        }
    }
}

impl ServerDiscovery for StaticDiscovery {
    fn on_servers(&self) -> Servers {
        Arc::clone(&self.servers)
    }

    fn off_servers(&self) -> Servers {
        Arc::clone(&self.empty)
    }

    fn all_servers(&self) -> Servers {
        Arc::clone(&self.servers)
    }
}
