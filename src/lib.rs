//! Edge proxy library: upstream registries, load balancing policies,
//! active health checking and the HTTP boundary around them.

pub mod admin;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod routing;
pub mod upstream;

#[cfg(test)]
mod test_support;

pub use config::EdgeConfig;
pub use context::{ContextPool, RequestContext};
pub use error::{Error, ErrorKind, Result};
pub use health::{HealthCheckInfo, HealthChecker, Updater};
pub use http::HttpServer;
pub use lifecycle::Gateway;
pub use load_balancer::{Balancer, BalancerRegistry, LoadBalancer};
pub use upstream::{Server, ServerDiscovery, ServerRef, ServerStatus, ServersManager};
