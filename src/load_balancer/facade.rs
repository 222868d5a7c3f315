//! A named load balancer bound to its server registry.
//!
//! # Responsibilities
//! - Own the registry of one upstream and expose its mutations
//! - Enforce the upstream's forward deadline
//! - Turn the outcome into an HTTP response and record it
//! - Follow a health checker as one of its updaters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use axum::body::Body;
use axum::http::{Response, StatusCode};
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::health::Updater;
use crate::http::response::{self, ErrorResponder};
use crate::load_balancer::Balancer;
use crate::observability::metrics;
use crate::upstream::{ServerDiscovery, ServerRef, ServerStatus, ServersManager};

/// Load balancer facade for one upstream.
pub struct LoadBalancer {
    name: String,
    balancer: ArcSwap<Arc<dyn Balancer>>,
    servers: Arc<ServersManager>,
    discovery: ArcSwapOption<Arc<dyn ServerDiscovery>>,
    timeout_ms: AtomicU64,
    responder: RwLock<ErrorResponder>,
}

impl LoadBalancer {
    pub fn new(name: impl Into<String>, balancer: Arc<dyn Balancer>) -> Self {
        Self {
            name: name.into(),
            balancer: ArcSwap::from_pointee(balancer),
            servers: Arc::new(ServersManager::new()),
            discovery: ArcSwapOption::empty(),
            timeout_ms: AtomicU64::new(0),
            responder: RwLock::new(response::default_responder()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Swap the policy. In-flight requests finish on the old one.
    pub fn set_balancer(&self, balancer: Arc<dyn Balancer>) {
        let old = self.balancer.swap(Arc::new(balancer));
        if old.policy() != self.balancer.load().policy() {
            tracing::info!(
                upstream = %self.name,
                from = %old.policy(),
                to = %self.balancer.load().policy(),
                "Balancer policy changed"
            );
        }
    }

    pub fn balancer(&self) -> Arc<dyn Balancer> {
        Arc::clone(&**self.balancer.load())
    }

    /// Replace where servers are read from; `None` restores the registry.
    pub fn set_discovery(&self, discovery: Option<Arc<dyn ServerDiscovery>>) {
        self.discovery.store(discovery.map(Arc::new));
    }

    pub fn discovery(&self) -> Arc<dyn ServerDiscovery> {
        match self.discovery.load_full() {
            Some(custom) => Arc::clone(custom.as_ref()),
            None => Arc::clone(&self.servers) as Arc<dyn ServerDiscovery>,
        }
    }

    /// Deadline for a whole forward, retries included. Zero disables it.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_error_responder(&self, responder: ErrorResponder) {
        *self.responder.write() = responder;
    }

    pub fn registry(&self) -> &Arc<ServersManager> {
        &self.servers
    }

    pub fn reset_servers(&self, servers: impl IntoIterator<Item = ServerRef>) {
        self.servers.reset_servers(servers);
    }

    pub fn upsert_servers(&self, servers: impl IntoIterator<Item = ServerRef>) {
        self.servers.upsert_servers(servers);
    }

    pub fn remove_server(&self, id: &str) {
        self.servers.remove_server(id);
    }

    pub fn set_server_status(&self, id: &str, status: ServerStatus) {
        self.servers.set_server_status(id, status);
    }

    /// Forward the request in `ctx` through the current balancer.
    pub async fn serve(&self, ctx: &mut RequestContext) -> Result<()> {
        let discovery = self.discovery();
        if discovery.online_num() == 0 {
            return Err(Error::NoAvailableServers);
        }
        let balancer = self.balancer();

        let timeout = self.timeout();
        if timeout.is_zero() {
            return balancer.forward(ctx, discovery.as_ref()).await;
        }

        // The tighter of the caller's deadline and ours; the caller's is restored after.
        let previous = ctx.deadline();
        let ours = Instant::now() + timeout;
        let deadline = previous.map_or(ours, |p| p.min(ours));
        ctx.set_deadline(Some(deadline));

        let result =
            match tokio::time::timeout_at(deadline, balancer.forward(ctx, discovery.as_ref())).await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout),
            };
        ctx.set_deadline(previous);
        result
    }

    /// Forward and build the client response, recording the outcome.
    pub async fn handle_http(&self, ctx: &mut RequestContext) -> Response<Body> {
        let start = std::time::Instant::now();
        let policy = self.balancer.load().policy().to_string();

        let response = match self.serve(ctx).await {
            Ok(()) => match ctx.response.take() {
                Some(response) => response,
                None => {
                    tracing::error!(upstream = %self.name, "Server completed without a response");
                    response::plain(StatusCode::BAD_GATEWAY)
                }
            },
            Err(err) => {
                tracing::warn!(
                    upstream = %self.name,
                    policy = %policy,
                    method = %ctx.method,
                    path = %ctx.uri.path(),
                    error = %err,
                    "Forward failed"
                );
                let responder = self.responder.read().clone();
                let response = responder(&err);
                ctx.set_error(err);
                response
            }
        };

        metrics::record_forward(&self.name, &policy, response.status().as_u16(), start);
        response
    }
}

impl Updater for LoadBalancer {
    fn upsert_server(&self, server: ServerRef) {
        self.servers.upsert_servers([server]);
    }

    fn remove_server(&self, id: &str) {
        self.servers.remove_server(id);
    }

    fn set_server_online(&self, id: &str, online: bool) {
        self.servers
            .set_server_status(id, ServerStatus::from_online(online));
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("name", &self.name)
            .field("policy", &self.balancer.load().policy())
            .field("timeout", &self.timeout())
            .field("servers", &self.servers)
            .finish()
    }
}
