//! Startup orchestration and hot reload.
//!
//! # Responsibilities
//! - Build one load balancer and health checker per configured upstream
//! - Compile the route table
//! - Reconcile a running gateway with a newly loaded configuration
//!
//! # Design Decisions
//! - Fail fast: any build error at startup is fatal
//! - Reload only touches what changed; unchanged servers keep their
//!   counters and health state

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{EdgeConfig, ServerConfig, UpstreamConfig};
use crate::error::Result;
use crate::health::HealthChecker;
use crate::load_balancer::{BalancerConfig, BalancerRegistry, LoadBalancer};
use crate::routing::Router;
use crate::upstream::http::{default_client, HttpClient};
use crate::upstream::{HttpBackend, ServerRef};

/// Name under which the load balancer follows its checker.
const LB_UPDATER: &str = "load_balancer";

/// One upstream pool: its balancer, its checker and the config it was built from.
pub struct Upstream {
    name: String,
    balancer: Arc<LoadBalancer>,
    checker: HealthChecker,
    config: Mutex<UpstreamConfig>,
}

impl Upstream {
    pub fn build(config: &UpstreamConfig, registry: &BalancerRegistry, client: &HttpClient) -> Result<Self> {
        let balancer = registry.build(&config.policy, &BalancerConfig::from(config))?;
        let lb = Arc::new(LoadBalancer::new(config.name.clone(), balancer));
        lb.set_timeout(config.timeout());

        let checker = HealthChecker::new(config.name.clone(), config.health_check.to_info());
        checker.add_updater(LB_UPDATER, lb.clone())?;
        for server in &config.servers {
            checker.upsert_server(build_server(server, client)?);
        }

        tracing::info!(
            upstream = %config.name,
            policy = %lb.balancer().policy(),
            servers = config.servers.len(),
            "Upstream configured"
        );

        Ok(Self {
            name: config.name.clone(),
            balancer: lb,
            checker,
            config: Mutex::new(config.clone()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn checker(&self) -> &HealthChecker {
        &self.checker
    }

    /// Configuration currently applied.
    pub fn config(&self) -> UpstreamConfig {
        self.config.lock().clone()
    }

    /// Bring this upstream in line with `next`.
    pub fn apply(&self, next: &UpstreamConfig, registry: &BalancerRegistry, client: &HttpClient) -> Result<()> {
        let mut current = self.config.lock();

        if current.policy != next.policy || current.retry != next.retry {
            let balancer = registry.build(&next.policy, &BalancerConfig::from(next))?;
            self.balancer.set_balancer(balancer);
        }
        if current.timeout_ms != next.timeout_ms {
            self.balancer.set_timeout(next.timeout());
        }
        if current.health_check != next.health_check {
            self.checker.set_info(next.health_check.to_info());
        }

        let wanted: HashMap<&str, &ServerConfig> =
            next.servers.iter().map(|s| (s.id.as_str(), s)).collect();
        let existing: HashMap<&str, &ServerConfig> =
            current.servers.iter().map(|s| (s.id.as_str(), s)).collect();

        // Build first so a bad definition leaves the pool untouched.
        let mut upserts: Vec<ServerRef> = Vec::new();
        for server in &next.servers {
            if existing.get(server.id.as_str()) != Some(&server) {
                upserts.push(build_server(server, client)?);
            }
        }

        let mut removed = 0usize;
        for id in existing.keys() {
            if !wanted.contains_key(id) {
                self.checker.remove_server(id);
                removed += 1;
            }
        }
        let upserted = upserts.len();
        for server in upserts {
            self.checker.upsert_server(server);
        }

        tracing::info!(
            upstream = %self.name,
            policy = %self.balancer.balancer().policy(),
            upserted,
            removed,
            "Upstream reconfigured"
        );
        *current = next.clone();
        Ok(())
    }
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("name", &self.name)
            .field("balancer", &self.balancer)
            .field("checker", &self.checker)
            .finish()
    }
}

fn build_server(config: &ServerConfig, client: &HttpClient) -> Result<ServerRef> {
    let backend = HttpBackend::new(config.id.clone(), &config.address, config.weight, client.clone())?;
    Ok(Arc::new(backend))
}

/// Every upstream plus the route table.
pub struct Gateway {
    upstreams: BTreeMap<String, Arc<Upstream>>,
    router: Router,
    routes: Vec<crate::config::RouteConfig>,
    client: HttpClient,
}

impl Gateway {
    pub fn from_config(config: &EdgeConfig, registry: &BalancerRegistry) -> Result<Self> {
        Self::with_client(config, registry, default_client())
    }

    /// Build with a caller-provided HTTP client shared by every backend.
    pub fn with_client(config: &EdgeConfig, registry: &BalancerRegistry, client: HttpClient) -> Result<Self> {
        let mut upstreams = BTreeMap::new();
        for upstream in &config.upstreams {
            let built = Upstream::build(upstream, registry, &client)?;
            upstreams.insert(upstream.name.clone(), Arc::new(built));
        }
        Ok(Self {
            upstreams,
            router: Router::new(&config.routes),
            routes: config.routes.clone(),
            client,
        })
    }

    pub fn upstream(&self, name: &str) -> Option<&Arc<Upstream>> {
        self.upstreams.get(name)
    }

    /// Upstreams ordered by name.
    pub fn upstreams(&self) -> impl Iterator<Item = &Arc<Upstream>> {
        self.upstreams.values()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Start every health checker.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self) {
        for upstream in self.upstreams.values() {
            upstream.checker.start();
        }
    }

    pub fn stop(&self) {
        for upstream in self.upstreams.values() {
            upstream.checker.stop();
        }
    }

    /// Reconcile running upstreams with `config`.
    ///
    /// Upstreams that appear or disappear, and route changes, are only logged.
    pub fn apply(&self, config: &EdgeConfig, registry: &BalancerRegistry) -> Result<()> {
        for next in &config.upstreams {
            match self.upstreams.get(&next.name) {
                Some(upstream) => upstream.apply(next, registry, &self.client)?,
                None => tracing::warn!(
                    upstream = %next.name,
                    "New upstream ignored until restart"
                ),
            }
        }
        for name in self.upstreams.keys() {
            if config.upstream(name).is_none() {
                tracing::warn!(upstream = %name, "Upstream removed from config, kept until restart");
            }
        }
        if config.routes != self.routes {
            tracing::warn!("Route changes take effect after restart");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("upstreams", &self.upstreams.keys().collect::<Vec<_>>())
            .field("routes", &self.router.len())
            .finish()
    }
}
