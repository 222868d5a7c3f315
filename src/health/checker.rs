//! Active health checking.
//!
//! # Responsibilities
//! - Run one probe loop per registered server
//! - Turn probe results into online/offline transitions
//! - Fan membership and transitions out to registered updaters

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::health::{HealthCheckInfo, ProbeState, Updater};
use crate::observability::metrics;
use crate::upstream::ServerRef;

/// Tracking state for one monitored server.
struct ServerContext {
    server: ServerRef,
    /// Per-server override of the checker's default info.
    info: Option<HealthCheckInfo>,
    state: ProbeState,
    /// Stop handle of the running probe loop.
    task: Mutex<Option<CancellationToken>>,
    /// Held while a probe result is recorded and published.
    transition: Mutex<()>,
}

impl ServerContext {
    fn stop(&self) {
        if let Some(token) = self.task.lock().take() {
            token.cancel();
        }
    }
}

struct Running {
    token: CancellationToken,
    handle: Handle,
}

struct Inner {
    name: String,
    servers: DashMap<String, Arc<ServerContext>>,
    updaters: RwLock<BTreeMap<String, Arc<dyn Updater>>>,
    info: RwLock<HealthCheckInfo>,
    running: Mutex<Option<Running>>,
}

/// Background scheduler probing every registered server.
///
/// Cloning is cheap and shares the same state.
#[derive(Clone)]
pub struct HealthChecker {
    inner: Arc<Inner>,
}

impl HealthChecker {
    /// Create a stopped checker. `name` labels logs and metrics.
    pub fn new(name: impl Into<String>, info: HealthCheckInfo) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                servers: DashMap::new(),
                updaters: RwLock::new(BTreeMap::new()),
                info: RwLock::new(info),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn info(&self) -> HealthCheckInfo {
        self.inner.info.read().clone()
    }

    /// Replace the default info and restart the loops that use it.
    ///
    /// A zero info tears those loops down and puts their servers back online.
    pub fn set_info(&self, info: HealthCheckInfo) {
        let disabled = info.is_zero();
        *self.inner.info.write() = info;
        let running = self.inner.running.lock();
        for entry in self.inner.servers.iter() {
            if entry.info.is_some() {
                continue;
            }
            entry.stop();
            if disabled {
                self.inner.release(entry.value());
            } else if let Some(running) = running.as_ref() {
                self.inner.spawn_loop(entry.value(), running);
                self.inner.resync(entry.value());
            }
        }
    }

    /// Start probing every registered server.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.inner.running.lock();
        if running.is_some() {
            return;
        }
        let state = Running {
            token: CancellationToken::new(),
            handle: Handle::current(),
        };
        for entry in self.inner.servers.iter() {
            self.inner.spawn_loop(entry.value(), &state);
        }
        tracing::info!(checker = %self.inner.name, servers = self.inner.servers.len(), "Health checker started");
        *running = Some(state);
    }

    /// Stop every probe loop. In-flight probes finish but are not acted upon.
    pub fn stop(&self) {
        let Some(running) = self.inner.running.lock().take() else {
            return;
        };
        running.token.cancel();
        for entry in self.inner.servers.iter() {
            entry.task.lock().take();
        }
        tracing::info!(checker = %self.inner.name, "Health checker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Register or replace a server using the default info.
    pub fn upsert_server(&self, server: ServerRef) {
        self.upsert_server_with_info(server, None);
    }

    /// Register or replace a server, optionally with its own probe info.
    pub fn upsert_server_with_info(&self, server: ServerRef, info: Option<HealthCheckInfo>) {
        let ctx = Arc::new(ServerContext {
            server: Arc::clone(&server),
            info,
            state: ProbeState::new(),
            task: Mutex::new(None),
            transition: Mutex::new(()),
        });

        if let Some(old) = self
            .inner
            .servers
            .insert(server.id().to_string(), Arc::clone(&ctx))
        {
            old.stop();
        }

        for updater in self.inner.updaters_snapshot() {
            updater.upsert_server(Arc::clone(&server));
        }

        if let Some(running) = self.inner.running.lock().as_ref() {
            self.inner.spawn_loop(&ctx, running);
        }
    }

    /// Stop checking a server and tell every updater to drop it.
    pub fn remove_server(&self, id: &str) {
        let Some((_, ctx)) = self.inner.servers.remove(id) else {
            return;
        };
        ctx.stop();
        for updater in self.inner.updaters_snapshot() {
            updater.remove_server(id);
        }
    }

    /// Current health of a server, if it is registered.
    pub fn server_online(&self, id: &str) -> Option<bool> {
        self.inner.servers.get(id).map(|ctx| ctx.state.is_online())
    }

    /// `(id, online)` for every registered server, ordered by id.
    pub fn servers(&self) -> Vec<(String, bool)> {
        let mut servers: Vec<_> = self
            .inner
            .servers
            .iter()
            .map(|entry| (entry.key().clone(), entry.state.is_online()))
            .collect();
        servers.sort();
        servers
    }

    /// Register a named updater and backfill it with the current state.
    pub fn add_updater(&self, name: impl Into<String>, updater: Arc<dyn Updater>) -> Result<()> {
        let name = name.into();
        {
            let mut updaters = self.inner.updaters.write();
            if updaters.contains_key(&name) {
                return Err(Error::DuplicateUpdater(name));
            }
            updaters.insert(name.clone(), Arc::clone(&updater));
        }

        let current: Vec<Arc<ServerContext>> = self
            .inner
            .servers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for ctx in current {
            updater.upsert_server(Arc::clone(&ctx.server));
            updater.set_server_online(ctx.server.id(), ctx.state.is_online());
        }
        tracing::debug!(checker = %self.inner.name, updater = %name, "Updater registered");
        Ok(())
    }

    /// Unregister an updater. Unknown names are ignored.
    pub fn del_updater(&self, name: &str) {
        self.inner.updaters.write().remove(name);
    }

    pub fn get_updater(&self, name: &str) -> Option<Arc<dyn Updater>> {
        self.inner.updaters.read().get(name).cloned()
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("name", &self.inner.name)
            .field("servers", &self.inner.servers.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Inner {
    fn updaters_snapshot(&self) -> Vec<Arc<dyn Updater>> {
        self.updaters.read().values().cloned().collect()
    }

    fn spawn_loop(self: &Arc<Self>, ctx: &Arc<ServerContext>, running: &Running) {
        let info = ctx.info.clone().unwrap_or_else(|| self.info.read().clone());
        if info.is_zero() {
            return;
        }
        let stop = running.token.child_token();
        if let Some(old) = ctx.task.lock().replace(stop.clone()) {
            old.cancel();
        }
        running
            .handle
            .spawn(probe_loop(Arc::downgrade(self), Arc::clone(ctx), info, stop));
    }

    fn publish(&self, id: &str, online: bool) {
        metrics::record_server_health(&self.name, id, online);
        for updater in self.updaters_snapshot() {
            updater.set_server_online(id, online);
        }
    }

    /// Push the checker's view of `ctx` to every updater.
    fn resync(&self, ctx: &ServerContext) {
        let _transition = ctx.transition.lock();
        self.publish(ctx.server.id(), ctx.state.is_online());
    }

    /// Health checking no longer applies to `ctx`: clear its state and mark it online.
    fn release(&self, ctx: &ServerContext) {
        let _transition = ctx.transition.lock();
        if ctx.state.reset() {
            tracing::info!(checker = %self.name, server = %ctx.server.id(), "Health checks disabled, server restored");
        }
        self.publish(ctx.server.id(), true);
    }

    async fn probe(&self, ctx: &ServerContext, info: &HealthCheckInfo, stop: &CancellationToken) {
        let id = ctx.server.id();
        let server = Arc::clone(&ctx.server);
        let probe_info = info.clone();
        let deadline = info.probe_timeout();

        // A separate task turns a panicking probe into a JoinError.
        let handle = tokio::spawn(async move {
            time::timeout(deadline, server.check(&probe_info)).await
        });
        let outcome = match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(Error::Timeout),
            Err(e) if e.is_panic() => {
                let err = Error::from_panic(id, e.into_panic());
                tracing::error!(checker = %self.name, server = %id, error = %err, "Health probe panicked");
                Err(err)
            }
            Err(_) => return,
        };

        // A superseded loop must not touch the state its replacement owns.
        let _transition = ctx.transition.lock();
        if stop.is_cancelled() {
            return;
        }
        let transition = match &outcome {
            Ok(()) => ctx.state.record_success(),
            Err(e) => {
                tracing::debug!(checker = %self.name, server = %id, error = %e, "Health probe failed");
                ctx.state.record_failure(info.threshold())
            }
        };

        let Some(online) = transition else {
            return;
        };
        if online {
            tracing::info!(checker = %self.name, server = %id, "Server is back online");
        } else {
            tracing::warn!(
                checker = %self.name,
                server = %id,
                failures = ctx.state.failures(),
                "Server marked offline"
            );
        }
        self.publish(id, online);
    }
}

async fn probe_loop(
    inner: Weak<Inner>,
    ctx: Arc<ServerContext>,
    info: HealthCheckInfo,
    stop: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + info.interval, info.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Probe immediately on registration, then on every tick.
        match inner.upgrade() {
            Some(inner) => inner.probe(&ctx, &info, &stop).await,
            None => break,
        }
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
    }
    tracing::trace!(server = %ctx.server.id(), "Probe loop exited");
}
