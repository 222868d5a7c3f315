//! Server registry with lock-free published views.
//!
//! # Responsibilities
//! - Hold the authoritative set of servers and their status
//! - Republish online / offline / all snapshots on every mutation
//! - Serve snapshot reads without touching the entry lock
//!
//! # Design Decisions
//! - Status transitions are compare-and-swap on the entry
//! - Upsert always (re)starts an entry as Online; the health checker
//!   corrects it on its next probe
//! - Replaced snapshots go back to a vector pool only when no reader holds them

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;

use crate::upstream::{
    effective_weight, pool::VecPool, ServerDiscovery, ServerRef, ServerStatus, Servers,
};

/// Registry entry: a server plus its registry-owned status.
struct UpServer {
    server: ServerRef,
    status: AtomicU8,
}

impl UpServer {
    fn new(server: ServerRef) -> Self {
        Self {
            server,
            status: AtomicU8::new(ServerStatus::Online as u8),
        }
    }

    fn status(&self) -> ServerStatus {
        ServerStatus::from(self.status.load(Ordering::Acquire))
    }

    /// Returns true if the status actually changed.
    fn swap_status(&self, status: ServerStatus) -> bool {
        let current = self.status.load(Ordering::Acquire);
        if current == status as u8 {
            return false;
        }
        self.status
            .compare_exchange(current, status as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Authoritative server set with published, weight-sorted views.
pub struct ServersManager {
    entries: RwLock<HashMap<String, Arc<UpServer>>>,
    on: ArcSwap<Vec<ServerRef>>,
    off: ArcSwap<Vec<ServerRef>>,
    all: ArcSwap<Vec<ServerRef>>,
    pool: VecPool<ServerRef>,
}

impl ServersManager {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            on: ArcSwap::from_pointee(Vec::new()),
            off: ArcSwap::from_pointee(Vec::new()),
            all: ArcSwap::from_pointee(Vec::new()),
            pool: VecPool::default(),
        }
    }

    /// Replace the whole set. Every server starts Online.
    pub fn reset_servers(&self, servers: impl IntoIterator<Item = ServerRef>) {
        let mut entries = self.entries.write();
        entries.clear();
        for server in servers {
            entries.insert(server.id().to_string(), Arc::new(UpServer::new(server)));
        }
        self.publish(&entries);
    }

    /// Insert or replace servers by id. Replaced entries restart as Online.
    pub fn upsert_servers(&self, servers: impl IntoIterator<Item = ServerRef>) {
        let mut entries = self.entries.write();
        for server in servers {
            entries.insert(server.id().to_string(), Arc::new(UpServer::new(server)));
        }
        self.publish(&entries);
    }

    /// Remove a server. Unknown ids are ignored.
    pub fn remove_server(&self, id: &str) {
        let mut entries = self.entries.write();
        if entries.remove(id).is_some() {
            self.publish(&entries);
        }
    }

    /// Set the status of a known server. Unknown ids are ignored.
    pub fn set_server_status(&self, id: &str, status: ServerStatus) {
        let entries = self.entries.write();
        let changed = entries
            .get(id)
            .map(|entry| entry.swap_status(status))
            .unwrap_or(false);
        if changed {
            tracing::debug!(server = %id, status = %status, "Server status changed");
            self.publish(&entries);
        }
    }

    /// Set several statuses and republish once.
    pub fn set_server_statuses(&self, statuses: &HashMap<String, ServerStatus>) {
        let entries = self.entries.write();
        let mut changed = false;
        for (id, status) in statuses {
            if let Some(entry) = entries.get(id) {
                changed |= entry.swap_status(*status);
            }
        }
        if changed {
            self.publish(&entries);
        }
    }

    pub fn get_server(&self, id: &str) -> Option<ServerRef> {
        self.entries
            .read()
            .get(id)
            .map(|entry| Arc::clone(&entry.server))
    }

    pub fn get_server_status(&self, id: &str) -> Option<ServerStatus> {
        self.entries.read().get(id).map(|entry| entry.status())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Rebuild and swap the three views. Caller holds the entry lock.
    fn publish(&self, entries: &HashMap<String, Arc<UpServer>>) {
        let mut on = self.pool.get(entries.len());
        let mut off = self.pool.get(entries.len());
        let mut all = self.pool.get(entries.len());

        for entry in entries.values() {
            all.push(Arc::clone(&entry.server));
            match entry.status() {
                ServerStatus::Online => on.push(Arc::clone(&entry.server)),
                ServerStatus::Offline => off.push(Arc::clone(&entry.server)),
            }
        }
        sort_servers(&mut on);
        sort_servers(&mut off);
        sort_servers(&mut all);

        self.recycle(self.on.swap(Arc::new(on)));
        self.recycle(self.off.swap(Arc::new(off)));
        self.recycle(self.all.swap(Arc::new(all)));
    }

    fn recycle(&self, old: Arc<Vec<ServerRef>>) {
        // Readers that loaded the old view keep it alive; only reuse unshared ones.
        if let Ok(v) = Arc::try_unwrap(old) {
            self.pool.put(v);
        }
    }
}

impl Default for ServersManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServersManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServersManager")
            .field("servers", &self.len())
            .field("online", &self.on.load().len())
            .finish()
    }
}

impl ServerDiscovery for ServersManager {
    fn on_servers(&self) -> Servers {
        self.on.load_full()
    }

    fn off_servers(&self) -> Servers {
        self.off.load_full()
    }

    fn all_servers(&self) -> Servers {
        self.all.load_full()
    }

    fn online_num(&self) -> usize {
        self.on.load().len()
    }
}

/// Stable sort by (weight ascending, id ascending).
pub(crate) fn sort_servers(servers: &mut [ServerRef]) {
    servers.sort_by(|a, b| {
        effective_weight(a.as_ref())
            .cmp(&effective_weight(b.as_ref()))
            .then_with(|| a.id().cmp(b.id()))
    });
}
