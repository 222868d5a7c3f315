//! Free-list of reusable request contexts.
//!
//! # Responsibilities
//! - Hand out reset contexts without allocating on the hot path
//! - Take contexts back, clearing them in place
//! - Bound the number of idle contexts kept around

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::context::RequestContext;

/// Default key/value capacity for freshly allocated contexts.
pub const DEFAULT_DATA_CAPACITY: usize = 8;
/// Default upper bound on idle contexts.
pub const DEFAULT_MAX_IDLE: usize = 1024;

struct PoolInner {
    free: Mutex<Vec<Box<RequestContext>>>,
    data_capacity: usize,
    max_idle: usize,
}

impl PoolInner {
    fn release(&self, mut ctx: Box<RequestContext>) {
        ctx.reset();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(ctx);
        }
    }
}

/// Pool of [`RequestContext`] values.
///
/// Cloning is cheap and shares the same free-list.
#[derive(Clone)]
pub struct ContextPool {
    inner: Arc<PoolInner>,
}

impl ContextPool {
    pub fn new(data_capacity: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                data_capacity,
                max_idle,
            }),
        }
    }

    /// Process-wide default pool.
    pub fn global() -> &'static ContextPool {
        static GLOBAL: OnceLock<ContextPool> = OnceLock::new();
        GLOBAL.get_or_init(ContextPool::default)
    }

    /// Take a context from the pool, allocating one if the pool is empty.
    pub fn acquire(&self) -> PooledContext {
        let ctx = self.inner.free.lock().pop();
        let ctx = ctx.unwrap_or_else(|| {
            Box::new(RequestContext::with_capacity(self.inner.data_capacity))
        });
        PooledContext {
            ctx: Some(ctx),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Take a context whose value map can already hold `capacity` entries.
    ///
    /// Prefers the most recently released context that is large enough.
    pub fn acquire_with_hint(&self, capacity: usize) -> PooledContext {
        let found = {
            let mut free = self.inner.free.lock();
            match free.iter().rposition(|ctx| ctx.data_capacity() >= capacity) {
                Some(idx) => Some(free.swap_remove(idx)),
                None => free.pop(),
            }
        };
        let mut ctx = found.unwrap_or_else(|| {
            Box::new(RequestContext::with_capacity(
                capacity.max(self.inner.data_capacity),
            ))
        });
        ctx.reserve_data(capacity);
        PooledContext {
            ctx: Some(ctx),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of idle contexts currently held.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_CAPACITY, DEFAULT_MAX_IDLE)
    }
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("idle", &self.idle())
            .field("data_capacity", &self.inner.data_capacity)
            .field("max_idle", &self.inner.max_idle)
            .finish()
    }
}

/// RAII guard over a pooled context; returns it to the pool when dropped.
pub struct PooledContext {
    ctx: Option<Box<RequestContext>>,
    pool: Arc<PoolInner>,
}

impl PooledContext {
    /// Reset the context and hand it back to the pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for PooledContext {
    type Target = RequestContext;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the context out.
        self.ctx.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx);
        }
    }
}
