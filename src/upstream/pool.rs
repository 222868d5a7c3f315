//! Bounded free-list of vectors.
//!
//! Used for the registry's published snapshots and for scratch space on
//! selection paths, so steady-state traffic does not churn the allocator.

use parking_lot::Mutex;

/// Default number of idle vectors retained by a pool.
pub const DEFAULT_POOL_SIZE: usize = 32;

/// A pool of reusable `Vec<T>` buffers.
#[derive(Debug)]
pub struct VecPool<T> {
    free: Mutex<Vec<Vec<T>>>,
    max_idle: usize,
}

impl<T> VecPool<T> {
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Take an empty vector that can hold at least `capacity` items.
    pub fn get(&self, capacity: usize) -> Vec<T> {
        let mut v = self.free.lock().pop().unwrap_or_default();
        v.reserve(capacity);
        v
    }

    /// Return a vector to the pool. It is truncated to length 0 first.
    pub fn put(&self, mut v: Vec<T>) {
        v.clear();
        if v.capacity() == 0 {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(v);
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl<T> Default for VecPool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}
