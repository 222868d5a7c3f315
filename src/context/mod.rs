//! Request-scoped state threaded through routing and forwarding.
//!
//! # Data Flow
//! ```text
//! Request arrives
//!     → pool.rs (acquire a reset RequestContext)
//!     → fill_from (method, uri, headers, buffered body, peer address)
//!     → load balancer forwards; server writes `response`
//!     → guard dropped: context reset and pushed back to the pool
//! ```
//!
//! # Design Decisions
//! - The body is buffered as `Bytes` so retries can replay it cheaply
//! - Cancellation is a token plus an optional absolute deadline
//! - `reset` clears in place and keeps the value map's capacity

pub mod pool;

pub use pool::{ContextPool, PooledContext};

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::http::{request::Parts, HeaderMap, Method, Response, Uri, Version};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Number of integer scratch registers on a context.
pub const INT_REGISTERS: usize = 4;
/// Number of type-erased scratch registers on a context.
pub const ANY_REGISTERS: usize = 2;

/// Per-request mutable state.
///
/// Contexts are recycled through a [`ContextPool`]; nothing may keep a
/// reference to one after its guard has been released.
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: Option<SocketAddr>,
    /// Response written by the server that handled the request.
    pub response: Option<Response<Body>>,
    /// Integer scratch registers for handlers.
    pub ints: [i64; INT_REGISTERS],
    /// Type-erased scratch registers for handlers.
    pub anys: [Option<Box<dyn Any + Send + Sync>>; ANY_REGISTERS],
    data: HashMap<String, Value>,
    error: Option<Error>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a context whose value map can hold `capacity` entries without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            method: Method::GET,
            uri: Uri::default(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
            response: None,
            ints: [0; INT_REGISTERS],
            anys: Default::default(),
            data: HashMap::with_capacity(capacity),
            error: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Load the request line, headers and buffered body of an incoming request.
    pub fn fill_from(&mut self, parts: Parts, body: Bytes, remote_addr: Option<SocketAddr>) {
        self.method = parts.method;
        self.uri = parts.uri;
        self.version = parts.version;
        self.headers = parts.headers;
        self.body = body;
        self.remote_addr = remote_addr;
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Number of entries in the key/value map.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Allocated capacity of the key/value map.
    pub fn data_capacity(&self) -> usize {
        self.data.capacity()
    }

    pub(crate) fn reserve_data(&mut self, capacity: usize) {
        if self.data.capacity() < capacity {
            self.data.reserve(capacity - self.data.len());
        }
    }

    /// Record the error that ended the request. Later calls replace it.
    pub fn set_error(&mut self, error: Error) {
        self.error = Some(error);
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Cancel the request scope.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token observed by long waits inside the request scope.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Fail if the scope was canceled or its deadline has passed.
    pub fn check_done(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::Timeout),
            _ => Ok(()),
        }
    }

    /// Clear every mutable field, keeping allocations where possible.
    pub fn reset(&mut self) {
        self.method = Method::GET;
        self.uri = Uri::default();
        self.version = Version::HTTP_11;
        self.headers.clear();
        self.body = Bytes::new();
        self.remote_addr = None;
        self.response = None;
        self.ints = [0; INT_REGISTERS];
        self.anys = Default::default();
        self.data.clear();
        self.error = None;
        // A canceled token cannot be rearmed.
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.deadline = None;
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("remote_addr", &self.remote_addr)
            .field("data_len", &self.data.len())
            .field("error", &self.error)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use std::time::Duration;

    #[test]
    fn test_fill_and_reset() {
        let (parts, _) = Request::builder()
            .method(Method::POST)
            .uri("/orders?id=7")
            .header("x-tenant", "acme")
            .body(())
            .unwrap()
            .into_parts();

        let mut ctx = RequestContext::new();
        ctx.fill_from(parts, Bytes::from_static(b"payload"), "10.0.0.1:4000".parse().ok());
        ctx.set("route", "orders");
        ctx.ints[0] = 9;
        ctx.anys[1] = Some(Box::new(5u8));
        ctx.set_error(Error::Timeout);
        ctx.cancel();

        assert_eq!(ctx.method, Method::POST);
        assert_eq!(ctx.uri.path(), "/orders");
        assert_eq!(ctx.get("route"), Some(&Value::from("orders")));
        assert!(ctx.check_done().is_err());

        ctx.reset();
        assert_eq!(ctx.method, Method::GET);
        assert!(ctx.headers.is_empty());
        assert!(ctx.body.is_empty());
        assert!(ctx.remote_addr.is_none());
        assert_eq!(ctx.data_len(), 0);
        assert_eq!(ctx.ints, [0; INT_REGISTERS]);
        assert!(ctx.anys.iter().all(Option::is_none));
        assert!(ctx.error().is_none());
        assert!(!ctx.is_canceled());
        assert!(ctx.check_done().is_ok());
    }

    #[tokio::test]
    async fn test_deadline_expiry() {
        let mut ctx = RequestContext::new();
        ctx.set_deadline(Some(Instant::now() + Duration::from_millis(10)));
        assert!(ctx.check_done().is_ok());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(ctx.check_done(), Err(Error::Timeout)));
    }
}
