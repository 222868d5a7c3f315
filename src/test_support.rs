//! In-process server double for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Response;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::health::HealthCheckInfo;
use crate::upstream::{RuntimeState, Server, ServerRef};

#[derive(Debug)]
pub(crate) struct StaticServer {
    id: String,
    weight: u32,
    total: AtomicU64,
    success: AtomicU64,
    current: AtomicU64,
    pub fail: AtomicBool,
    pub healthy: AtomicBool,
    pub panic_on_check: AtomicBool,
    pub checks: AtomicU64,
    pub check_delay_ms: AtomicU64,
    delay: Option<Duration>,
}

impl StaticServer {
    pub fn new(id: &str, weight: u32) -> Arc<Self> {
        Arc::new(Self::build(id, weight, None))
    }

    pub fn slow(id: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(id, 1, Some(delay)))
    }

    fn build(id: &str, weight: u32, delay: Option<Duration>) -> Self {
        Self {
            id: id.to_string(),
            weight,
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            current: AtomicU64::new(0),
            fail: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            panic_on_check: AtomicBool::new(false),
            checks: AtomicU64::new(0),
            check_delay_ms: AtomicU64::new(0),
            delay,
        }
    }

    pub fn into_ref(self: Arc<Self>) -> ServerRef {
        self
    }

    pub fn calls(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn set_in_flight(&self, n: u64) {
        self.current.store(n, Ordering::SeqCst);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl Server for StaticServer {
    fn id(&self) -> &str {
        &self.id
    }

    fn weight(&self) -> u32 {
        self.weight
    }

    fn runtime_state(&self) -> RuntimeState {
        RuntimeState {
            total: self.total.load(Ordering::SeqCst),
            success: self.success.load(Ordering::SeqCst),
            current: self.current.load(Ordering::SeqCst),
        }
    }

    async fn check(&self, _info: &HealthCheckInfo) -> Result<()> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let delay = self.check_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.panic_on_check.load(Ordering::SeqCst) {
            panic!("probe exploded");
        }
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::probe(&self.id, "unhealthy"))
        }
    }

    async fn serve(&self, ctx: &mut RequestContext) -> Result<()> {
        self.total.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::forward(&self.id, "injected failure"));
        }
        self.success.fetch_add(1, Ordering::SeqCst);
        ctx.response = Some(Response::new(Body::from(self.id.clone())));
        Ok(())
    }
}

pub(crate) fn ids(servers: &[ServerRef]) -> Vec<String> {
    servers.iter().map(|s| s.id().to_string()).collect()
}
