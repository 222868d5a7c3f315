//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    routing::get,
    Router,
};
use tokio::net::TcpListener;

use edge_proxy::config::parse_config;
use edge_proxy::http::{AppState, HttpServer};
use edge_proxy::lifecycle::Gateway;
use edge_proxy::load_balancer::BalancerRegistry;

/// A programmable mock backend.
#[derive(Clone)]
pub struct Backend {
    pub name: &'static str,
    pub addr: SocketAddr,
    state: Arc<BackendState>,
}

struct BackendState {
    name: &'static str,
    hits: AtomicU64,
    healthy: AtomicBool,
    status: AtomicU16,
    delay_ms: AtomicU64,
}

impl Backend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Proxied requests served, health probes excluded.
    pub fn hits(&self) -> u64 {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

async fn health(State(state): State<Arc<BackendState>>) -> StatusCode {
    if state.healthy.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn serve(State(state): State<Arc<BackendState>>, uri: Uri) -> (StatusCode, String) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap();
    (status, format!("{} {}", state.name, uri))
}

/// Start a backend on an ephemeral port that answers `<name> <uri>`.
pub async fn start_backend(name: &'static str) -> Backend {
    let state = Arc::new(BackendState {
        name,
        hits: AtomicU64::new(0),
        healthy: AtomicBool::new(true),
        status: AtomicU16::new(200),
        delay_ms: AtomicU64::new(0),
    });
    let app = Router::new()
        .route("/health", get(health))
        .fallback(serve)
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Backend { name, addr, state }
}

/// An address nothing listens on.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// A running proxy built from a TOML document.
pub struct Proxy {
    pub addr: SocketAddr,
    pub gateway: Arc<Gateway>,
}

impl Proxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn start_proxy(config: &str) -> Proxy {
    let registry = BalancerRegistry::global();
    let config = parse_config(config, registry).unwrap();
    let gateway = Arc::new(Gateway::from_config(&config, registry).unwrap());
    gateway.start();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(AppState::new(gateway.clone(), &config));
    tokio::spawn(async move {
        server
            .run(listener, std::future::pending())
            .await
            .unwrap();
    });
    Proxy { addr, gateway }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
