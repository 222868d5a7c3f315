//! HTTP server setup and the proxy handler.
//!
//! # Responsibilities
//! - Create the Axum Router with the catch-all proxy handler
//! - Wire up middleware (tracing, request ID)
//! - Resolve the route, buffer the body and hand a pooled context to the
//!   upstream's load balancer
//! - Bind the server to a listener with graceful shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, State},
    http::{Request, Response, StatusCode},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::EdgeConfig;
use crate::context::ContextPool;
use crate::http::response::plain;
use crate::http::X_REQUEST_ID;
use crate::lifecycle::Gateway;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub contexts: ContextPool,
    pub max_body_size: usize,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, config: &EdgeConfig) -> Self {
        Self {
            gateway,
            contexts: ContextPool::new(config.context_pool.data_capacity, config.context_pool.max_idle),
            max_body_size: config.listener.max_body_size,
        }
    }
}

/// Public HTTP server of the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            router: build_router(state),
        }
    }

    /// The Axum router, for embedding or in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", any(proxy_handler))
        .route("/{*path}", any(proxy_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// Main proxy handler.
/// Looks up the route, buffers the body and forwards through the upstream.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response<Body> {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (parts, body) = request.into_parts();
    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let Some(route) = state.gateway.router().route(&parts) else {
        tracing::warn!(request_id = %request_id, path = %parts.uri.path(), "No route matched");
        return plain(StatusCode::NOT_FOUND);
    };
    let Some(upstream) = state.gateway.upstream(&route.upstream).cloned() else {
        tracing::error!(
            request_id = %request_id,
            route = %route.name,
            upstream = %route.upstream,
            "Route points at a missing upstream"
        );
        return plain(StatusCode::SERVICE_UNAVAILABLE);
    };

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        path = %parts.uri.path(),
        route = %route.name,
        upstream = %upstream.name(),
        "Proxying request"
    );

    // Buffering only fails past the limit or when the client goes away.
    let body = match to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                limit = state.max_body_size,
                error = %e,
                "Request body rejected"
            );
            return plain(StatusCode::PAYLOAD_TOO_LARGE);
        }
    };

    let mut ctx = state.contexts.acquire();
    ctx.fill_from(parts, body, remote_addr);
    ctx.set("request_id", request_id);
    upstream.balancer().handle_http(&mut ctx).await
}
