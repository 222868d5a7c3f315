//! HTTP backend server.
//!
//! # Responsibilities
//! - Forward a buffered request to one backend endpoint
//! - Track total / successful / in-flight requests
//! - Answer health probes with a plain HTTP request
//!
//! # Design Decisions
//! - One pooled hyper client is shared by every backend built from config
//! - Hop-by-hop headers are stripped in both directions
//! - Any response from the backend is a successful forward; only transport
//!   failures are errors

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::health::HealthCheckInfo;
use crate::upstream::{RuntimeState, Server};

/// Client type shared by HTTP backends.
pub type HttpClient = Client<HttpConnector, Body>;

const HEALTH_CHECK_USER_AGENT: &str = "edge-proxy-health-check";

const HOP_BY_HOP: [header::HeaderName; 6] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Build the default client used for backends and probes.
pub fn default_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// A backend reachable over plain HTTP.
#[derive(Debug)]
pub struct HttpBackend {
    id: String,
    weight: u32,
    /// Base URL without a trailing slash.
    base: String,
    client: HttpClient,
    total: AtomicU64,
    success: AtomicU64,
    current: AtomicU64,
}

/// Decrements the in-flight counter when the forward finishes or is dropped.
struct InFlight<'a> {
    backend: &'a HttpBackend,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.backend.current.fetch_sub(1, Ordering::Relaxed);
    }
}

impl HttpBackend {
    /// Create a backend for `address` (e.g. `http://10.0.0.5:8080`).
    pub fn new(id: impl Into<String>, address: &str, weight: u32, client: HttpClient) -> Result<Self> {
        let id = id.into();
        let url = Url::parse(address)
            .map_err(|e| Error::InvalidServer(format!("{id}: invalid address `{address}`: {e}")))?;
        if url.scheme() != "http" {
            return Err(Error::InvalidServer(format!(
                "{id}: unsupported scheme `{}`",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::InvalidServer(format!("{id}: address `{address}` has no host")));
        }

        Ok(Self {
            base: url.as_str().trim_end_matches('/').to_string(),
            id,
            weight,
            client,
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            current: AtomicU64::new(0),
        })
    }

    /// Base URL requests are forwarded to.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn track(&self) -> InFlight<'_> {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.current.fetch_add(1, Ordering::Relaxed);
        InFlight { backend: self }
    }

    fn target(&self, path_and_query: &str) -> Result<Uri> {
        let target = format!("{}{}", self.base, path_and_query);
        Uri::try_from(target).map_err(|e| Error::forward(&self.id, e))
    }

    fn build_request(&self, ctx: &RequestContext) -> Result<Request<Body>> {
        let path_and_query = ctx
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = self.target(path_and_query)?;

        let mut req = Request::builder()
            .method(ctx.method.clone())
            .uri(uri)
            .body(Body::from(ctx.body.clone()))
            .map_err(|e| Error::forward(&self.id, e))?;

        let headers = req.headers_mut();
        for (name, value) in ctx.headers.iter() {
            headers.append(name.clone(), value.clone());
        }
        strip_hop_by_hop(headers);
        if let Some(addr) = ctx.remote_addr {
            append_forwarded_for(headers, &addr.ip().to_string());
        }
        Ok(req)
    }
}

#[async_trait]
impl Server for HttpBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn weight(&self) -> u32 {
        self.weight
    }

    fn runtime_state(&self) -> RuntimeState {
        RuntimeState {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            current: self.current.load(Ordering::Relaxed),
        }
    }

    async fn check(&self, info: &HealthCheckInfo) -> Result<()> {
        let uri = self
            .target(&info.path)
            .map_err(|e| Error::probe(&self.id, e.to_string()))?;
        let req = Request::builder()
            .method(info.method.clone())
            .uri(uri)
            .header(header::USER_AGENT, HEALTH_CHECK_USER_AGENT)
            .body(Body::empty())
            .map_err(|e| Error::probe(&self.id, e.to_string()))?;

        match self.client.request(req).await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(Error::probe(
                &self.id,
                format!("non-success status {}", response.status()),
            )),
            Err(e) => Err(Error::probe(&self.id, format!("connection error: {e}"))),
        }
    }

    async fn serve(&self, ctx: &mut RequestContext) -> Result<()> {
        let _in_flight = self.track();
        let req = self.build_request(ctx)?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| Error::forward(&self.id, e))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        ctx.response = Some(Response::from_parts(parts, Body::new(body)));
        self.success.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: &str) {
    let value = match headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) => format!("{existing}, {ip}"),
        None => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}
