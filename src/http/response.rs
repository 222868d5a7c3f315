//! Error to response mapping at the HTTP boundary.
//!
//! # Design Decisions
//! - Backend timeouts and canceled requests result in 504 Gateway Timeout
//! - An empty pool is 503; any other forwarding failure is 502
//! - The mapping is a replaceable hook (`ErrorResponder`) per load balancer

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Response, StatusCode};

use crate::error::{Error, ErrorKind};

/// Builds the client response for a failed forward.
pub type ErrorResponder = Arc<dyn Fn(&Error) -> Response<Body> + Send + Sync>;

/// Status code the gateway returns for `err`.
pub fn status_for(err: &Error) -> StatusCode {
    match err.kind() {
        ErrorKind::NoAvailableServers => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout | ErrorKind::Canceled => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Forward | ErrorKind::HealthCheck | ErrorKind::Config => StatusCode::BAD_GATEWAY,
    }
}

/// Plain-text response with `status` and its canonical reason as the body.
pub fn plain(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::from(
        status.canonical_reason().unwrap_or("Error").to_string(),
    ));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Default responder: the mapped status with a short reason phrase.
///
/// Backend details stay in the logs.
pub fn default_error_response(err: &Error) -> Response<Body> {
    plain(status_for(err))
}

pub fn default_responder() -> ErrorResponder {
    Arc::new(default_error_response)
}
