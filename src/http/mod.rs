//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → routing (route → upstream)
//!     → load balancer forwards through a pooled RequestContext
//!     → response.rs (errors mapped to 502/503/504)
//!     → Send to client
//! ```

pub mod response;
pub mod server;

pub use response::{default_responder, status_for, ErrorResponder};
pub use server::{build_router, AppState, HttpServer};

/// Header carrying the request correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";
