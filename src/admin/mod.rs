//! Operational HTTP surface on its own listener.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use crate::lifecycle::Gateway;

use self::auth::admin_auth_middleware;
use self::handlers::{get_status, get_upstreams};

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub gateway: Arc<Gateway>,
    /// Empty disables authentication.
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(gateway: Arc<Gateway>, api_key: &str) -> Router {
    let state = AdminState {
        gateway,
        api_key: Arc::from(api_key),
    };
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/upstreams", get(get_upstreams))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
