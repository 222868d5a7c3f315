use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::upstream::{RuntimeState, ServerDiscovery, ServerStatus};

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub upstreams: usize,
}

#[derive(Debug, Serialize)]
pub struct UpstreamView {
    pub name: String,
    pub policy: String,
    pub timeout_ms: u64,
    pub online: usize,
    pub servers: Vec<ServerView>,
}

#[derive(Debug, Serialize)]
pub struct ServerView {
    pub id: String,
    pub weight: u32,
    pub status: ServerStatus,
    #[serde(flatten)]
    pub runtime: RuntimeState,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        upstreams: state.gateway.upstreams().count(),
    })
}

pub async fn get_upstreams(State(state): State<AdminState>) -> Json<Vec<UpstreamView>> {
    let views = state
        .gateway
        .upstreams()
        .map(|upstream| {
            let lb = upstream.balancer();
            let registry = lb.registry();
            let servers = registry
                .all_servers()
                .iter()
                .map(|server| ServerView {
                    id: server.id().to_string(),
                    weight: server.weight(),
                    status: registry
                        .get_server_status(server.id())
                        .unwrap_or(ServerStatus::Offline),
                    runtime: server.runtime_state(),
                })
                .collect();
            UpstreamView {
                name: upstream.name().to_string(),
                policy: lb.balancer().policy().to_string(),
                timeout_ms: lb.timeout().as_millis() as u64,
                online: registry.online_num(),
                servers,
            }
        })
        .collect();
    Json(views)
}

#[cfg(test)]
mod tests {
    use crate::admin::setup_admin_router;
    use crate::config::parse_config;
    use crate::lifecycle::Gateway;
    use crate::load_balancer::BalancerRegistry;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    const CONFIG: &str = r#"
[[upstreams]]
name = "api"
policy = "weight_round_robin"
timeout_ms = 250

[[upstreams.servers]]
id = "a"
address = "http://127.0.0.1:9001"
weight = 3
"#;

    fn gateway() -> Arc<Gateway> {
        let registry = BalancerRegistry::with_builtins();
        let config = parse_config(CONFIG, &registry).unwrap();
        Arc::new(Gateway::from_config(&config, &registry).unwrap())
    }

    #[tokio::test]
    async fn test_upstreams_view() {
        let app = setup_admin_router(gateway(), "");
        let response = app
            .oneshot(Request::get("/admin/upstreams").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let api = &json[0];
        assert_eq!(api["name"], "api");
        assert_eq!(api["policy"], "weight_round_robin");
        assert_eq!(api["timeout_ms"], 250);
        assert_eq!(api["online"], 1);
        assert_eq!(api["servers"][0]["id"], "a");
        assert_eq!(api["servers"][0]["weight"], 3);
        assert_eq!(api["servers"][0]["status"], "online");
        assert_eq!(api["servers"][0]["current"], 0);
    }

    #[tokio::test]
    async fn test_bearer_auth() {
        let app = setup_admin_router(gateway(), "secret");

        let denied = app
            .clone()
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .clone()
            .oneshot(
                Request::get("/admin/status")
                    .header(header::AUTHORIZATION, "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let allowed = app
            .oneshot(
                Request::get("/admin/status")
                    .header(header::AUTHORIZATION, "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }
}
