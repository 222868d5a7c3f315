//! Route lookup.
//!
//! # Design Decisions
//! - Immutable after construction (shared without locks)
//! - O(n) scan over routes sorted by priority
//! - Explicit `None` rather than a silent default upstream

use axum::http::request::Parts;

use crate::config::RouteConfig;
use crate::routing::matcher::{HostMatcher, Matcher, PathPrefixMatcher};

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub upstream: String,
    pub priority: u32,
    matchers: Vec<Box<dyn Matcher>>,
}

impl Route {
    pub fn from_config(config: &RouteConfig) -> Self {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(host) = config.host.as_deref().filter(|h| !h.is_empty()) {
            matchers.push(Box::new(HostMatcher::new(host)));
        }
        if let Some(prefix) = config.path_prefix.as_deref().filter(|p| !p.is_empty()) {
            matchers.push(Box::new(PathPrefixMatcher::new(prefix)));
        }
        Self {
            name: config.name.clone(),
            upstream: config.upstream.clone(),
            priority: config.priority,
            matchers,
        }
    }

    pub fn matches(&self, parts: &Parts) -> bool {
        self.matchers.iter().all(|m| m.matches(parts))
    }
}

/// Priority-ordered route table.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new(configs: &[RouteConfig]) -> Self {
        let mut routes: Vec<Route> = configs.iter().map(Route::from_config).collect();
        // Stable sort keeps declaration order among equal priorities.
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { routes }
    }

    /// First route matching the request head.
    pub fn route(&self, parts: &Parts) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(parts))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn route(name: &str, host: Option<&str>, prefix: Option<&str>, priority: u32) -> RouteConfig {
        RouteConfig {
            name: name.to_string(),
            host: host.map(str::to_string),
            path_prefix: prefix.map(str::to_string),
            upstream: format!("{name}-up"),
            priority,
        }
    }

    fn head(host: &str, path: &str) -> Parts {
        Request::builder()
            .uri(path)
            .header("Host", host)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn test_priority_then_declaration_order() {
        let router = Router::new(&[
            route("catch_all", None, None, 0),
            route("api", None, Some("/api"), 10),
            route("api_v2", None, Some("/api/v2"), 10),
            route("admin_host", Some("admin.local"), None, 20),
        ]);

        assert_eq!(router.route(&head("x", "/api/v2/users")).unwrap().name, "api");
        assert_eq!(router.route(&head("x", "/static")).unwrap().name, "catch_all");
        assert_eq!(
            router.route(&head("admin.local:80", "/api")).unwrap().name,
            "admin_host"
        );
    }

    #[test]
    fn test_no_match() {
        let router = Router::new(&[route("api", Some("api.local"), Some("/v1"), 0)]);
        assert!(router.route(&head("api.local", "/v2")).is_none());
        assert!(router.route(&head("web.local", "/v1")).is_none());
        assert_eq!(
            router.route(&head("API.local", "/v1/x")).unwrap().upstream,
            "api-up"
        );
    }
}
