//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors at once)
//!     → EdgeConfig (validated, immutable)
//!     → lifecycle builds upstreams and routes from it
//!
//! On change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → sent over a channel; Gateway::apply reconciles
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes arrive as a whole new value
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, ContextPoolConfig, EdgeConfig, HealthCheckConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, RetryConfig, RouteConfig, ServerConfig, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
