//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build upstreams → Start checkers → Start listeners
//!
//! Reload (startup.rs, Gateway::apply):
//!     New config → swap policies/timeouts → diff servers → checker fan-out
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then upstreams, then listeners
//! - Servers enter a pool only through its health checker, so the
//!   checker and the balancer registry never disagree on membership
//! - Adding or removing upstreams and routes requires a restart

pub mod signals;
pub mod startup;

pub use signals::shutdown_signal;
pub use startup::{Gateway, Upstream};
