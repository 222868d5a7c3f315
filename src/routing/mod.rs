//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request head (host, path)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: matched Route or None (404 at the boundary)
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Sort by priority
//!     → Compile matchers
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - First match wins (ordered by priority, then declaration order)

pub mod matcher;
pub mod router;

pub use router::{Route, Router};
