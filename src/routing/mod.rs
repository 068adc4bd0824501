//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route registration (setup):
//!     (Method, "/items/:id")
//!     → matcher.rs (compile pattern into segments, reject malformed)
//!     → router.rs (insert into the segment tree, keyed by method)
//!
//! Incoming request:
//!     (Method, "/items/42")
//!     → router.rs (walk the tree)
//!     → Return: Match { action, params: {id: "42"}, pattern } or None
//! ```
//!
//! # Design Decisions
//! - Routes compiled at setup, immutable while serving
//! - No regex in the hot path (segment comparison only)
//! - Deterministic precedence: static > parameter > wildcard, with backtracking
//! - Re-registering an identical (method, pattern) replaces the entry

pub mod matcher;
pub mod method;
pub mod router;

pub use matcher::{Pattern, Segment};
pub use method::{Method, UnsupportedMethod};
pub use router::{Match, Router};
