//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to a wrapped action:
//!     → concurrency.rs (start the call, or join one already in flight)
//!     → handler runs at most `limit` times concurrently per key
//! ```
//!
//! # Design Decisions
//! - Limiters are plain wrappers; actions opt in with `Action::wrap`
//! - Shared outcomes are buffered replies, so they can be cloned to joiners

pub mod concurrency;

pub use concurrency::{limit_concurrency, limit_concurrency_by, Coalescer, ConcurrencyConfig};
