//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatcher, bridge, limiter, server:
//!     → logging.rs (tracing events inside a per-request "dispatch" span)
//!     → metrics.rs (request, stream outcome, coalescing counters)
//!
//! Consumers:
//!     → stdout (text or JSON)
//!     → Prometheus scrape endpoint, when enabled
//! ```
//!
//! # Design Decisions
//! - The dispatch span carries request id, connection id, action and route
//! - Stream outcomes are counted once, when the bridge stops

pub mod logging;
pub mod metrics;
