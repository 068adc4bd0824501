//! Demand-driven streaming subsystem.
//!
//! # Data Flow
//! ```text
//! Source (Channel | Receiver | Lastcast | Sequence)
//!     → source.rs (pull contract: next() → Step { value, done })
//!     → bridge.rs (one next() per downstream poll, cancellation aware)
//!     → Stream<Item = T>
//!     → axum Body::from_stream (dispatcher)
//! ```
//!
//! # Design Decisions
//! - Backpressure comes from the pull contract: nothing is produced until
//!   the response body asks for the next chunk
//! - Cancellation is an explicit token passed next to the source
//! - Cancellation artifacts are never reported as faults

pub mod bridge;
pub mod source;

pub use bridge::{Bridge, BridgeOptions, FaultHook};
pub use source::{BoxSource, Map, Sequence, Source, SourceExt};

use thiserror::Error;

use crate::action::HandlerFault;

/// Boxed error produced by a source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error a source raises when it stops because its consumer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stream cancelled")]
pub struct Cancelled;

/// Whether `err` is an artifact of cancellation rather than a real fault.
pub fn is_cancellation(err: &BoxError) -> bool {
    err.is::<Cancelled>() || matches!(err.downcast_ref::<HandlerFault>(), Some(HandlerFault::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_detection() {
        assert!(is_cancellation(&(Box::new(Cancelled) as BoxError)));
        assert!(is_cancellation(&(Box::new(HandlerFault::Cancelled) as BoxError)));
        assert!(!is_cancellation(&(Box::new(HandlerFault::internal("boom")) as BoxError)));
        assert!(!is_cancellation(&BoxError::from("plain")));
    }
}
