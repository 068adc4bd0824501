//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, one semaphore permit per live connection)
//!     → connection.rs (id, peer address, drain tracking)
//!     → http::server (hyper connection task)
//! ```
//!
//! # Design Decisions
//! - At the connection limit, accept waits instead of refusing
//! - Shutdown waits on the tracker, bounded by the grace period

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionInfo, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
