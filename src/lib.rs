//! Action dispatch library: routing, action composition, demand-driven
//! streaming and push/pull coordination primitives.

// Core subsystems
pub mod action;
pub mod config;
pub mod http;
pub mod net;
pub mod routing;
pub mod streaming;
pub mod sync;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use action::{Action, ActionKey, BeforeOutcome, HandlerFault, Registry, SetupError};
pub use config::ServerConfig;
pub use http::{Dispatcher, HttpServer, Reply, RequestContext};
pub use lifecycle::Shutdown;
