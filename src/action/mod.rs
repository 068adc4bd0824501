//! Action composition subsystem.
//!
//! # Data Flow
//! ```text
//! Setup:
//!     Registry::action(key) / Registry::mount(controller).get(..)
//!     → hooks.rs (accumulate before/after hooks, at most one wrapper)
//!     → registry.rs (route table + identity map)
//!     → Registry::freeze (resolve callables, validate)
//!
//! Serving:
//!     Registry::find(method, path) → Action::invoke(context)
//! ```
//!
//! # Design Decisions
//! - Handlers are bound explicitly at setup, keyed by controller type and
//!   property name
//! - A second wrapper on one action is a setup error, never a silent override

pub mod fault;
pub mod hooks;
pub mod registry;

pub use fault::{HandlerFault, SetupError};
pub use hooks::{Action, BeforeOutcome, BoxHandler, HandlerFuture};
pub use registry::{ActionKey, Mount, Registry, Resolved, Unresolved};
