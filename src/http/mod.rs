//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper connection, middleware, cancellation scope)
//!     → dispatcher.rs (route, buffer body, run the action)
//!     → request.rs (context handed to hooks and handlers)
//!     → response.rs (buffered body, or a stream driven by the bridge)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::{Dispatcher, FaultCallback};
pub use request::{ContextPatch, Exchange, RequestContext};
pub use response::{sse_frame, BufferedReply, Reply, ReplyBody};
pub use server::{HttpServer, ServeError};
