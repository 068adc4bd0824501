//! Request dispatch: route, run the action lifecycle, render the reply.
//!
//! # Responsibilities
//! - Resolve `(method, path)` through the frozen registry (404 / 405 otherwise)
//! - Buffer the request body up to the configured limit (413 beyond it)
//! - Derive the per-request cancellation token from the connection token
//! - Run the action and pick the buffered or streaming path from the reply
//! - Apply the fault policy to handler and stream producer faults
//!
//! # Fault policy
//! ```text
//! HandlerFault::Status    → reply with that status
//! HandlerFault::Cancelled → 503, logged at debug
//! HandlerFault::Internal  → fault callback's reply, if configured
//!                         → else 500, fault recorded, shutdown triggered
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::header::ALLOW;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::action::{HandlerFault, Registry, Unresolved};
use crate::config::ServerConfig;
use crate::http::request::{Exchange, RequestContext};
use crate::http::response::Reply;
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionId, ConnectionInfo};
use crate::observability::metrics;
use crate::routing::Method;
use crate::streaming::{BoxError, BridgeOptions};

/// Turns an internal fault into the reply sent to the client.
pub type FaultCallback = Arc<dyn Fn(&HandlerFault, &RequestContext) -> Reply + Send + Sync>;

/// Cancellation scope of the connection a request arrived on.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionScope(pub(crate) CancellationToken);

#[derive(Clone)]
struct FaultPolicy {
    callback: Option<FaultCallback>,
    fatal: Arc<OnceLock<HandlerFault>>,
    shutdown: Shutdown,
}

impl FaultPolicy {
    fn reply(&self, fault: HandlerFault, ctx: &RequestContext) -> Reply {
        match &fault {
            HandlerFault::Status { status, message } => {
                tracing::debug!(status = %status, message = %message, "handler answered with fault status");
                Reply::from(fault)
            }
            HandlerFault::Cancelled => {
                tracing::debug!("handler cancelled");
                Reply::from(fault)
            }
            HandlerFault::Internal(_) => match &self.callback {
                Some(callback) => {
                    tracing::warn!(error = %fault, "handler fault");
                    callback(&fault, ctx)
                }
                None => {
                    self.escalate(fault.clone());
                    Reply::from(fault)
                }
            },
        }
    }

    fn stream_fault(&self, err: &BoxError, ctx: &RequestContext) {
        let fault = match err.downcast_ref::<HandlerFault>() {
            Some(fault) => fault.clone(),
            None => HandlerFault::internal(err.to_string()),
        };
        match (&fault, &self.callback) {
            (HandlerFault::Status { .. } | HandlerFault::Cancelled, _) => {
                tracing::debug!(error = %fault, "stream ended by producer fault");
            }
            (HandlerFault::Internal(_), Some(callback)) => {
                tracing::warn!(error = %fault, "stream producer fault");
                // Headers are already sent; the callback is told, its reply is not used.
                let _ = callback(&fault, ctx);
            }
            (HandlerFault::Internal(_), None) => self.escalate(fault),
        }
    }

    fn escalate(&self, fault: HandlerFault) {
        tracing::error!(error = %fault, "unhandled fault, shutting down");
        let _ = self.fatal.set(fault);
        self.shutdown.trigger();
    }
}

/// Dispatches requests to the actions of a frozen [`Registry`].
pub struct Dispatcher {
    registry: Arc<Registry>,
    faults: FaultPolicy,
    max_body_size: usize,
    stream_options: BridgeOptions,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, config: &ServerConfig, shutdown: Shutdown) -> Self {
        Self {
            registry,
            faults: FaultPolicy {
                callback: None,
                fatal: Arc::new(OnceLock::new()),
                shutdown,
            },
            max_body_size: config.limits.max_body_size,
            stream_options: BridgeOptions {
                on_fault: None,
                max_duration: config.timeouts.stream(),
            },
        }
    }

    /// Route internal faults through `callback` instead of shutting down.
    pub fn on_fault(self, callback: impl Fn(&HandlerFault, &RequestContext) -> Reply + Send + Sync + 'static) -> Self {
        self.fault_callback(Some(Arc::new(callback)))
    }

    pub fn fault_callback(mut self, callback: Option<FaultCallback>) -> Self {
        self.faults.callback = callback;
        self
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.faults.shutdown
    }

    /// The fault that brought the server down, if any.
    pub fn fatal(&self) -> Option<HandlerFault> {
        self.faults.fatal.get().cloned()
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        let start = Instant::now();
        let method_name = request.method().as_str().to_string();

        let Ok(method) = Method::try_from(request.method()) else {
            metrics::record_request(&method_name, "unmatched", 405, start);
            return method_not_allowed(&Method::ALL);
        };

        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();

        let resolved = match self.registry.find(method, &path) {
            Ok(resolved) => resolved,
            Err(Unresolved::NotFound) => {
                tracing::debug!(method = %method, path = %path, "no route matched");
                metrics::record_request(&method_name, "unmatched", 404, start);
                return Reply::text("not found").with_status(StatusCode::NOT_FOUND).into_response();
            }
            Err(Unresolved::MethodNotAllowed(allowed)) => {
                metrics::record_request(&method_name, "unmatched", 405, start);
                return method_not_allowed(&allowed);
            }
        };

        let pattern = resolved.pattern.to_string();
        let body = match axum::body::to_bytes(body, self.max_body_size).await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(error = %e, limit = self.max_body_size, "request body rejected");
                metrics::record_request(&method_name, &pattern, 413, start);
                return Reply::text("payload too large")
                    .with_status(StatusCode::PAYLOAD_TOO_LARGE)
                    .into_response();
            }
        };

        let connection = parts.extensions.get::<ConnectionInfo>().cloned().unwrap_or_else(|| ConnectionInfo {
            id: ConnectionId::new(),
            peer: ([0, 0, 0, 0], 0).into(),
        });
        let cancel = match parts.extensions.get::<ConnectionScope>() {
            Some(scope) => scope.0.child_token(),
            None => self.faults.shutdown.child_token(),
        };
        // Dropped with the request future (peer gone) or with the response stream.
        let guard = cancel.clone().drop_guard();

        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        let exchange = Exchange {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        };
        let ctx = RequestContext::new(connection, exchange, resolved.params, cancel.clone(), request_id);
        let snapshot = ctx.clone();
        let action = resolved.action;

        let span = tracing::info_span!(
            "dispatch",
            request_id = %ctx.request_id(),
            connection_id = %ctx.connection().id,
            action = %action.key(),
            route = %pattern,
        );

        async move {
            let reply = match action.invoke(ctx).await {
                Ok(reply) => reply,
                Err(fault) => self.faults.reply(fault, &snapshot),
            };
            let status = reply.status.as_u16();
            let streaming = reply.is_streaming();
            metrics::record_request(&method_name, &pattern, status, start);
            tracing::debug!(status, streaming, elapsed_ms = start.elapsed().as_millis() as u64, "dispatched");

            let mut options = self.stream_options.clone();
            if streaming {
                let faults = self.faults.clone();
                options.on_fault = Some(Arc::new(move |err: &BoxError| faults.stream_fault(err, &snapshot)));
            }
            reply.render(cancel, options, Some(guard))
        }
        .instrument(span)
        .await
    }
}

fn method_not_allowed(allowed: &[Method]) -> Response {
    let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
    let mut reply = Reply::text("method not allowed").with_status(StatusCode::METHOD_NOT_ALLOWED);
    if let Ok(value) = HeaderValue::from_str(&allow) {
        reply = reply.header(ALLOW, value);
    }
    reply.into_response()
}

/// Axum fallback handler feeding every request to the dispatcher.
pub async fn dispatch(State(dispatcher): State<Arc<Dispatcher>>, request: Request) -> Response {
    dispatcher.dispatch(request).await
}
