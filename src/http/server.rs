//! HTTP server setup and the connection accept loop.
//!
//! # Responsibilities
//! - Build the Axum router: one fallback feeding the dispatcher
//! - Wire up middleware (request ID, tracing, request timeout)
//! - Serve each accepted connection with HTTP/1.1 and HTTP/2 auto-detection
//! - Give every connection a cancellation scope under the shutdown token
//! - Stop accepting on shutdown and drain live connections with a grace period
//!
//! # Cancellation
//! ```text
//! Shutdown token
//!     → connection token (cancelled on close or shutdown)
//!         → request token (cancelled when the reply is done or dropped)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use thiserror::Error;
use tokio::net::TcpStream;
use tower::ServiceExt;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::action::HandlerFault;
use crate::config::ServerConfig;
use crate::http::dispatcher::{self, ConnectionScope, Dispatcher};
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionInfo, ConnectionPermit, ConnectionTracker, Listener, ListenerError};

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("listener failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stopped by unhandled fault: {0}")]
    UnhandledFault(HandlerFault),
}

/// HTTP server driving a [`Dispatcher`].
pub struct HttpServer {
    router: Router,
    dispatcher: Arc<Dispatcher>,
    tracker: ConnectionTracker,
    grace: Duration,
}

impl HttpServer {
    pub fn new(config: &ServerConfig, dispatcher: Dispatcher) -> Self {
        let dispatcher = Arc::new(dispatcher);
        let router = Self::build_router(config, Arc::clone(&dispatcher));
        Self {
            router,
            dispatcher,
            tracker: ConnectionTracker::new(),
            grace: config.timeouts.shutdown_grace(),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ServerConfig, dispatcher: Arc<Dispatcher>) -> Router {
        Router::new()
            .fallback(dispatcher::dispatch)
            .with_state(dispatcher)
            .layer(TimeoutLayer::new(config.timeouts.request()))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Handle used to stop the server.
    pub fn shutdown(&self) -> Shutdown {
        self.dispatcher.shutdown().clone()
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Accept connections until shutdown, then drain.
    ///
    /// Returns [`ServeError::UnhandledFault`] when an internal fault with
    /// no fault callback brought the server down.
    pub async fn run(self, listener: Listener) -> Result<(), ServeError> {
        let addr = listener.local_addr()?;
        let shutdown = self.shutdown();
        tracing::info!(address = %addr, "HTTP server starting");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }

        // Stop accepting before draining.
        drop(listener);
        shutdown.trigger();
        tracing::info!(active = self.tracker.active_count(), "draining connections");
        if !self.tracker.drain(self.grace).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                grace_secs = self.grace.as_secs(),
                "connections still open after grace period"
            );
        }
        tracing::info!("HTTP server stopped");

        match self.dispatcher.fatal() {
            Some(fault) => Err(ServeError::UnhandledFault(fault)),
            None => Ok(()),
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let guard = self.tracker.track();
        let info = ConnectionInfo { id: guard.id(), peer };
        let token = self.dispatcher.shutdown().child_token();
        let router = self.router.clone();

        tracing::debug!(connection_id = %info.id, peer = %peer, "connection accepted");

        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            let scope = ConnectionScope(token.clone());

            let service = hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
                request.extensions_mut().insert(info.clone());
                request.extensions_mut().insert(scope.clone());
                router.clone().oneshot(request)
            });

            let builder = auto::Builder::new(TokioExecutor::new());
            let connection = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(connection);

            tokio::select! {
                result = connection.as_mut() => {
                    if let Err(e) = result {
                        tracing::debug!(error = %e, "connection error");
                    }
                }
                _ = token.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    if let Err(e) = connection.await {
                        tracing::debug!(error = %e, "connection error during shutdown");
                    }
                }
            }

            // Anything still tied to this connection is done.
            token.cancel();
        });
    }
}
