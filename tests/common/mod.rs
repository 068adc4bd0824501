//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use action_dispatch::action::Registry;
use action_dispatch::config::ServerConfig;
use action_dispatch::http::{Dispatcher, HttpServer, ServeError};
use action_dispatch::lifecycle::Shutdown;
use action_dispatch::net::Listener;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A dispatch server running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ServeError>>,
}

#[allow(dead_code)]
impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the accept loop to finish.
    pub async fn stop(self) -> Result<(), ServeError> {
        self.shutdown.trigger();
        self.join().await
    }

    pub async fn join(self) -> Result<(), ServeError> {
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.max_connections = 64;
    config.limits.max_body_size = 1024;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

/// Freeze `registry` and serve it with `configure` applied to the dispatcher.
pub async fn spawn_server(
    config: ServerConfig,
    registry: Registry,
    configure: impl FnOnce(Dispatcher) -> Dispatcher,
) -> TestServer {
    let registry = registry.freeze().expect("registry should freeze");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let listener = Listener::from_listener(listener, config.listener.max_connections);

    let dispatcher = configure(Dispatcher::new(registry, &config, Shutdown::new()));
    let server = HttpServer::new(&config, dispatcher);
    let shutdown = server.shutdown();
    let handle = tokio::spawn(server.run(listener));

    TestServer { addr, shutdown, handle }
}

/// A client that does not pool connections, so shutdown is not held up.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
