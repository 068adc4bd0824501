//! Bounded in-flight call coalescing.
//!
//! # Behavior
//! ```text
//! run(key, start):
//!     tracked(key) < limit → start the call, track it until it settles
//!     otherwise            → share the most recently started tracked call
//! ```
//!
//! # Design Decisions
//! - Started calls are spawned, so they finish even if every caller goes away
//! - An entry is removed by its own call as it settles, never by callers
//! - A started call gets a detached cancellation token; one caller leaving
//!   does not cancel it for the others
//! - Failures are shared exactly like successes (`HandlerFault` is `Clone`)

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::action::{BoxHandler, HandlerFault, HandlerFuture};
use crate::http::{BufferedReply, RequestContext};
use crate::observability::metrics;

type SharedCall<T> = Shared<BoxFuture<'static, Result<T, HandlerFault>>>;

/// Limiter configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Calls allowed in flight per key. Values below 1 are treated as 1.
    pub limit: usize,
}

impl ConcurrencyConfig {
    pub fn new(limit: usize) -> Self {
        Self { limit: limit.max(1) }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { limit: 1 }
    }
}

struct Entry<T> {
    id: u64,
    call: SharedCall<T>,
}

/// Tracks in-flight calls per key and hands late callers an existing outcome.
pub struct Coalescer<T> {
    limit: usize,
    in_flight: Arc<DashMap<String, Vec<Entry<T>>>>,
    next_id: AtomicU64,
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: &ConcurrencyConfig) -> Self {
        Self {
            limit: config.limit.max(1),
            in_flight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of tracked calls for `key`.
    pub fn in_flight(&self, key: &str) -> usize {
        self.in_flight.get(key).map_or(0, |entries| entries.len())
    }

    /// Start a call for `key`, or join one already in flight.
    ///
    /// `start` is only invoked when a new call is started, on its first poll
    /// and outside any map lock.
    pub async fn run<F, Fut>(&self, key: &str, start: F) -> Result<T, HandlerFault>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, HandlerFault>> + Send + 'static,
    {
        self.enter(key, start).await
    }

    fn enter<F, Fut>(&self, key: &str, start: F) -> SharedCall<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, HandlerFault>> + Send + 'static,
    {
        let mut entries = self.in_flight.entry(key.to_string()).or_default();
        if entries.len() >= self.limit {
            if let Some(latest) = entries.last() {
                tracing::trace!(key, "joining in-flight call");
                metrics::record_coalesced("joined");
                return latest.call.clone();
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let in_flight = Arc::clone(&self.in_flight);
        let owned_key = key.to_string();
        // The entry leaves the map in the same poll that produces the outcome.
        let call = async move {
            let outcome = start().await;
            if let Some(mut entries) = in_flight.get_mut(&owned_key) {
                entries.retain(|entry| entry.id != id);
            }
            in_flight.remove_if(&owned_key, |_, entries| entries.is_empty());
            outcome
        }
        .boxed()
        .shared();
        entries.push(Entry { id, call: call.clone() });
        drop(entries);
        metrics::record_coalesced("started");

        let driver = call.clone();
        tokio::spawn(async move {
            let _ = driver.await;
        });

        call
    }
}

/// Wrapper coalescing every call of an action under one key.
pub fn limit_concurrency(
    config: ConcurrencyConfig,
) -> impl Fn(BoxHandler, RequestContext) -> HandlerFuture + Send + Sync + 'static {
    limit_concurrency_by(config, |_: &RequestContext| String::new())
}

/// Wrapper coalescing calls that resolve to the same key.
///
/// Replies are buffered so they can be handed to every joiner; a streaming
/// reply is reported as an internal fault.
pub fn limit_concurrency_by<K>(
    config: ConcurrencyConfig,
    resolve: K,
) -> impl Fn(BoxHandler, RequestContext) -> HandlerFuture + Send + Sync + 'static
where
    K: Fn(&RequestContext) -> String + Send + Sync + 'static,
{
    let coalescer = Arc::new(Coalescer::<BufferedReply>::new(&config));
    move |inner: BoxHandler, ctx: RequestContext| -> HandlerFuture {
        let coalescer = Arc::clone(&coalescer);
        let key = resolve(&ctx);
        let ctx = ctx.with_cancellation(CancellationToken::new());
        Box::pin(async move {
            let reply = coalescer
                .run(&key, move || async move {
                    match inner(ctx).await?.into_buffered() {
                        Ok(reply) => Ok(reply),
                        Err(_) => Err(HandlerFault::internal("streaming reply cannot be shared by the concurrency limiter")),
                    }
                })
                .await?;
            Ok(reply.into())
        })
    }
}
