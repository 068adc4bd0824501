//! Bridge from a pull [`Source`] to a demand-driven [`Stream`].
//!
//! # Responsibilities
//! - Advance the source exactly once per poll of the output stream
//! - Stop on cancellation (token, deadline, or the output being dropped)
//!   and tell the source to terminate early
//! - Report producer faults, swallowing cancellation artifacts
//!
//! # Lifecycle
//! ```text
//! poll ──▶ cancelled? ──yes──▶ Source::cancel, end
//!            │ no
//!            ▼
//!        Source::next ──Ok(value)──▶ yield
//!            │      └──Ok(done)───▶ yield final value (if any), end
//!            └──Err──▶ Source::cancel, report fault, end
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::observability::metrics;
use crate::streaming::{is_cancellation, BoxError, Source};
use crate::sync::Step;

/// Receives producer faults that are not cancellation artifacts.
pub type FaultHook = Arc<dyn Fn(&BoxError) + Send + Sync>;

/// Optional bridge behaviour.
#[derive(Clone, Default)]
pub struct BridgeOptions {
    /// Fault handler; faults are logged when absent.
    pub on_fault: Option<FaultHook>,
    /// Upper bound on the stream's lifetime. Expiry cancels the token.
    pub max_duration: Option<Duration>,
}

impl BridgeOptions {
    pub fn on_fault(mut self, hook: impl Fn(&BoxError) + Send + Sync + 'static) -> Self {
        self.on_fault = Some(Arc::new(hook));
        self
    }

    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }
}

/// Output side of the bridge.
pub struct Bridge<T> {
    inner: BoxStream<'static, T>,
}

impl<T: Send + 'static> Bridge<T> {
    pub fn new<S>(source: S, cancel: CancellationToken) -> Self
    where
        S: Source<Item = T>,
    {
        Self::with_options(source, cancel, BridgeOptions::default())
    }

    pub fn with_options<S>(source: S, cancel: CancellationToken, options: BridgeOptions) -> Self
    where
        S: Source<Item = T>,
    {
        Self::guarded(source, cancel, options, None)
    }

    /// Like [`Bridge::with_options`], holding `guard` until the stream ends
    /// or is dropped.
    pub(crate) fn guarded<S>(
        source: S,
        cancel: CancellationToken,
        options: BridgeOptions,
        guard: Option<DropGuard>,
    ) -> Self
    where
        S: Source<Item = T>,
    {
        let pump = Pump {
            source,
            cancel,
            on_fault: options.on_fault,
            deadline: options.max_duration.map(|d| Instant::now() + d),
            finished: false,
            delivered: 0,
            _guard: guard,
        };
        Self {
            inner: stream::unfold(pump, Pump::advance).boxed(),
        }
    }
}

impl<T> Stream for Bridge<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.inner.poll_next_unpin(cx)
    }
}

enum Polled<T> {
    Cancelled,
    TimedOut,
    Step(Result<Step<T>, BoxError>),
}

struct Pump<S: Source> {
    source: S,
    cancel: CancellationToken,
    on_fault: Option<FaultHook>,
    deadline: Option<Instant>,
    finished: bool,
    delivered: u64,
    _guard: Option<DropGuard>,
}

impl<S: Source> Pump<S> {
    async fn advance(mut self) -> Option<(S::Item, Self)> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.stop("cancelled");
                return None;
            }

            let cancel = self.cancel.clone();
            let deadline = self.deadline;
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => Polled::Cancelled,
                _ = deadline_elapsed(deadline) => Polled::TimedOut,
                result = self.source.next() => Polled::Step(result),
            };

            match polled {
                Polled::Cancelled => {
                    self.stop("cancelled");
                    return None;
                }
                Polled::TimedOut => {
                    self.cancel.cancel();
                    self.stop("timed_out");
                    return None;
                }
                Polled::Step(Ok(step)) if step.done => {
                    self.finished = true;
                    tracing::debug!(delivered = self.delivered, "stream completed");
                    metrics::record_stream("completed");
                    return step.value.map(|value| (value, self));
                }
                Polled::Step(Ok(step)) => {
                    if let Some(value) = step.value {
                        self.delivered += 1;
                        return Some((value, self));
                    }
                }
                Polled::Step(Err(err)) => {
                    self.fail(err);
                    return None;
                }
            }
        }
    }

    fn stop(&mut self, outcome: &'static str) {
        self.finished = true;
        self.source.cancel();
        tracing::debug!(delivered = self.delivered, outcome, "stream stopped early");
        metrics::record_stream(outcome);
    }

    fn fail(&mut self, err: BoxError) {
        self.finished = true;
        self.source.cancel();

        if is_cancellation(&err) || self.cancel.is_cancelled() {
            tracing::debug!(error = %err, "stream ended by cancellation");
            metrics::record_stream("cancelled");
            return;
        }

        metrics::record_stream("failed");
        match &self.on_fault {
            Some(hook) => hook(&err),
            None => tracing::error!(error = %err, delivered = self.delivered, "stream producer failed"),
        }
    }
}

impl<S: Source> Drop for Pump<S> {
    fn drop(&mut self) {
        // Dropped mid-stream: the consumer went away.
        if !self.finished {
            self.stop("disconnected");
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
