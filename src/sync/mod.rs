//! Push/pull rendezvous primitives.
//!
//! # Data Flow
//! ```text
//! producer ──push()──▶ ┌──────────────┐ ◀──pull()── consumer
//!                      │   Channel    │
//!   Delivery ◀─────────│ push buffer  │──────────▶ Pull
//!   (resolves once     │ pull buffer  │  (resolves once a
//!    a pull takes it)  └──────────────┘   push arrives)
//!
//! Multicast: push() ──▶ Channel per Receiver (fan-out)
//! Lastcast:  push() ──▶ single slot, newest value wins
//! ```
//!
//! # Design Decisions
//! - Every primitive speaks the same contract: `pull()` yields a [`Step`],
//!   `push()` yields a [`Delivery`]; the streaming bridge consumes any of them
//! - Hand-off is direct: a push resolves the oldest waiter's oneshot, a pull
//!   acknowledges the oldest buffered push
//! - Locks are held only for buffer manipulation, never across an await
//! - Closing is terminal; everything pending resolves to "done"

pub mod channel;
pub mod lastcast;
pub mod multicast;
pub mod queue;

pub use channel::Channel;
pub use lastcast::Lastcast;
pub use multicast::{Multicast, MulticastBuilder, Receiver};
pub use queue::Queue;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// One result of a pull: a value, a terminal marker, or both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<T> {
    /// The produced value, absent on a bare terminal step.
    pub value: Option<T>,
    /// Whether the producer is finished.
    pub done: bool,
}

impl<T> Step<T> {
    /// A regular value.
    pub fn next(value: T) -> Self {
        Self { value: Some(value), done: false }
    }

    /// The terminal step with no value.
    pub fn done() -> Self {
        Self { value: None, done: true }
    }

    /// A final value that also ends the sequence.
    pub fn last(value: T) -> Self {
        Self { value: Some(value), done: true }
    }
}

/// How a push was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// A puller took the value.
    Delivered,
    /// The value was evicted or overwritten before anyone pulled it.
    Dropped,
    /// The primitive was closed before the value was delivered.
    Closed,
}

/// Handle returned by a push; resolves once the value is settled.
///
/// Dropping it does not retract the push.
#[derive(Debug)]
pub struct Delivery {
    state: DeliveryState,
}

#[derive(Debug)]
enum DeliveryState {
    Ready(Option<PushOutcome>),
    Waiting(oneshot::Receiver<PushOutcome>),
}

impl Delivery {
    pub(crate) fn ready(outcome: PushOutcome) -> Self {
        Self { state: DeliveryState::Ready(Some(outcome)) }
    }

    pub(crate) fn waiting(rx: oneshot::Receiver<PushOutcome>) -> Self {
        Self { state: DeliveryState::Waiting(rx) }
    }

    /// Whether the push was settled synchronously.
    pub fn is_settled(&self) -> bool {
        matches!(self.state, DeliveryState::Ready(_))
    }
}

impl Future for Delivery {
    type Output = PushOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            DeliveryState::Ready(outcome) => Poll::Ready(outcome.take().unwrap_or(PushOutcome::Closed)),
            // The owning primitive was dropped with the value still buffered.
            DeliveryState::Waiting(rx) => Pin::new(rx).poll(cx).map(|res| res.unwrap_or(PushOutcome::Closed)),
        }
    }
}

/// Handle returned by a pull; resolves with the matched [`Step`].
#[derive(Debug)]
pub struct Pull<T> {
    state: PullState<T>,
}

#[derive(Debug)]
enum PullState<T> {
    Ready(Option<Step<T>>),
    Waiting(oneshot::Receiver<Step<T>>),
}

// No structural pinning: the step is moved out of the Option, never pinned.
impl<T> Unpin for Pull<T> {}

impl<T> Pull<T> {
    pub(crate) fn ready(step: Step<T>) -> Self {
        Self { state: PullState::Ready(Some(step)) }
    }

    pub(crate) fn waiting(rx: oneshot::Receiver<Step<T>>) -> Self {
        Self { state: PullState::Waiting(rx) }
    }
}

impl<T> Future for Pull<T> {
    type Output = Step<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            PullState::Ready(step) => Poll::Ready(step.take().unwrap_or_else(Step::done)),
            // Sender dropped: evicted waiter or the primitive went away.
            PullState::Waiting(rx) => Pin::new(rx).poll(cx).map(|res| res.unwrap_or_else(|_| Step::done())),
        }
    }
}

/// A buffered push awaiting its puller.
pub(crate) struct Pending<T> {
    pub(crate) step: Step<T>,
    pub(crate) ack: oneshot::Sender<PushOutcome>,
}

impl<T> Pending<T> {
    pub(crate) fn settle(self, outcome: PushOutcome) -> Step<T> {
        let _ = self.ack.send(outcome);
        self.step
    }
}

/// Hand a step to the oldest live waiter. Gives the step back when every
/// waiter has gone away.
pub(crate) fn hand_off<T>(
    waiters: &mut Queue<oneshot::Sender<Step<T>>>,
    mut step: Step<T>,
) -> Result<(), Step<T>> {
    while let Some(waiter) = waiters.dequeue() {
        match waiter.send(step) {
            Ok(()) => return Ok(()),
            Err(returned) => step = returned,
        }
    }
    Err(step)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
