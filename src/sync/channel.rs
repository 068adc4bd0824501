//! Two-sided rendezvous channel.
//!
//! # State Machine
//! ```text
//! OPEN ──close() / done step delivered──▶ CLOSED (terminal)
//! ```
//!
//! # Invariants
//! - The push buffer and the pull buffer are never both non-empty: a push
//!   either satisfies a waiting pull or is buffered, a pull either takes a
//!   buffered push or waits
//! - Pulls are satisfied in registration order, pushes delivered in push order

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::streaming::{BoxError, Bridge, Source};
use crate::sync::{hand_off, lock, Delivery, Pending, Pull, PushOutcome, Queue, Step};

/// Two-sided rendezvous between producers and consumers.
///
/// Cloning yields another handle to the same channel.
pub struct Channel<T> {
    state: Arc<Mutex<State<T>>>,
}

struct State<T> {
    pushes: Queue<Pending<T>>,
    pulls: Queue<oneshot::Sender<Step<T>>>,
    closed: bool,
}

impl<T> State<T> {
    fn close(&mut self) {
        self.closed = true;
        for pending in self.pushes.drain() {
            pending.settle(PushOutcome::Closed);
        }
        for waiter in self.pulls.drain() {
            let _ = waiter.send(Step::done());
        }
    }
}

impl<T> Channel<T> {
    /// Create a channel with unbounded buffers.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a channel whose push and pull buffers each hold at most
    /// `capacity` entries (0 = unbounded). Overflow evicts the oldest entry.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                pushes: Queue::with_capacity(capacity),
                pulls: Queue::with_capacity(capacity),
                closed: false,
            })),
        }
    }

    /// Offer a value. Resolves once a pull takes it.
    pub fn push(&self, value: T) -> Delivery {
        self.offer(Step::next(value))
    }

    /// Offer a final value; the channel closes once it is delivered.
    pub fn push_last(&self, value: T) -> Delivery {
        self.offer(Step::last(value))
    }

    fn offer(&self, step: Step<T>) -> Delivery {
        let mut state = lock(&self.state);
        if state.closed {
            return Delivery::ready(PushOutcome::Closed);
        }

        let done = step.done;
        let step = match hand_off(&mut state.pulls, step) {
            Ok(()) => {
                if done {
                    state.close();
                }
                return Delivery::ready(PushOutcome::Delivered);
            }
            Err(step) => step,
        };

        let (ack, rx) = oneshot::channel();
        if let Some(evicted) = state.pushes.enqueue(Pending { step, ack }) {
            evicted.settle(PushOutcome::Dropped);
        }
        Delivery::waiting(rx)
    }

    /// Take the next value, waiting for a push when none is buffered.
    pub fn pull(&self) -> Pull<T> {
        let mut state = lock(&self.state);
        if state.closed {
            return Pull::ready(Step::done());
        }

        if let Some(pending) = state.pushes.dequeue() {
            let step = pending.settle(PushOutcome::Delivered);
            if step.done {
                state.close();
            }
            return Pull::ready(step);
        }

        let (tx, rx) = oneshot::channel();
        if let Some(evicted) = state.pulls.enqueue(tx) {
            let _ = evicted.send(Step::done());
        }
        Pull::waiting(rx)
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        if !state.closed {
            state.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Number of pushes waiting for a puller.
    pub fn buffered(&self) -> usize {
        lock(&self.state).pushes.len()
    }

    /// Number of pulls waiting for a pusher.
    pub fn waiting(&self) -> usize {
        lock(&self.state).pulls.len()
    }
}

impl<T: Send + 'static> Channel<T> {
    /// Hand this channel to the streaming bridge.
    pub fn wrap(&self, cancel: CancellationToken) -> Bridge<T> {
        Bridge::new(self.clone(), cancel)
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Channel")
            .field("buffered", &state.pushes.len())
            .field("waiting", &state.pulls.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T: Send + 'static> Source for Channel<T> {
    type Item = T;

    fn next(&mut self) -> BoxFuture<'_, Result<Step<T>, BoxError>> {
        let pull = self.pull();
        Box::pin(async move { Ok(pull.await) })
    }

    fn cancel(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_with_buffered_pushes() {
        let channel = Channel::new();
        let d1 = channel.push("v1");
        let d2 = channel.push("v2");
        let d3 = channel.push("v3");
        assert_eq!(channel.buffered(), 3);

        assert_eq!(channel.pull().await, Step::next("v1"));
        assert_eq!(channel.pull().await, Step::next("v2"));
        assert_eq!(channel.pull().await, Step::next("v3"));

        assert_eq!(d1.await, PushOutcome::Delivered);
        assert_eq!(d2.await, PushOutcome::Delivered);
        assert_eq!(d3.await, PushOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_waiting_pulls_resolve_in_order() {
        let channel = Channel::new();
        let p1 = channel.pull();
        let p2 = channel.pull();
        assert_eq!(channel.waiting(), 2);

        let d1 = channel.push(1);
        let d2 = channel.push(2);
        assert!(d1.is_settled());
        assert!(d2.is_settled());

        assert_eq!(p1.await, Step::next(1));
        assert_eq!(p2.await, Step::next(2));
        assert_eq!(channel.waiting(), 0);
        assert_eq!(channel.buffered(), 0);
    }

    #[tokio::test]
    async fn test_push_resolves_only_on_delivery() {
        let channel = Channel::new();
        let mut delivery = channel.push(7);

        let pending = futures_util::poll!(&mut delivery);
        assert!(pending.is_pending());

        assert_eq!(channel.pull().await, Step::next(7));
        assert_eq!(delivery.await, PushOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_close_resolves_everything_pending() {
        let channel: Channel<u32> = Channel::new();
        let waiter = channel.pull();
        channel.close();
        assert_eq!(waiter.await, Step::done());

        let buffered = Channel::new();
        let delivery = buffered.push(1);
        buffered.close();
        assert_eq!(delivery.await, PushOutcome::Closed);
    }

    #[tokio::test]
    async fn test_closed_channel_is_terminal() {
        let channel = Channel::new();
        channel.close();
        channel.close();

        assert!(channel.is_closed());
        assert_eq!(channel.pull().await, Step::done());
        assert_eq!(channel.push(1).await, PushOutcome::Closed);
        assert_eq!(channel.pull().await, Step::done());
    }

    #[tokio::test]
    async fn test_last_push_closes_after_delivery() {
        let channel = Channel::new();
        channel.push(1);
        channel.push_last(2);
        assert!(!channel.is_closed());

        assert_eq!(channel.pull().await, Step::next(1));
        assert_eq!(channel.pull().await, Step::last(2));
        assert!(channel.is_closed());
        assert_eq!(channel.pull().await, Step::done());
    }

    #[tokio::test]
    async fn test_last_push_to_waiter_closes() {
        let channel = Channel::new();
        let first = channel.pull();
        let second = channel.pull();
        channel.push_last("bye");

        assert_eq!(first.await, Step::last("bye"));
        assert_eq!(second.await, Step::done());
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_skipped() {
        let channel = Channel::new();
        let abandoned = channel.pull();
        let live = channel.pull();
        drop(abandoned);

        assert_eq!(channel.push(42).await, PushOutcome::Delivered);
        assert_eq!(live.await, Step::next(42));
    }

    #[tokio::test]
    async fn test_abandoned_waiters_fall_back_to_buffer() {
        let channel = Channel::new();
        drop(channel.pull());

        let delivery = channel.push(5);
        assert!(!delivery.is_settled());
        assert_eq!(channel.buffered(), 1);
        assert_eq!(channel.waiting(), 0);
        assert_eq!(channel.pull().await, Step::next(5));
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest_push() {
        let channel = Channel::with_capacity(2);
        let d1 = channel.push(1);
        let _d2 = channel.push(2);
        let _d3 = channel.push(3);

        assert_eq!(d1.await, PushOutcome::Dropped);
        assert_eq!(channel.pull().await, Step::next(2));
        assert_eq!(channel.pull().await, Step::next(3));
    }

    #[tokio::test]
    async fn test_buffers_never_both_non_empty() {
        let channel = Channel::new();
        for round in 0..10 {
            if round % 3 == 0 {
                let _ = channel.pull();
            } else {
                let _ = channel.push(round);
            }
            assert!(channel.buffered() == 0 || channel.waiting() == 0);
        }
    }

    #[tokio::test]
    async fn test_cross_task_rendezvous() {
        let channel = Channel::new();
        let producer = channel.clone();

        let handle = tokio::spawn(async move {
            for i in 0..5 {
                assert_eq!(producer.push(i).await, PushOutcome::Delivered);
            }
            producer.close();
        });

        let mut received = Vec::new();
        loop {
            let step = channel.pull().await;
            if step.done {
                break;
            }
            received.extend(step.value);
        }
        handle.await.unwrap();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }
}
