//! Latest-value push/pull slot.
//!
//! Same contract as [`Channel`](crate::sync::Channel), but only the most
//! recent undelivered value is kept: a push that finds the slot occupied
//! replaces it, and the replaced push settles as [`PushOutcome::Dropped`].

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::oneshot;

use crate::streaming::{BoxError, Source};
use crate::sync::{hand_off, lock, Delivery, Pending, Pull, PushOutcome, Queue, Step};

struct Slot<T> {
    pending: Option<Pending<T>>,
    pulls: Queue<oneshot::Sender<Step<T>>>,
    closed: bool,
}

impl<T> Slot<T> {
    fn close(&mut self) {
        self.closed = true;
        if let Some(pending) = self.pending.take() {
            pending.settle(PushOutcome::Closed);
        }
        for waiter in self.pulls.drain() {
            let _ = waiter.send(Step::done());
        }
    }
}

/// Single-slot, latest-value-wins rendezvous.
pub struct Lastcast<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Lastcast<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                pending: None,
                pulls: Queue::new(),
                closed: false,
            })),
        }
    }

    /// Publish `value`, replacing any value nobody has pulled yet.
    pub fn push(&self, value: T) -> Delivery {
        self.offer(Step::next(value))
    }

    /// Publish a final value; the slot closes once it is delivered.
    pub fn push_last(&self, value: T) -> Delivery {
        self.offer(Step::last(value))
    }

    fn offer(&self, step: Step<T>) -> Delivery {
        let mut slot = lock(&self.slot);
        if slot.closed {
            return Delivery::ready(PushOutcome::Closed);
        }

        let done = step.done;
        let step = match hand_off(&mut slot.pulls, step) {
            Ok(()) => {
                if done {
                    slot.close();
                }
                return Delivery::ready(PushOutcome::Delivered);
            }
            Err(step) => step,
        };

        let (ack, rx) = oneshot::channel();
        if let Some(replaced) = slot.pending.replace(Pending { step, ack }) {
            replaced.settle(PushOutcome::Dropped);
        }
        Delivery::waiting(rx)
    }

    /// Take the pending value, or wait for the next push.
    pub fn pull(&self) -> Pull<T> {
        let mut slot = lock(&self.slot);
        if slot.closed {
            return Pull::ready(Step::done());
        }

        if let Some(pending) = slot.pending.take() {
            let step = pending.settle(PushOutcome::Delivered);
            if step.done {
                slot.close();
            }
            return Pull::ready(step);
        }

        let (tx, rx) = oneshot::channel();
        slot.pulls.enqueue(tx);
        Pull::waiting(rx)
    }

    /// Close the slot. Idempotent.
    pub fn close(&self) {
        let mut slot = lock(&self.slot);
        if !slot.closed {
            slot.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.slot).closed
    }

    /// Whether a value is waiting to be pulled.
    pub fn has_pending(&self) -> bool {
        lock(&self.slot).pending.is_some()
    }
}

impl<T> Clone for Lastcast<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for Lastcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Source for Lastcast<T> {
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
    async fn test_second_push_overwrites_first() {
        let lastcast = Lastcast::new();
        let first = lastcast.push("stale");
        let second = lastcast.push("fresh");

        assert_eq!(first.await, PushOutcome::Dropped);
        assert_eq!(lastcast.pull().await, Step::next("fresh"));
        assert_eq!(second.await, PushOutcome::Delivered);
        assert!(!lastcast.has_pending());
    }

    #[tokio::test]
    async fn test_waiting_pull_gets_value_directly() {
        let lastcast = Lastcast::new();
        let pull = lastcast.pull();

        assert_eq!(lastcast.push(3).await, PushOutcome::Delivered);
        assert_eq!(pull.await, Step::next(3));
    }

    #[tokio::test]
    async fn test_close_settles_pending_and_waiters() {
        let lastcast: Lastcast<u8> = Lastcast::new();
        let waiter = lastcast.pull();
        lastcast.close();
        assert_eq!(waiter.await, Step::done());

        let other = Lastcast::new();
        let delivery = other.push(1);
        other.close();
        other.close();
        assert_eq!(delivery.await, PushOutcome::Closed);
        assert_eq!(other.pull().await, Step::done());
        assert_eq!(other.push(2).await, PushOutcome::Closed);
    }

    #[tokio::test]
    async fn test_last_push_closes() {
        let lastcast = Lastcast::new();
        lastcast.push_last("final");
        assert_eq!(lastcast.pull().await, Step::last("final"));
        assert!(lastcast.is_closed());
    }
}
