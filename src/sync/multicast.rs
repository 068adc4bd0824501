//! One-to-many fan-out over per-receiver channels.
//!
//! # Responsibilities
//! - Deliver each push to every currently subscribed receiver
//! - Drop pushes when nobody is subscribed (no replay for late joiners)
//! - Signal the 0→1 and 1→0 transitions of the receiver count
//!
//! # Design Decisions
//! - Each receiver owns an independent [`Channel`], so a slow receiver only
//!   grows its own buffer and never blocks the others
//! - Callbacks run under the receiver set lock, so transitions reach them in
//!   order; a callback must not subscribe to or close its own multicast

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::streaming::{BoxError, Source};
use crate::sync::{lock, Channel, Pull, Step};

type Transition = Arc<dyn Fn() + Send + Sync>;

struct Shared<T> {
    receivers: Mutex<HashMap<u64, Channel<T>>>,
    next_id: AtomicU64,
    capacity: usize,
    on_active: Option<Transition>,
    on_idle: Option<Transition>,
}

impl<T> Shared<T> {
    fn detach(&self, id: u64) {
        let mut receivers = lock(&self.receivers);
        let Some(channel) = receivers.remove(&id) else {
            return;
        };
        channel.close();

        if receivers.is_empty() {
            tracing::trace!("multicast idle");
            if let Some(on_idle) = &self.on_idle {
                on_idle();
            }
        }
    }
}

/// Builder for [`Multicast`].
pub struct MulticastBuilder {
    capacity: usize,
    on_active: Option<Transition>,
    on_idle: Option<Transition>,
}

impl MulticastBuilder {
    pub fn new() -> Self {
        Self {
            capacity: 0,
            on_active: None,
            on_idle: None,
        }
    }

    /// Per-receiver buffer capacity (0 = unbounded).
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Called when the first receiver subscribes, with the receiver set locked.
    pub fn on_active(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_active = Some(Arc::new(f));
        self
    }

    /// Called when the last receiver leaves, with the receiver set locked.
    pub fn on_idle(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_idle = Some(Arc::new(f));
        self
    }

    pub fn build<T>(self) -> Multicast<T> {
        Multicast {
            shared: Arc::new(Shared {
                receivers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: self.capacity,
                on_active: self.on_active,
                on_idle: self.on_idle,
            }),
        }
    }
}

/// Fans a single push out to every subscribed [`Receiver`].
pub struct Multicast<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Multicast<T> {
    pub fn new() -> Self {
        MulticastBuilder::new().build()
    }

    /// Register a new receiver.
    pub fn subscribe(&self) -> Receiver<T> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let channel = Channel::with_capacity(self.shared.capacity);

        let mut receivers = lock(&self.shared.receivers);
        receivers.insert(id, channel.clone());
        if receivers.len() == 1 {
            tracing::trace!("multicast active");
            if let Some(on_active) = &self.shared.on_active {
                on_active();
            }
        }
        drop(receivers);

        Receiver {
            id,
            channel,
            shared: Arc::clone(&self.shared),
            detached: false,
        }
    }

    pub fn receiver_count(&self) -> usize {
        lock(&self.shared.receivers).len()
    }

    /// End every receiver's stream.
    pub fn close(&self) {
        let ids: Vec<u64> = lock(&self.shared.receivers).keys().copied().collect();
        for id in ids {
            self.shared.detach(id);
        }
    }
}

impl<T: Clone> Multicast<T> {
    /// Deliver `value` to every current receiver. Returns how many received it.
    pub fn push(&self, value: T) -> usize {
        let receivers = lock(&self.shared.receivers);
        for channel in receivers.values() {
            // Delivery is tracked per receiver; the broadcaster never waits.
            let _ = channel.push(value.clone());
        }
        receivers.len()
    }
}

impl Default for MulticastBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Multicast<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Multicast<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A single subscriber of a [`Multicast`]. Leaves the set when dropped.
pub struct Receiver<T> {
    id: u64,
    channel: Channel<T>,
    shared: Arc<Shared<T>>,
    detached: bool,
}

impl<T> Receiver<T> {
    /// Next broadcast value, `None` once the receiver has ended.
    pub async fn recv(&mut self) -> Option<T> {
        let step = self.pull().await;
        if step.done {
            self.detach();
        }
        step.value
    }

    /// Raw pull on the underlying channel.
    pub fn pull(&self) -> Pull<T> {
        self.channel.pull()
    }

    /// Leave the broadcast set.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.detached {
            self.detached = true;
            self.shared.detach(self.id);
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T: Send + 'static> Source for Receiver<T> {
    type Item = T;

    fn next(&mut self) -> BoxFuture<'_, Result<Step<T>, BoxError>> {
        let pull = self.pull();
        Box::pin(async move {
            let step = pull.await;
            if step.done {
                self.detach();
            }
            Ok(step)
        })
    }

    fn cancel(&mut self) {
        self.detach();
    }
}
