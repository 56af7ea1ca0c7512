//! Deduplicating event registry with live subscription fan-out.
//!
//! The store is the only shared mutable state in the pipeline. One
//! `RwLock` guards the seen-key set, the newest-first history and the
//! subscriber table together, so a key is in the set exactly when its
//! event is in the history, and an accepted event reaches precisely the
//! subscribers registered at the moment it was accepted.

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::types::{Event, PoolKey};

/// Per-subscriber buffer size. A subscriber that falls this far behind
/// misses events until it catches up.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the shared registry. Clones refer to the same store.
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<State>,
    subscriber_buffer: usize,
    next_subscriber: AtomicU64,
}

#[derive(Debug, Default)]
struct State {
    keys: HashSet<PoolKey>,
    /// Newest first, by acceptance order.
    events: VecDeque<Event>,
    subscribers: HashMap<u64, mpsc::Sender<Event>>,
}

impl Store {
    pub fn new() -> Self {
        Self::with_subscriber_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Create a store whose subscriptions buffer `capacity` events each.
    /// A zero capacity is raised to one.
    pub fn with_subscriber_buffer(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                subscriber_buffer: capacity.max(1),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// Record `event` unless its identity key has been seen before.
    ///
    /// Returns `true` for a genuinely new event, which is then pushed to
    /// every current subscriber without waiting: a subscriber whose
    /// buffer is full simply misses it. Returns `false` for a duplicate
    /// and changes nothing.
    pub fn add(&self, event: Event) -> bool {
        let key = event.key();
        let mut state = self.write();

        if state.keys.contains(&key) {
            trace!(%key, "Duplicate event ignored");
            return false;
        }

        state.keys.insert(key);
        state.events.push_front(event.clone());

        let mut closed = Vec::new();
        for (id, tx) in &state.subscribers {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(subscriber = id, "Subscriber buffer full, dropping event");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            state.subscribers.remove(&id);
            debug!(subscriber = id, "Pruned closed subscriber");
        }

        true
    }

    /// Up to `limit` most recent events, newest first.
    ///
    /// A `limit` of zero, or one larger than the history, returns
    /// everything. The result is a copy and never changes afterwards.
    pub fn list(&self, limit: usize) -> Vec<Event> {
        let state = self.read();
        let limit = if limit == 0 { state.events.len() } else { limit };
        state.events.iter().take(limit).cloned().collect()
    }

    /// Register for events accepted from now on.
    ///
    /// Events accepted before this call returns are only visible
    /// through [`Store::list`]. The returned [`Unsubscribe`] handle (or
    /// dropping the [`Subscription`]) ends the stream.
    pub fn subscribe(&self) -> (Subscription, Unsubscribe) {
        let (tx, rx) = mpsc::channel(self.inner.subscriber_buffer);
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);

        self.write().subscribers.insert(id, tx);
        debug!(subscriber = id, "Subscriber registered");

        let handle = Unsubscribe {
            store: Arc::downgrade(&self.inner),
            id,
        };
        (
            Subscription {
                rx,
                handle: handle.clone(),
            },
            handle,
        )
    }

    /// Number of distinct events accepted so far.
    pub fn len(&self) -> usize {
        self.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &PoolKey) -> bool {
        self.read().keys.contains(key)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.read().subscribers.len()
    }

    // A panic while holding the lock cannot leave the state half-updated
    // in a way later readers care about, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Live stream of newly accepted events.
///
/// Ends (yields `None`) once unsubscribed and the buffer is drained.
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
    handle: Unsubscribe,
}

impl Subscription {
    /// Next event, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next already-buffered event, without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// The handle that ends this subscription.
    pub fn unsubscribe_handle(&self) -> Unsubscribe {
        self.handle.clone()
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}

/// Ends a subscription. Safe to call any number of times.
#[derive(Debug, Clone)]
pub struct Unsubscribe {
    store: Weak<Inner>,
    id: u64,
}

impl Unsubscribe {
    /// Deregister the subscriber and close its stream.
    ///
    /// Only the first call has an effect; later calls, and calls after
    /// the store itself is gone, do nothing.
    pub fn unsubscribe(&self) {
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let removed = inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .remove(&self.id);
        // Dropping the only sender closes the channel.
        if removed.is_some() {
            debug!(subscriber = self.id, "Subscriber removed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
