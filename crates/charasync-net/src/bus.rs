//! Typed event bus.
//!
//! An explicit instance passed to constructors, never a global. Each event
//! type gets its own subscriber list; publishing delivers to every
//! subscriber registered for that type, in subscription order, exactly
//! once per event. Delivery across different event types carries no
//! ordering guarantee.
//!
//! Handlers run inline on the publisher's task and must not block; long
//! work belongs on a queue owned by the subscriber. Dropping the returned
//! [`Subscription`] unsubscribes, so teardown cannot leak handlers.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::trace;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Channel<E> {
    subscribers: RwLock<Vec<(u64, Handler<E>)>>,
    next_id: AtomicU64,
}

impl<E> Channel<E> {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

/// Typed publish/subscribe hub for in-process events.
#[derive(Default)]
pub struct EventBus {
    channels: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a handler for events of type `E`.
    ///
    /// The handler stays registered until the returned guard is dropped.
    pub fn subscribe<E: Send + Sync + 'static>(
        self: &Arc<Self>,
        handler: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription {
        let channel = self.channel::<E>();
        let id = channel.next_id.fetch_add(1, Ordering::Relaxed);
        channel
            .subscribers
            .write()
            .expect("bus lock poisoned")
            .push((id, Arc::new(handler)));

        let unsubscribe: Box<dyn FnOnce() + Send> = Box::new(move || {
            channel
                .subscribers
                .write()
                .expect("bus lock poisoned")
                .retain(|(sub_id, _)| *sub_id != id);
        });

        Subscription {
            unsubscribe: Some(unsubscribe),
        }
    }

    /// Deliver an event to all current subscribers for its type.
    ///
    /// The subscriber list is snapshotted before delivery so handlers may
    /// subscribe or unsubscribe without deadlocking; such changes take
    /// effect for the next publish.
    pub fn publish<E: Send + Sync + 'static>(self: &Arc<Self>, event: &E) {
        let channel = self.channel::<E>();
        let snapshot: Vec<Handler<E>> = channel
            .subscribers
            .read()
            .expect("bus lock poisoned")
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        trace!(
            event = std::any::type_name::<E>(),
            subscribers = snapshot.len(),
            "Publishing event"
        );

        for handler in snapshot {
            handler(event);
        }
    }

    fn channel<E: Send + Sync + 'static>(self: &Arc<Self>) -> Arc<Channel<E>> {
        let key = TypeId::of::<E>();

        if let Some(existing) = self
            .channels
            .read()
            .expect("bus lock poisoned")
            .get(&key)
            .and_then(|any| any.downcast_ref::<Arc<Channel<E>>>())
        {
            return Arc::clone(existing);
        }

        let mut channels = self.channels.write().expect("bus lock poisoned");
        // Re-check under the write lock; another thread may have created it.
        if let Some(existing) = channels.get(&key).and_then(|any| any.downcast_ref::<Arc<Channel<E>>>()) {
            return Arc::clone(existing);
        }
        let channel = Arc::new(Channel::<E>::new());
        channels.insert(key, Box::new(Arc::clone(&channel)));
        channel
    }
}

/// Guard for an active subscription. Dropping it unsubscribes.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Subscription")
    }
}
