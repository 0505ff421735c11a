//! Pub/Sub event bus owned by the selection registry.
//!
//! Architecture:
//! - Listeners subscribe to event types with callbacks (immediate invocation)
//! - emit() invokes callbacks, and queues the event when the bus was built
//!   with `with_queue_limit`
//! - poll() returns queued events for batch processing on the UI thread
//!
//! Callback order: FIFO (first-subscribed, first-called) within same event type.
//! Callbacks run after the subscriber lock is released, so a callback may
//! subscribe or unsubscribe without deadlocking.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{trace, warn};

/// Default number of queued events before the oldest are evicted
pub const DEFAULT_QUEUE_LIMIT: usize = 1000;

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Type-erased callback
type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Boxed event for queue storage
pub type BoxedEvent = Box<dyn Event>;

/// Handle returned by `subscribe`, used to revoke the subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
}

type Subscribers = Arc<RwLock<HashMap<TypeId, Vec<Subscriber>>>>;

/// Subscriber list plus optional deferred queue.
#[derive(Clone)]
pub struct EventBus {
    emitter: EventEmitter,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_types", &self.emitter.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.queue_len())
            .field("queue_limit", &self.emitter.queue_limit)
            .finish()
    }
}

impl EventBus {
    /// Bus with immediate dispatch only. Nothing is queued for `poll()`.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Bus that also queues every event for `poll()`, holding at most `limit`
    /// events (minimum 2) before the oldest half is evicted.
    pub fn with_queue_limit(limit: usize) -> Self {
        Self::build(Some(limit.max(2)))
    }

    fn build(queue_limit: Option<usize>) -> Self {
        Self {
            emitter: EventEmitter {
                subscribers: Arc::new(RwLock::new(HashMap::new())),
                queue: Arc::new(Mutex::new(Vec::new())),
                queue_limit,
            },
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    // ========== Pub/Sub (immediate) ==========

    /// Subscribe to events of type E.
    ///
    /// # Example
    /// ```ignore
    /// let hits = Arc::new(AtomicUsize::new(0));
    /// let h = Arc::clone(&hits);
    /// let id = bus.subscribe::<SelectionChangedEvent, _>(move |_| {
    ///     h.fetch_add(1, Ordering::SeqCst);
    /// });
    /// bus.unsubscribe(id);
    /// ```
    pub fn subscribe<E, F>(&self, callback: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.emitter
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Subscriber { id, callback: wrapped });
        trace!("subscribed {:?} to {}", id, std::any::type_name::<E>());
        id
    }

    /// Revoke one subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.emitter.subscribers.write().unwrap_or_else(|e| e.into_inner());
        for list in subs.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos);
                trace!("unsubscribed {:?}", id);
                return true;
            }
        }
        false
    }

    /// Emit event: invoke callbacks immediately and queue it if queueing is on.
    pub fn emit<E: Event + Clone>(&self, event: E) {
        self.emitter.emit(event);
    }

    /// Emit boxed event (for dynamic dispatch).
    pub fn emit_boxed(&self, event: BoxedEvent) {
        self.emitter.emit_boxed(event);
    }

    /// Get an emitter handle for passing to components that only publish.
    pub fn emitter(&self) -> EventEmitter {
        self.emitter.clone()
    }

    // ========== Deferred Processing ==========

    /// Take all events emitted since the last poll.
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.emitter.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    // ========== Utilities ==========

    /// Clear subscribers for type E
    pub fn unsubscribe_all<E: Event>(&self) {
        self.emitter.subscribers.write().unwrap_or_else(|e| e.into_inner()).remove(&TypeId::of::<E>());
    }

    /// Clear all subscribers and queue
    pub fn clear(&self) {
        self.emitter.subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.emitter.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.emitter
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .is_some_and(|v| !v.is_empty())
    }

    pub fn queue_len(&self) -> usize {
        self.emitter.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_queueing(&self) -> bool {
        self.emitter.queue_limit.is_some()
    }
}

/// Publish-only handle onto an `EventBus`.
///
/// Cheap to clone; shares subscribers and queue with the bus it came from.
#[derive(Clone)]
pub struct EventEmitter {
    subscribers: Subscribers,
    queue: Arc<Mutex<Vec<BoxedEvent>>>,
    queue_limit: Option<usize>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscriber_types", &self.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.queue.lock().map(|q| q.len()).unwrap_or(0))
            .finish()
    }
}

impl EventEmitter {
    pub fn emit<E: Event + Clone>(&self, event: E) {
        self.dispatch(TypeId::of::<E>(), &event);
        if self.queue_limit.is_some() {
            self.enqueue(Box::new(event));
        }
    }

    pub fn emit_boxed(&self, event: BoxedEvent) {
        // Go through the dyn Event vtable, not Box<dyn Event>'s blanket impl
        self.dispatch((*event).as_any().type_id(), (*event).as_any());
        self.enqueue(event);
    }

    fn dispatch(&self, type_id: TypeId, event: &dyn Any) {
        let callbacks: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&type_id)
            .cloned()
            .unwrap_or_default();
        for sub in callbacks {
            (sub.callback)(event);
        }
    }

    fn enqueue(&self, event: BoxedEvent) {
        let Some(limit) = self.queue_limit else {
            return;
        };
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= limit {
            let evict_count = queue.len() / 2;
            warn!("EventBus queue full ({} events), evicting oldest {}", queue.len(), evict_count);
            queue.drain(0..evict_count);
        }
        queue.push(event);
    }
}

/// Downcast a queued event to its concrete type.
///
/// Derefs to `dyn Event` first: calling `as_any()` on the box itself would hit
/// the blanket impl for `Box<dyn Event>` and the downcast would always fail.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
