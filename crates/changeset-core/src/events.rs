// events.rs — Publish/subscribe channel and the aggregate change event.
//
// An Emitter owns a list of listeners. Subscribing returns a Subscription
// handle; dropping the handle removes the listener. Disposing the emitter
// drops every listener and turns later fires into no-ops.
//
// Delivery is synchronous. The listener list is snapshotted before delivery,
// so listeners attached while an event is in flight do not see that event,
// and listeners may subscribe or fire re-entrantly without deadlocking.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};

use crate::locator::Locator;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    listeners: Vec<(u64, Listener<T>)>,
    next_id: u64,
    disposed: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Type-erased view of a registry, so `Subscription` need not be generic.
trait Detach: Send + Sync {
    fn detach(&self, id: u64);
    fn is_attached(&self, id: u64) -> bool;
}

impl<T: 'static> Detach for Mutex<Registry<T>> {
    fn detach(&self, id: u64) {
        let removed = {
            let mut registry = lock(self);
            let index = registry.listeners.iter().position(|(l, _)| *l == id);
            index.map(|i| registry.listeners.remove(i))
        };
        // Listener is dropped outside the lock.
        drop(removed);
    }

    fn is_attached(&self, id: u64) -> bool {
        lock(self).listeners.iter().any(|(l, _)| *l == id)
    }
}

/// A synchronous event source.
pub struct Emitter<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                listeners: Vec::new(),
                next_id: 0,
                disposed: false,
            })),
        }
    }

    /// Register a listener. The returned handle removes it when dropped.
    ///
    /// Subscribing to a disposed emitter yields an inert subscription.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        if registry.disposed {
            return Subscription::inert();
        }
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(listener)));

        let weak: Weak<dyn Detach> = Arc::downgrade(&self.registry) as Weak<dyn Detach>;
        Subscription {
            registry: Some(weak),
            id,
        }
    }

    /// Deliver `event` to every listener attached at the time of the call.
    pub fn fire(&self, event: &T) {
        deliver(&self.registry, event);
    }

    /// Drop all listeners and stop delivering events.
    pub fn dispose(&self) {
        let dropped = {
            let mut registry = lock(&self.registry);
            registry.disposed = true;
            std::mem::take(&mut registry.listeners)
        };
        drop(dropped);
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.registry).disposed
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }

    /// A non-owning handle that can fire into this emitter while it lives.
    pub fn downgrade(&self) -> WeakEmitter<T> {
        WeakEmitter {
            registry: Arc::downgrade(&self.registry),
        }
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("Emitter")
            .field("listeners", &registry.listeners.len())
            .field("disposed", &registry.disposed)
            .finish()
    }
}

fn deliver<T>(registry: &Mutex<Registry<T>>, event: &T) {
    let snapshot: Vec<Listener<T>> = {
        let registry = lock(registry);
        if registry.disposed {
            return;
        }
        registry.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    };

    for listener in snapshot {
        if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
            tracing::error!("event listener panicked; continuing delivery");
        }
    }
}

/// Non-owning handle to an [`Emitter`].
pub struct WeakEmitter<T> {
    registry: Weak<Mutex<Registry<T>>>,
}

impl<T> WeakEmitter<T> {
    /// Fire into the emitter if it is still alive; otherwise do nothing.
    pub fn fire(&self, event: &T) {
        if let Some(registry) = self.registry.upgrade() {
            deliver(&registry, event);
        }
    }
}

impl<T> Clone for WeakEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Weak::clone(&self.registry),
        }
    }
}

/// Handle to a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    registry: Option<Weak<dyn Detach>>,
    id: u64,
}

impl Subscription {
    fn inert() -> Self {
        Self {
            registry: None,
            id: 0,
        }
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    /// Whether the listener is still registered with a live emitter.
    pub fn is_active(&self) -> bool {
        self.registry
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|registry| registry.is_attached(self.id))
    }

    fn detach(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            registry.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Aggregate notification fired by a [`ChangeSet`](crate::ChangeSet).
///
/// Every firing comes from one logical operation: a batch add/replace
/// (`added` + `modified`), a batch removal (`removed`), or a single element
/// reporting its own change (`state`). Empty fields are omitted from JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetEvent {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<Locator>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<Locator>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modified: Vec<Locator>,

    /// Elements whose own state changed, not their contents.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state: Vec<Locator>,
}

impl ChangeSetEvent {
    pub fn batch(added: Vec<Locator>, modified: Vec<Locator>) -> Self {
        Self {
            added,
            modified,
            ..Default::default()
        }
    }

    pub fn removed(removed: Vec<Locator>) -> Self {
        Self {
            removed,
            ..Default::default()
        }
    }

    pub fn state(locator: Locator) -> Self {
        Self {
            state: vec![locator],
            ..Default::default()
        }
    }

    /// True for the no-op heartbeat fired by an empty `add_elements` call.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.modified.is_empty()
            && self.state.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&u32) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn fire_reaches_every_listener() {
        let emitter = Emitter::<u32>::new();
        let (a, fa) = counter();
        let (b, fb) = counter();
        let _sa = emitter.subscribe(fa);
        let _sb = emitter.subscribe(fb);

        emitter.fire(&1);
        emitter.fire(&2);

        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let emitter = Emitter::<u32>::new();
        let (count, f) = counter();
        let sub = emitter.subscribe(f);
        assert!(sub.is_active());
        assert_eq!(emitter.listener_count(), 1);

        drop(sub);
        emitter.fire(&1);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn disposed_emitter_is_silent() {
        let emitter = Emitter::<u32>::new();
        let (count, f) = counter();
        let sub = emitter.subscribe(f);

        emitter.dispose();
        emitter.fire(&1);

        assert!(emitter.is_disposed());
        assert!(!sub.is_active());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let (late, f) = counter();
        let late_sub = emitter.subscribe(f);
        emitter.fire(&2);
        assert!(!late_sub.is_active());
        assert_eq!(late.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscription_outliving_emitter_is_harmless() {
        let emitter = Emitter::<u32>::new();
        let (_count, f) = counter();
        let sub = emitter.subscribe(f);
        drop(emitter);
        assert!(!sub.is_active());
        sub.unsubscribe();
    }

    #[test]
    fn listener_added_during_delivery_misses_in_flight_event() {
        let emitter = Arc::new(Emitter::<u32>::new());
        let (late, late_fn) = counter();
        let late_fn = Arc::new(late_fn);
        let held: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&emitter);
        let held_in = Arc::clone(&held);
        let _outer = emitter.subscribe(move |_| {
            if let Some(emitter) = weak.upgrade() {
                let f = Arc::clone(&late_fn);
                let sub = emitter.subscribe(move |e| f(e));
                held_in.lock().unwrap().push(sub);
            }
        });

        emitter.fire(&1);
        assert_eq!(late.load(Ordering::SeqCst), 0);

        emitter.fire(&2);
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let emitter = Emitter::<u32>::new();
        let _bad = emitter.subscribe(|_| panic!("listener failure"));
        let (count, f) = counter();
        let _good = emitter.subscribe(f);

        emitter.fire(&1);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn weak_emitter_fires_only_while_alive() {
        let emitter = Emitter::<u32>::new();
        let (count, f) = counter();
        let _sub = emitter.subscribe(f);
        let weak = emitter.downgrade();

        weak.fire(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(emitter);
        weak.fire(&2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_json_omits_empty_fields() {
        let a = Locator::parse("src/a.rs").unwrap();
        let event = ChangeSetEvent::batch(vec![a.clone()], Vec::new());
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"added":["fs://workspace/src/a.rs"]}"#);

        let restored: ChangeSetEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, event);

        assert_eq!(serde_json::to_string(&ChangeSetEvent::default()).unwrap(), "{}");
        assert!(ChangeSetEvent::default().is_empty());
        assert!(!ChangeSetEvent::state(a).is_empty());
    }
}
