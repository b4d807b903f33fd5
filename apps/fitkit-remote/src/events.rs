//! Typed publish/subscribe channels.
//!
//! Delivery is synchronous: `emit` calls every live listener, in subscription
//! order, on the emitting thread before it returns. Listeners may subscribe,
//! unsubscribe or emit again from inside a callback; the listener list is
//! snapshotted before dispatch so no lock is held while user code runs.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    id: u64,
    active: Arc<AtomicBool>,
    listener: Listener<T>,
}

struct Listeners<T> {
    next_id: u64,
    entries: Vec<Entry<T>>,
}

pub struct EventChannel<T> {
    inner: Arc<Mutex<Listeners<T>>>,
}

impl<T: 'static> EventChannel<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let id = {
            let mut guard = self.inner.lock();
            let id = guard.next_id;
            guard.next_id += 1;
            guard.entries.push(Entry {
                id,
                active: active.clone(),
                listener: Arc::new(listener),
            });
            id
        };

        let weak: Weak<Mutex<Listeners<T>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            active.store(false, Ordering::Release);
            if let Some(inner) = weak.upgrade() {
                inner.lock().entries.retain(|entry| entry.id != id);
            }
        })
    }

    pub fn emit(&self, value: &T) {
        let snapshot: Vec<(Arc<AtomicBool>, Listener<T>)> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|entry| (entry.active.clone(), entry.listener.clone()))
            .collect();

        for (active, listener) in snapshot {
            // a listener released earlier in this same dispatch must not run
            if active.load(Ordering::Acquire) {
                listener(value);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

impl<T: 'static> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one listener registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn dispose(mut self) {
        self.release_now();
    }

    /// Keeps the listener registered for as long as the channel lives.
    pub fn detach(mut self) {
        self.release = None;
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

/// Subscriptions owned by one component and released together, once.
pub struct Disposables {
    items: Mutex<Option<Vec<Subscription>>>,
    released: AtomicBool,
}

impl Disposables {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Some(Vec::new())),
            released: AtomicBool::new(false),
        }
    }

    /// Adds a subscription. After `dispose_all` it is released on the spot.
    pub fn push(&self, subscription: Subscription) {
        let mut guard = self.items.lock();
        match guard.as_mut() {
            Some(items) if !self.released.load(Ordering::Acquire) => items.push(subscription),
            _ => {
                drop(guard);
                subscription.dispose();
            }
        }
    }

    /// Releases everything. Returns `false` if this already happened.
    pub fn dispose_all(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let items = self.items.lock().take().unwrap_or_default();
        for subscription in items {
            subscription.dispose();
        }
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Default for Disposables {
    fn default() -> Self {
        Self::new()
    }
}
