// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Callback list with explicit unsubscribe handles.
//!
//! Callbacks run synchronously on the publishing task, outside the list
//! lock, so a callback may subscribe or unsubscribe without deadlocking.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Inner<E> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<E>)>>,
}

/// Publish/subscribe list of callbacks.
pub struct Subscribers<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Subscribers<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register `callback`. It stays registered until the returned
    /// handle's [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, callback: F) -> Subscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.callbacks.lock().push((id, Arc::new(callback)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every current subscriber, in registration order.
    pub fn publish(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self.inner.callbacks.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(event);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.callbacks.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`Subscribers::subscribe`].
///
/// Dropping the handle does not unsubscribe.
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct Subscription<E> {
    id: u64,
    inner: Weak<Inner<E>>,
}

impl<E> Subscription<E> {
    /// Remove the callback. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let mut callbacks = inner.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(id, _)| *id != self.id);
        callbacks.len() != before
    }
}

impl<E> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_independent_subscribers() {
        let subs: Subscribers<u32> = Subscribers::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let a2 = a.clone();
        let sub_a = subs.subscribe(move |v| {
            a2.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let b2 = b.clone();
        let _sub_b = subs.subscribe(move |v| {
            b2.fetch_add(*v as usize, Ordering::SeqCst);
        });

        subs.publish(&2);
        assert!(sub_a.unsubscribe());
        subs.publish(&5);

        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 7);
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn test_callback_can_subscribe_reentrantly() {
        let subs: Arc<Subscribers<()>> = Arc::new(Subscribers::new());
        let inner = subs.clone();
        let _sub = subs.subscribe(move |_| {
            let _ = inner.subscribe(|_| {});
        });

        subs.publish(&());
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn test_unsubscribe_after_list_dropped() {
        let subs: Subscribers<()> = Subscribers::new();
        let sub = subs.subscribe(|_| {});
        drop(subs);
        assert!(!sub.unsubscribe());
    }
}
