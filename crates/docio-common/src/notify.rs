//! Single-shot completion notifications
//!
//! A [`Notification`] is a write-once cell observable by any number of
//! parties. The producer fulfils it exactly once; observers may poll or
//! block. Clones share the same cell.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// A single-assignment, multi-observer notification.
pub struct Notification<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Notification<T> {
    /// Create an unfulfilled notification.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                value: Mutex::new(None),
                ready: Condvar::new(),
            }),
        }
    }

    /// Fulfil the notification. Must be called at most once.
    pub fn set(&self, value: T) {
        let mut slot = self.inner.value.lock();
        assert!(slot.is_none(), "notification fulfilled twice");
        *slot = Some(value);
        self.inner.ready.notify_all();
    }

    /// The fulfilled value, if any.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.inner.value.lock().clone()
    }

    /// True once the notification has been fulfilled.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.value.lock().is_some()
    }

    /// Block until the notification is fulfilled.
    pub fn wait(&self) -> T {
        let mut slot = self.inner.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            self.inner.ready.wait(&mut slot);
        }
    }

    /// Block until fulfilled or the timeout elapses.
    pub fn wait_for(&self, timeout: Duration) -> Option<T> {
        let mut slot = self.inner.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return Some(value.clone());
            }
            if self.inner.ready.wait_for(&mut slot, timeout).timed_out() {
                return slot.clone();
            }
        }
    }

    /// True iff `other` observes the same underlying cell.
    #[must_use]
    pub fn same(&self, other: &Notification<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone> Default for Notification<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Notification<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Notification<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("value", &*self.inner.value.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_then_get() {
        let n = Notification::new();
        assert!(!n.is_set());
        assert_eq!(n.get(), None);
        n.set(7);
        assert!(n.is_set());
        assert_eq!(n.get(), Some(7));
        assert_eq!(n.wait(), 7);
    }

    #[test]
    fn test_clones_share_the_cell() {
        let n = Notification::new();
        let observer = n.clone();
        assert!(n.same(&observer));
        assert!(!n.same(&Notification::new()));
        n.set("done");
        assert_eq!(observer.get(), Some("done"));
    }

    #[test]
    fn test_wait_across_threads() {
        let n = Notification::new();
        let observer = n.clone();
        let waiter = thread::spawn(move || observer.wait());
        n.set(42u32);
        assert_eq!(waiter.join().unwrap(), 42);
    }

    #[test]
    fn test_wait_for_timeout() {
        let n: Notification<u32> = Notification::new();
        assert_eq!(n.wait_for(Duration::from_millis(10)), None);
        n.set(1);
        assert_eq!(n.wait_for(Duration::from_millis(10)), Some(1));
    }

    #[test]
    #[should_panic(expected = "fulfilled twice")]
    fn test_double_set_panics() {
        let n = Notification::new();
        n.set(1);
        n.set(2);
    }
}
