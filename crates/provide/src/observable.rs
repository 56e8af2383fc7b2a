#![forbid(unsafe_code)]

//! Versioned, equality-gated value cells.
//!
//! # Design
//!
//! [`Observable<T>`] wraps a value in shared, reference-counted storage.
//! Cloning an `Observable` creates a new handle to the **same** value.
//! Writes that do not change the value are dropped before they reach
//! listeners, which is what most published models want.
//!
//! # Invariants
//!
//! 1. `version` increments exactly once per write that changes the value.
//! 2. Writing a value equal to the current one is a no-op (no version bump,
//!    no notification).
//! 3. Listeners run after the write is visible: a listener calling
//!    [`get()`](Observable::get) sees the new value.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::listenable::{AsListenable, ChangeSource, Listenable, Listener, ListenerId, ListenerSet};

struct ObservableInner<T> {
    value: RefCell<T>,
    version: Cell<u64>,
    listeners: ListenerSet,
}

impl<T> Listenable for ObservableInner<T> {
    fn add_listener(&self, listener: Listener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

/// A shared value that notifies listeners when it changes.
pub struct Observable<T> {
    inner: Rc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(ObservableInner {
                value: RefCell::new(value),
                version: Cell::new(0),
                listeners: ListenerSet::default(),
            }),
        }
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Access the value by reference without cloning.
    ///
    /// # Panics
    ///
    /// Panics if the closure writes to the same `Observable`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Replace the value. Returns whether it changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return false;
            }
            *current = value;
        }
        self.bump();
        true
    }

    /// Mutate the value in place. Listeners run only if the result differs
    /// from the value before the call.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let changed = {
            let mut current = self.inner.value.borrow_mut();
            let before = current.clone();
            f(&mut current);
            *current != before
        };
        if changed {
            self.bump();
        }
        changed
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Whether two handles share the same value.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn bump(&self) {
        self.inner.version.set(self.inner.version.get() + 1);
        self.inner.listeners.notify();
    }
}

impl<T: 'static> Listenable for Observable<T> {
    fn add_listener(&self, listener: Listener) -> ListenerId {
        self.inner.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

impl<T: 'static> AsListenable for Observable<T> {
    fn as_listenable(&self) -> ChangeSource {
        Rc::clone(&self.inner) as ChangeSource
    }
}
