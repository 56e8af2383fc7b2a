#![forbid(unsafe_code)]

//! One change source over many.
//!
//! [`ListenableMerge`] re-raises a payload-free notification whenever any of
//! its children fires. It only holds subscriptions on its children while it
//! has observers of its own, so an unobserved merge never keeps listeners
//! registered on long-lived sources.
//!
//! # Invariants
//!
//! 1. With zero observers the merge is subscribed to no child.
//! 2. With one or more observers it is subscribed exactly once to every
//!    non-`None` child.
//! 3. Attach happens on the 0 → 1 observer transition and detach on the
//!    1 → 0 transition, never otherwise.
//! 4. The notification carries no identity: observers re-read whatever they
//!    depend on.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::listenable::{ChangeSource, Listenable, Listener, ListenerId, ListenerSet, Subscription};

struct MergeInner {
    children: Vec<Option<ChangeSource>>,
    /// Non-empty exactly while attached.
    relays: RefCell<Vec<Subscription>>,
    attached: Cell<bool>,
    observers: ListenerSet,
}

/// Aggregates several change sources into one.
pub struct ListenableMerge {
    inner: Rc<MergeInner>,
}

impl ListenableMerge {
    #[must_use]
    pub fn new(children: impl IntoIterator<Item = Option<ChangeSource>>) -> Self {
        Self {
            inner: Rc::new(MergeInner {
                children: children.into_iter().collect(),
                relays: RefCell::new(Vec::new()),
                attached: Cell::new(false),
                observers: ListenerSet::default(),
            }),
        }
    }

    /// Number of child slots, including `None` entries.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner.children.len()
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.attached.get()
    }

    /// Detach from every child and drop every observer. Idempotent.
    pub fn teardown(&self) {
        self.detach();
        self.inner.observers.clear();
    }

    fn attach(&self) {
        if self.inner.attached.replace(true) {
            return;
        }
        let weak: Weak<MergeInner> = Rc::downgrade(&self.inner);
        let relay: Listener = Rc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.notify();
            }
        });
        let relays: Vec<Subscription> = self
            .inner
            .children
            .iter()
            .flatten()
            .map(|child| Subscription::new(child, Rc::clone(&relay)))
            .collect();
        debug!(children = relays.len(), "merge attached");
        *self.inner.relays.borrow_mut() = relays;
    }

    fn detach(&self) {
        if !self.inner.attached.replace(false) {
            return;
        }
        let relays = std::mem::take(&mut *self.inner.relays.borrow_mut());
        debug!(children = relays.len(), "merge detached");
        drop(relays);
    }
}

impl Listenable for ListenableMerge {
    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = self.inner.observers.add(listener);
        if self.inner.observers.len() == 1 {
            self.attach();
        }
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = self.inner.observers.remove(id);
        if removed && self.inner.observers.is_empty() {
            self.detach();
        }
        removed
    }
}

impl Drop for ListenableMerge {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for ListenableMerge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenableMerge")
            .field("children", &self.child_count())
            .field("observers", &self.observer_count())
            .field("attached", &self.is_attached())
            .finish()
    }
}
