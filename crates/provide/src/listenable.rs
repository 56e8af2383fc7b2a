#![forbid(unsafe_code)]

//! Payload-free change notification.
//!
//! [`Listenable`] is the capability every change source implements: register
//! a callback, get a [`ListenerId`] back, remove it later. [`Subscription`]
//! wraps that pair in an RAII guard.
//!
//! # Invariants
//!
//! 1. Listeners are notified in registration order.
//! 2. A listener added or removed during a notification takes effect on the
//!    next notification, never the current one.
//! 3. Dropping a [`Subscription`] removes its listener before the next
//!    notification cycle. If the source is already gone, the drop is a no-op.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Callback invoked when a source changes.
pub type Listener = Rc<dyn Fn()>;

/// A shared, type-erased change source.
pub type ChangeSource = Rc<dyn Listenable>;

/// Handle identifying one registration on one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Something that can tell listeners it changed.
pub trait Listenable {
    fn add_listener(&self, listener: Listener) -> ListenerId;

    /// Returns `false` if `id` was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// Values that expose a change source of their own.
///
/// Provider constructors bound on this trait are how a published value is
/// declared observable at registration time.
pub trait AsListenable {
    fn as_listenable(&self) -> ChangeSource;
}

impl<L: Listenable + 'static> AsListenable for Rc<L> {
    fn as_listenable(&self) -> ChangeSource {
        Rc::clone(self) as ChangeSource
    }
}

// ---------------------------------------------------------------------------
// ListenerSet
// ---------------------------------------------------------------------------

/// Ordered listener storage shared by every concrete source in this crate.
#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: Cell<u64>,
    entries: RefCell<Vec<(ListenerId, Listener)>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.entries.borrow_mut().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        // The listener is dropped after the borrow ends; it may own a
        // subscription on this same set.
        let removed = {
            let mut entries = self.entries.borrow_mut();
            entries
                .iter()
                .position(|(entry_id, _)| *entry_id == id)
                .map(|index| entries.remove(index))
        };
        removed.is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub(crate) fn clear(&self) {
        let drained = std::mem::take(&mut *self.entries.borrow_mut());
        drop(drained);
    }

    /// Call every listener registered at the time of the call.
    pub(crate) fn notify(&self) {
        let snapshot: Vec<Listener> = self
            .entries
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in snapshot {
            listener();
        }
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ChangeNotifier
// ---------------------------------------------------------------------------

/// The simplest [`Listenable`]: notifies on demand.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    listeners: ListenerSet,
}

impl ChangeNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_listeners(&self) {
        self.listeners.notify();
    }

    #[must_use]
    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Listenable for ChangeNotifier {
    fn add_listener(&self, listener: Listener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// RAII guard that removes its listener from the source on drop.
///
/// Holds the source weakly, so a subscription never keeps a source alive.
#[must_use = "dropping a Subscription removes the listener immediately"]
pub struct Subscription {
    source: Weak<dyn Listenable>,
    id: ListenerId,
}

impl Subscription {
    pub fn new(source: &ChangeSource, listener: Listener) -> Self {
        let id = source.add_listener(listener);
        Self {
            source: Rc::downgrade(source),
            id,
        }
    }

    pub fn from_fn(source: &ChangeSource, f: impl Fn() + 'static) -> Self {
        Self::new(source, Rc::new(f))
    }

    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whether the source is still alive.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.source.strong_count() > 0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(source) = self.source.upgrade() {
            source.remove_listener(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}
