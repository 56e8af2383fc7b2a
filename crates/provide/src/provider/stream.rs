#![forbid(unsafe_code)]

//! Stream-backed provider state.
//!
//! The upstream is consumed by one pump task spawned at construction. Every
//! element that differs from the cached one replaces the cache, is fanned
//! out to each downstream receiver, and then fires the change notifier. This
//! turns a single-consumer upstream into a broadcast.

use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::future::{self, AbortHandle};
use futures::stream::Stream;
use futures::task::{LocalSpawn, LocalSpawnExt, SpawnError};
use futures::{FutureExt, StreamExt};
use tracing::{debug, trace};

use crate::listenable::{ChangeNotifier, ChangeSource, Subscription};

struct Broadcast<T> {
    cached: RefCell<T>,
    notifier: Rc<ChangeNotifier>,
    receivers: RefCell<Vec<UnboundedSender<T>>>,
    /// Set once the upstream ended or the pump was cancelled.
    closed: Cell<bool>,
}

impl<T> Broadcast<T> {
    /// End every downstream receiver. Later subscribers get a closed one.
    fn close(&self) {
        self.closed.set(true);
        let receivers = std::mem::take(&mut *self.receivers.borrow_mut());
        drop(receivers);
    }
}

impl<T: Clone + PartialEq> Broadcast<T> {
    fn accept(&self, item: T) {
        if *self.cached.borrow() == item {
            trace!("duplicate stream element suppressed");
            return;
        }
        self.cached.replace(item.clone());
        {
            let mut receivers = self.receivers.borrow_mut();
            let before = receivers.len();
            receivers.retain(|tx| tx.unbounded_send(item.clone()).is_ok());
            if receivers.len() < before {
                debug!(closed = before - receivers.len(), "stream receivers dropped");
            }
        }
        self.notifier.notify_listeners();
    }
}

pub(super) struct StreamState<T> {
    shared: Rc<Broadcast<T>>,
    pump: RefCell<Option<AbortHandle>>,
}

impl<T: Clone + PartialEq + 'static> StreamState<T> {
    pub(super) fn start<S, Sp>(upstream: S, initial: T, spawner: &Sp) -> Result<Self, SpawnError>
    where
        S: Stream<Item = T> + 'static,
        Sp: LocalSpawn + ?Sized,
    {
        let shared = Rc::new(Broadcast {
            cached: RefCell::new(initial),
            notifier: Rc::new(ChangeNotifier::new()),
            receivers: RefCell::new(Vec::new()),
            closed: Cell::new(false),
        });

        let weak = Rc::downgrade(&shared);
        let on_end = Rc::downgrade(&shared);
        let pump = upstream.for_each(move |item| {
            if let Some(shared) = weak.upgrade() {
                shared.accept(item);
            }
            future::ready(())
        });
        let (pump, handle) = future::abortable(pump);
        spawner.spawn_local(pump.map(move |outcome| match outcome {
            Ok(()) => {
                debug!("stream upstream completed");
                if let Some(shared) = on_end.upgrade() {
                    shared.close();
                }
            }
            Err(_) => debug!("stream pump cancelled"),
        }))?;
        debug!("stream pump started");

        Ok(Self {
            shared,
            pump: RefCell::new(Some(handle)),
        })
    }
}

impl<T: Clone> StreamState<T> {
    pub(super) fn current(&self) -> T {
        self.shared.cached.borrow().clone()
    }

    pub(super) fn notifier(&self) -> ChangeSource {
        Rc::clone(&self.shared.notifier) as ChangeSource
    }

    /// A fresh receiver of every future distinct element.
    ///
    /// Once the upstream has ended or the pump was cancelled the receiver
    /// is already closed.
    pub(super) fn subscribe(&self) -> UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded();
        if self.shared.closed.get() {
            drop(tx);
        } else {
            self.shared.receivers.borrow_mut().push(tx);
        }
        rx
    }
}

impl<T> StreamState<T> {
    /// Stop the pump and close every downstream receiver. Safe to repeat.
    pub(super) fn cancel(&self) {
        if let Some(handle) = self.pump.borrow_mut().take() {
            handle.abort();
        }
        self.shared.close();
    }
}

impl<T> Drop for StreamState<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.get_mut().take() {
            handle.abort();
        }
    }
}

/// Values of an observable value or lazy provider, one per notification.
///
/// Owns the subscription that feeds it; dropping the stream unsubscribes.
pub(super) struct NotifiedValues<T> {
    rx: UnboundedReceiver<T>,
    _subscription: Subscription,
}

impl<T> NotifiedValues<T> {
    pub(super) fn new(rx: UnboundedReceiver<T>, subscription: Subscription) -> Self {
        Self {
            rx,
            _subscription: subscription,
        }
    }
}

impl<T> Stream for NotifiedValues<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_next_unpin(cx)
    }
}
