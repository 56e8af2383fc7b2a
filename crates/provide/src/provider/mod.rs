#![forbid(unsafe_code)]

//! Typed value producers.
//!
//! A [`Provider<T>`] produces values of exactly one type using one of four
//! strategies:
//!
//! | Strategy  | `get`                        | change source                     |
//! |-----------|------------------------------|-----------------------------------|
//! | value     | clone of the held value      | only if built observable          |
//! | lazy      | initializer once, then cache | only if built observable          |
//! | factory   | constructor on every call    | never                             |
//! | stream    | latest distinct element      | always                            |
//!
//! Observability is decided at construction: the `listenable_*`
//! constructors require `T: AsListenable` and record how to reach the
//! value's change source.
//!
//! Cloning a `Provider` creates a new handle to the **same** producer.
//! [`AnyProvider`] erases `T` so providers of different types can share a
//! registry.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::channel::mpsc;
use futures::future::LocalBoxFuture;
use futures::stream::{LocalBoxStream, Stream};
use futures::task::LocalSpawn;
use futures::{FutureExt, StreamExt};

use crate::context::ProvideContext;
use crate::error::{BoxError, ProvideError, Result};
use crate::listenable::{AsListenable, ChangeNotifier, ChangeSource, Subscription};
use crate::type_key::TypeKey;

mod stream;

use stream::{NotifiedValues, StreamState};

/// How a provider produces its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Value,
    Lazy,
    Factory,
    Stream,
}

impl Strategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Lazy => "lazy",
            Self::Factory => "factory",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Bridge<T> = fn(&T) -> ChangeSource;
type Produce<T> = Box<dyn Fn(&ProvideContext<'_>) -> T>;
type DisposeHook =
    Box<dyn FnOnce() -> LocalBoxFuture<'static, std::result::Result<(), BoxError>>>;

fn bridge_of<T: AsListenable>(value: &T) -> ChangeSource {
    value.as_listenable()
}

enum Source<T> {
    Value { value: T, bridge: Option<Bridge<T>> },
    Lazy(LazyState<T>),
    Factory(Produce<T>),
    Stream(StreamState<T>),
}

struct LazyState<T> {
    init: Produce<T>,
    cached: RefCell<Option<T>>,
    bridge: Option<Bridge<T>>,
    /// Re-raises the cached value's notifications. Present iff `bridge` is.
    forward: Option<Rc<ChangeNotifier>>,
    forwarding: RefCell<Option<Subscription>>,
}

impl<T: Clone + 'static> LazyState<T> {
    fn new(init: Produce<T>, bridge: Option<Bridge<T>>) -> Self {
        Self {
            init,
            cached: RefCell::new(None),
            bridge,
            forward: bridge.map(|_| Rc::new(ChangeNotifier::new())),
            forwarding: RefCell::new(None),
        }
    }

    /// Once disposed, values are produced without being cached or
    /// forwarded so that nothing outlives the dispose call.
    fn get(&self, cx: &ProvideContext<'_>, disposed: bool) -> T {
        if let Some(value) = self.cached.borrow().as_ref() {
            return value.clone();
        }
        let value = (self.init)(cx);
        if disposed {
            return value;
        }
        if let (Some(bridge), Some(forward)) = (self.bridge, &self.forward) {
            let forward = Rc::clone(forward);
            let subscription =
                Subscription::from_fn(&bridge(&value), move || forward.notify_listeners());
            self.forwarding.replace(Some(subscription));
        }
        self.cached.replace(Some(value.clone()));
        value
    }

    fn reset(&self) {
        let forwarding = self.forwarding.take();
        drop(forwarding);
        let cached = self.cached.take();
        drop(cached);
    }
}

struct ProviderInner<T> {
    source: Source<T>,
    disposed: Cell<bool>,
    on_dispose: RefCell<Option<DisposeHook>>,
}

impl<T: Clone> ProviderInner<T> {
    /// The value a notification refers to, without running any initializer.
    fn current(&self) -> Option<T> {
        match &self.source {
            Source::Value { value, .. } => Some(value.clone()),
            Source::Lazy(state) => state.cached.borrow().clone(),
            Source::Factory(_) => None,
            Source::Stream(state) => Some(state.current()),
        }
    }
}

/// A typed, strategy-specific value producer.
pub struct Provider<T> {
    inner: Rc<ProviderInner<T>>,
}

impl<T> Clone for Provider<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Provider<T> {
    fn from_source(source: Source<T>) -> Self {
        Self {
            inner: Rc::new(ProviderInner {
                source,
                disposed: Cell::new(false),
                on_dispose: RefCell::new(None),
            }),
        }
    }

    /// Publish a single value.
    #[must_use]
    pub fn value(value: T) -> Self {
        Self::from_source(Source::Value {
            value,
            bridge: None,
        })
    }

    /// Publish the value produced by `init` on the first `get`.
    #[must_use]
    pub fn lazy(init: impl Fn(&ProvideContext<'_>) -> T + 'static) -> Self {
        Self::from_source(Source::Lazy(LazyState::new(Box::new(init), None)))
    }

    /// Publish a fresh value from `make` on every `get`.
    #[must_use]
    pub fn factory(make: impl Fn(&ProvideContext<'_>) -> T + 'static) -> Self {
        Self::from_source(Source::Factory(Box::new(make)))
    }

    /// Attach a teardown for the produced resource.
    ///
    /// The hook runs once, on the first [`dispose`](Self::dispose).
    #[must_use]
    pub fn on_dispose<F, Fut>(self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + 'static,
    {
        let boxed: DisposeHook = Box::new(move || hook().boxed_local());
        self.inner.on_dispose.replace(Some(boxed));
        self
    }

    #[must_use]
    pub fn declared_type(&self) -> TypeKey {
        TypeKey::of::<T>()
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        match &self.inner.source {
            Source::Value { .. } => Strategy::Value,
            Source::Lazy(_) => Strategy::Lazy,
            Source::Factory(_) => Strategy::Factory,
            Source::Stream(_) => Strategy::Stream,
        }
    }

    /// Whether [`listenable`](Self::listenable) succeeds.
    #[must_use]
    pub fn is_observable(&self) -> bool {
        match &self.inner.source {
            Source::Value { bridge, .. } => bridge.is_some(),
            Source::Lazy(state) => state.forward.is_some(),
            Source::Factory(_) => false,
            Source::Stream(_) => true,
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Whether two handles refer to the same producer.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Produce a value.
    ///
    /// Lazy providers run their initializer on the first call and factories
    /// on every call, so call this once per build rather than in a loop. A
    /// disposed lazy provider runs its initializer on every call and keeps
    /// nothing.
    pub fn get(&self, cx: &ProvideContext<'_>) -> T {
        match &self.inner.source {
            Source::Value { value, .. } => value.clone(),
            Source::Lazy(state) => state.get(cx, self.is_disposed()),
            Source::Factory(make) => make(cx),
            Source::Stream(state) => state.current(),
        }
    }

    /// Payload-free change notifications for this provider.
    ///
    /// Fails with [`ProvideError::UnsupportedOperation`] for factories and
    /// for value or lazy providers whose value was not declared observable.
    pub fn listenable(&self) -> Result<ChangeSource> {
        match &self.inner.source {
            Source::Value {
                value,
                bridge: Some(bridge),
            } => Ok(bridge(value)),
            Source::Lazy(LazyState {
                forward: Some(forward),
                ..
            }) => Ok(Rc::clone(forward) as ChangeSource),
            Source::Stream(state) => Ok(state.notifier()),
            _ => Err(ProvideError::UnsupportedOperation {
                ty: self.declared_type(),
                strategy: self.strategy(),
            }),
        }
    }

    /// A stream of this provider's values, one item per change.
    ///
    /// Every call returns an independent stream; for stream providers each
    /// caller receives every distinct upstream element from now on.
    pub fn stream(&self) -> Result<LocalBoxStream<'static, T>> {
        if let Source::Stream(state) = &self.inner.source {
            return Ok(state.subscribe().boxed_local());
        }
        let source = self.listenable()?;
        let (tx, rx) = mpsc::unbounded();
        let weak = Rc::downgrade(&self.inner);
        let subscription = Subscription::from_fn(&source, move || {
            if let Some(value) = weak.upgrade().and_then(|inner| inner.current()) {
                let _ = tx.unbounded_send(value);
            }
        });
        Ok(NotifiedValues::new(rx, subscription).boxed_local())
    }

    /// Release what this provider subscribed to and run its dispose hook.
    ///
    /// Idempotent: only the first call does any work.
    pub async fn dispose(&self) -> std::result::Result<(), BoxError> {
        if self.inner.disposed.replace(true) {
            return Ok(());
        }
        match &self.inner.source {
            Source::Lazy(state) => state.reset(),
            Source::Stream(state) => state.cancel(),
            Source::Value { .. } | Source::Factory(_) => {}
        }
        let hook = self.inner.on_dispose.take();
        match hook {
            Some(hook) => hook().await,
            None => Ok(()),
        }
    }
}

impl<T: Clone + AsListenable + 'static> Provider<T> {
    /// Publish a value whose own change source drives consumers.
    #[must_use]
    pub fn listenable_value(value: T) -> Self {
        Self::from_source(Source::Value {
            value,
            bridge: Some(bridge_of::<T> as Bridge<T>),
        })
    }

    /// Lazily publish an observable value.
    ///
    /// The provider's change source exists immediately and forwards the
    /// value's notifications once the value has been created.
    #[must_use]
    pub fn listenable_lazy(init: impl Fn(&ProvideContext<'_>) -> T + 'static) -> Self {
        Self::from_source(Source::Lazy(LazyState::new(
            Box::new(init),
            Some(bridge_of::<T> as Bridge<T>),
        )))
    }
}

impl<T: Clone + PartialEq + 'static> Provider<T> {
    /// Publish the latest element of `upstream`, starting from `initial`.
    ///
    /// The upstream is subscribed immediately through `spawner`. Elements
    /// equal to the cached one are dropped without notifying. Use
    /// `Provider<Option<U>>` with `None` for an unseeded stream.
    pub fn from_stream<S, Sp>(upstream: S, initial: T, spawner: &Sp) -> Result<Self>
    where
        S: Stream<Item = T> + 'static,
        Sp: LocalSpawn + ?Sized,
    {
        let state = StreamState::start(upstream, initial, spawner)?;
        Ok(Self::from_source(Source::Stream(state)))
    }
}

impl<T: Clone + 'static> fmt::Debug for Provider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("type", &self.declared_type())
            .field("strategy", &self.strategy())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AnyProvider
// ---------------------------------------------------------------------------

trait ErasedProvider {
    fn declared_type(&self) -> TypeKey;
    fn strategy(&self) -> Strategy;
    fn as_any(&self) -> &dyn Any;
    fn identity(&self) -> *const ();
    fn is_disposed(&self) -> bool;
    fn change_source(&self) -> Result<ChangeSource>;
    fn get_any(&self, cx: &ProvideContext<'_>) -> Box<dyn Any>;
    fn dispose_boxed(&self) -> LocalBoxFuture<'static, std::result::Result<(), BoxError>>;
}

impl<T: Clone + 'static> ErasedProvider for Provider<T> {
    fn declared_type(&self) -> TypeKey {
        Provider::declared_type(self)
    }

    fn strategy(&self) -> Strategy {
        Provider::strategy(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn identity(&self) -> *const () {
        Rc::as_ptr(&self.inner).cast()
    }

    fn is_disposed(&self) -> bool {
        Provider::is_disposed(self)
    }

    fn change_source(&self) -> Result<ChangeSource> {
        self.listenable()
    }

    fn get_any(&self, cx: &ProvideContext<'_>) -> Box<dyn Any> {
        Box::new(self.get(cx))
    }

    fn dispose_boxed(&self) -> LocalBoxFuture<'static, std::result::Result<(), BoxError>> {
        let this = self.clone();
        async move { this.dispose().await }.boxed_local()
    }
}

/// A provider with its value type erased.
///
/// Cloning shares the underlying producer; [`downcast`](Self::downcast)
/// recovers the typed handle.
#[derive(Clone)]
pub struct AnyProvider {
    inner: Rc<dyn ErasedProvider>,
}

impl AnyProvider {
    #[must_use]
    pub fn new<T: Clone + 'static>(provider: Provider<T>) -> Self {
        Self {
            inner: Rc::new(provider),
        }
    }

    #[must_use]
    pub fn declared_type(&self) -> TypeKey {
        self.inner.declared_type()
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.inner.strategy()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.inner.as_any().is::<Provider<T>>()
    }

    #[must_use]
    pub fn downcast<T: Clone + 'static>(&self) -> Option<Provider<T>> {
        self.inner.as_any().downcast_ref::<Provider<T>>().cloned()
    }

    /// Whether both handles erase the same producer.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.inner.identity(), other.inner.identity())
    }

    pub fn change_source(&self) -> Result<ChangeSource> {
        self.inner.change_source()
    }

    /// Produce a value boxed as `Any`.
    pub fn get_any(&self, cx: &ProvideContext<'_>) -> Box<dyn Any> {
        self.inner.get_any(cx)
    }

    pub fn dispose(&self) -> LocalBoxFuture<'static, std::result::Result<(), BoxError>> {
        self.inner.dispose_boxed()
    }
}

impl<T: Clone + 'static> From<Provider<T>> for AnyProvider {
    fn from(provider: Provider<T>) -> Self {
        Self::new(provider)
    }
}

impl fmt::Debug for AnyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyProvider")
            .field("type", &self.declared_type())
            .field("strategy", &self.strategy())
            .finish()
    }
}
