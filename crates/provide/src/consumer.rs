#![forbid(unsafe_code)]

//! Consumer-side resolution: plain reads, reactive reads, and reactive
//! reads over several dependencies at once.
//!
//! The host hands a consumer its nearest [`ProviderNode`]. A plain
//! [`read`] resolves and produces a value once. [`watch`] additionally picks
//! the provider's change source so the host can rebuild the consumer when it
//! fires. [`watch_many`] merges the change sources of N dependencies into one
//! [`ListenableMerge`] and re-reads all N values on every signal.
//!
//! # Failure Modes
//!
//! - No provider anywhere in the chain: [`ProvideError::NotFound`].
//! - [`watch`] on a provider without a change source:
//!   [`ProvideError::NotObservable`]. [`watch_many`] accepts such
//!   dependencies and simply never hears from them.

use std::any::Any;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::context::ProvideContext;
use crate::error::{ProvideError, Result};
use crate::listenable::{ChangeSource, Subscription};
use crate::merge::ListenableMerge;
use crate::node::ProviderNode;
use crate::provider::{AnyProvider, Provider};
use crate::scope::Scope;
use crate::type_key::TypeKey;

fn with_context<R>(node: &Weak<ProviderNode>, f: impl FnOnce(&ProvideContext<'_>) -> R) -> R {
    match node.upgrade() {
        Some(node) => f(&ProvideContext::new(&node)),
        None => f(&ProvideContext::detached()),
    }
}

/// Resolve `T` in `scope` from `node` upward and produce one value.
pub fn read<T: Clone + 'static>(node: &ProviderNode, scope: &Scope) -> Result<T> {
    ProvideContext::new(node).read_in(scope)
}

// ─── Single dependency ──────────────────────────────────────────────────────

/// A resolved provider together with the change source to rebuild on.
pub struct Watch<T> {
    provider: Provider<T>,
    source: ChangeSource,
    scope: Scope,
    node: Weak<ProviderNode>,
}

/// Resolve `T` in `scope` and select its change source.
pub fn watch<T: Clone + 'static>(node: &Rc<ProviderNode>, scope: &Scope) -> Result<Watch<T>> {
    let provider = node.resolve::<T>(scope)?;
    let source = provider.listenable().map_err(|err| match err {
        ProvideError::UnsupportedOperation { ty, .. } => ProvideError::not_observable(ty, scope),
        other => other,
    })?;
    Ok(Watch {
        provider,
        source,
        scope: scope.clone(),
        node: Rc::downgrade(node),
    })
}

impl<T: Clone + 'static> Watch<T> {
    /// Produce the current value.
    pub fn current(&self) -> T {
        with_context(&self.node, |cx| self.provider.get(cx))
    }

    #[must_use]
    pub fn provider(&self) -> &Provider<T> {
        &self.provider
    }

    #[must_use]
    pub fn source(&self) -> &ChangeSource {
        &self.source
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Call `f` with a freshly read value on every change.
    pub fn on_change(&self, f: impl Fn(T) + 'static) -> Subscription {
        let provider = self.provider.clone();
        let node = self.node.clone();
        Subscription::from_fn(&self.source, move || {
            f(with_context(&node, |cx| provider.get(cx)));
        })
    }
}

impl<T: Clone + 'static> fmt::Debug for Watch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("provider", &self.provider)
            .field("scope", &self.scope)
            .finish()
    }
}

// ─── Several dependencies ───────────────────────────────────────────────────

/// One `(type, scope)` pair a consumer depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    ty: TypeKey,
    scope: Scope,
}

impl Dependency {
    /// `T` in the default scope.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self::scoped::<T>(Scope::DEFAULT)
    }

    #[must_use]
    pub fn scoped<T: 'static>(scope: Scope) -> Self {
        Self {
            ty: TypeKey::of::<T>(),
            scope,
        }
    }

    #[must_use]
    pub fn ty(&self) -> TypeKey {
        self.ty
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

/// A snapshot of every dependency's value, read together.
pub struct ProvidedValues {
    values: Vec<(Dependency, Box<dyn Any>)>,
}

impl ProvidedValues {
    /// The value of `T` in the default scope.
    pub fn get<T: Clone + 'static>(&self) -> Result<T> {
        self.get_in(&Scope::DEFAULT)
    }

    pub fn get_in<T: Clone + 'static>(&self, scope: &Scope) -> Result<T> {
        let ty = TypeKey::of::<T>();
        self.values
            .iter()
            .find(|(dep, _)| dep.ty == ty && dep.scope == *scope)
            .and_then(|(_, value)| value.downcast_ref::<T>())
            .cloned()
            .ok_or_else(|| ProvideError::not_found(ty, scope))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for ProvidedValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.values.iter().map(|(dep, _)| dep))
            .finish()
    }
}

type Resolved = Rc<Vec<(Dependency, AnyProvider)>>;

fn snapshot(resolved: &Resolved, node: &Weak<ProviderNode>) -> ProvidedValues {
    with_context(node, |cx| ProvidedValues {
        values: resolved
            .iter()
            .map(|(dep, provider)| (dep.clone(), provider.get_any(cx)))
            .collect(),
    })
}

/// Several resolved providers behind one merged change source.
///
/// The merge only attaches to the dependencies' sources while someone
/// listens, so a `MultiWatch` nobody subscribed to holds no listeners.
/// Subscriptions go inert once the `MultiWatch` is dropped.
pub struct MultiWatch {
    resolved: Resolved,
    merge: Rc<ListenableMerge>,
    node: Weak<ProviderNode>,
}

/// Resolve every dependency and merge their change sources.
///
/// # Failure Modes
///
/// A dependency that is not observable (a factory, or a value built
/// without a change source) is accepted: it is read on every snapshot but
/// joins the merge as a silent `None` child and never signals. [`watch`]
/// rejects the same provider with [`ProvideError::NotObservable`].
/// A dependency with no provider in the chain fails with
/// [`ProvideError::NotFound`].
pub fn watch_many(
    node: &Rc<ProviderNode>,
    deps: impl IntoIterator<Item = Dependency>,
) -> Result<MultiWatch> {
    let resolved = deps
        .into_iter()
        .map(|dep| match node.resolve_key(dep.ty, &dep.scope) {
            Some(provider) => Ok((dep, provider)),
            None => Err(ProvideError::not_found(dep.ty, &dep.scope)),
        })
        .collect::<Result<Vec<_>>>()?;
    let merge = ListenableMerge::new(
        resolved
            .iter()
            .map(|(_, provider)| provider.change_source().ok()),
    );
    Ok(MultiWatch {
        resolved: Rc::new(resolved),
        merge: Rc::new(merge),
        node: Rc::downgrade(node),
    })
}

impl MultiWatch {
    /// Read every dependency now.
    #[must_use]
    pub fn values(&self) -> ProvidedValues {
        snapshot(&self.resolved, &self.node)
    }

    #[must_use]
    pub fn merge(&self) -> &Rc<ListenableMerge> {
        &self.merge
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.resolved.iter().map(|(dep, _)| dep)
    }

    /// Call `f` with a fresh snapshot of all values whenever any dependency
    /// changes.
    pub fn on_change(&self, f: impl Fn(&ProvidedValues) + 'static) -> Subscription {
        let resolved = Rc::clone(&self.resolved);
        let node = self.node.clone();
        let source: ChangeSource = Rc::clone(&self.merge) as ChangeSource;
        Subscription::from_fn(&source, move || f(&snapshot(&resolved, &node)))
    }
}

impl fmt::Debug for MultiWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiWatch")
            .field("dependencies", &self.dependencies().collect::<Vec<_>>())
            .field("merge", &self.merge)
            .finish()
    }
}
