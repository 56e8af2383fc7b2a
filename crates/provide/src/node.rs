#![forbid(unsafe_code)]

//! Hierarchical resolution through a chain of registries.
//!
//! A [`ProviderNode`] is what a publishing tree node attaches at its
//! position: its registry plus a weak link to the nearest enclosing node.
//! Lookups walk from the requesting node upward and return the first match.
//!
//! # Invariants
//!
//! 1. A node never owns its parent. If the parent is dropped, resolution
//!    stops at the orphaned node.
//! 2. [`resolve`](ProviderNode::resolve) returns the nearest match or fails
//!    with [`ProvideError::NotFound`], never a default value.
//! 3. [`should_notify`](ProviderNode::should_notify) is true iff this node's
//!    registry is a different instance from the previous version's, or the
//!    same question asked of the parents is true.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::error::{ProvideError, Result};
use crate::provider::{AnyProvider, Provider};
use crate::providers::Providers;
use crate::scope::Scope;
use crate::type_key::TypeKey;

/// A registry shared between its publisher and the node exposing it.
pub type SharedProviders = Rc<RefCell<Providers>>;

pub struct ProviderNode {
    providers: SharedProviders,
    parent: Option<Weak<ProviderNode>>,
    owns_disposal: bool,
}

impl ProviderNode {
    /// A node with no parent that owns `providers`.
    #[must_use]
    pub fn root(providers: Providers) -> Rc<Self> {
        Self::attach(Rc::new(RefCell::new(providers)), None, true)
    }

    /// Link `providers` below `parent`.
    ///
    /// When `owns_disposal` is false, [`detach`](Self::detach) leaves the
    /// registry's providers alone; use this to re-expose a registry owned by
    /// someone else.
    ///
    /// `parent` is held weakly. See [`child`](Self::child).
    #[must_use]
    pub fn attach(
        providers: SharedProviders,
        parent: Option<&Rc<ProviderNode>>,
        owns_disposal: bool,
    ) -> Rc<Self> {
        Rc::new(Self {
            providers,
            parent: parent.map(Rc::downgrade),
            owns_disposal,
        })
    }

    /// An owning child of this node.
    ///
    /// The child holds its parent weakly, so the caller must keep the parent
    /// `Rc` alive for as long as the child resolves through it. Once the
    /// parent is dropped the child resolves from its own registry only.
    ///
    /// ```
    /// use provide::{ProviderNode, Providers, Scope};
    ///
    /// let mut providers = Providers::new();
    /// providers.provide_value(7u32);
    /// let root = ProviderNode::root(providers);
    /// let leaf = root.child(Providers::new());
    /// assert!(leaf.find::<u32>(&Scope::DEFAULT).is_some());
    ///
    /// drop(root);
    /// assert!(leaf.find::<u32>(&Scope::DEFAULT).is_none());
    /// ```
    #[must_use]
    pub fn child(self: &Rc<Self>, providers: Providers) -> Rc<Self> {
        Self::attach(Rc::new(RefCell::new(providers)), Some(self), true)
    }

    /// A child exposing a registry it does not own.
    #[must_use]
    pub fn child_borrowing(self: &Rc<Self>, providers: SharedProviders) -> Rc<Self> {
        Self::attach(providers, Some(self), false)
    }

    #[must_use]
    pub fn providers(&self) -> &SharedProviders {
        &self.providers
    }

    #[must_use]
    pub fn parent(&self) -> Option<Rc<ProviderNode>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    #[must_use]
    pub fn owns_disposal(&self) -> bool {
        self.owns_disposal
    }

    /// Number of live ancestors.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut next = self.parent();
        while let Some(node) = next {
            depth += 1;
            next = node.parent();
        }
        depth
    }

    /// Find the nearest provider of `ty` in `scope`, starting at this node.
    #[must_use]
    pub fn resolve_key(&self, ty: TypeKey, scope: &Scope) -> Option<AnyProvider> {
        if let Some(found) = self.local(ty, scope) {
            trace!(ty = ty.name(), scope = scope.label(), hops = 0, "resolved");
            return Some(found);
        }
        let mut hops = 1usize;
        let mut next = self.parent();
        while let Some(node) = next {
            if let Some(found) = node.local(ty, scope) {
                trace!(ty = ty.name(), scope = scope.label(), hops, "resolved");
                return Some(found);
            }
            hops += 1;
            next = node.parent();
        }
        trace!(ty = ty.name(), scope = scope.label(), "unresolved");
        None
    }

    #[must_use]
    pub fn find<T: Clone + 'static>(&self, scope: &Scope) -> Option<Provider<T>> {
        self.resolve_key(TypeKey::of::<T>(), scope)
            .and_then(|found| found.downcast::<T>())
    }

    /// Like [`find`](Self::find), but a miss is an error.
    pub fn resolve<T: Clone + 'static>(&self, scope: &Scope) -> Result<Provider<T>> {
        self.find::<T>(scope)
            .ok_or_else(|| ProvideError::not_found(TypeKey::of::<T>(), scope))
    }

    fn local(&self, ty: TypeKey, scope: &Scope) -> Option<AnyProvider> {
        self.providers.borrow().lookup(ty, scope).cloned()
    }

    /// Whether consumers below this node must re-resolve relative to
    /// `previous`, the version of this node they last resolved against.
    #[must_use]
    pub fn should_notify(&self, previous: &ProviderNode) -> bool {
        if !Rc::ptr_eq(&self.providers, &previous.providers) {
            return true;
        }
        match (self.parent(), previous.parent()) {
            (None, None) => false,
            (Some(parent), Some(previous_parent)) => parent.should_notify(&previous_parent),
            _ => true,
        }
    }

    /// Release this node's registry.
    ///
    /// Disposes every provider when the node owns its registry; otherwise
    /// does nothing.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(owns = self.owns_disposal)))]
    pub async fn detach(&self) -> Result<()> {
        if !self.owns_disposal {
            debug!("detached node does not own its providers");
            return Ok(());
        }
        // Dispose from a snapshot so no borrow is held across the await.
        let snapshot = self.providers.borrow().clone();
        snapshot.dispose_all().await
    }
}

impl fmt::Debug for ProviderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderNode")
            .field("providers", &*self.providers.borrow())
            .field("depth", &self.depth())
            .field("owns_disposal", &self.owns_disposal)
            .finish()
    }
}
