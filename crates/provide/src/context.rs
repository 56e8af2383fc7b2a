#![forbid(unsafe_code)]

//! The context handed to providers when they produce a value.

use std::fmt;

use crate::error::{ProvideError, Result};
use crate::node::ProviderNode;
use crate::scope::Scope;
use crate::type_key::TypeKey;

/// Where in the tree a value is being produced.
///
/// Lazy initializers and factories receive this so they can resolve their
/// own dependencies from the requesting node's ancestors. A detached context
/// resolves nothing.
#[derive(Clone, Copy, Default)]
pub struct ProvideContext<'a> {
    node: Option<&'a ProviderNode>,
}

impl<'a> ProvideContext<'a> {
    #[must_use]
    pub fn new(node: &'a ProviderNode) -> Self {
        Self { node: Some(node) }
    }

    /// A context outside of any tree.
    #[must_use]
    pub fn detached() -> Self {
        Self { node: None }
    }

    #[must_use]
    pub fn node(&self) -> Option<&'a ProviderNode> {
        self.node
    }

    /// Read the nearest `T` in the default scope.
    pub fn read<T: Clone + 'static>(&self) -> Result<T> {
        self.read_in(&Scope::DEFAULT)
    }

    pub fn read_in<T: Clone + 'static>(&self, scope: &Scope) -> Result<T> {
        let node = self
            .node
            .ok_or_else(|| ProvideError::not_found(TypeKey::of::<T>(), scope))?;
        let provider = node.resolve::<T>(scope)?;
        Ok(provider.get(self))
    }
}

impl fmt::Debug for ProvideContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvideContext")
            .field("attached", &self.node.is_some())
            .finish()
    }
}
