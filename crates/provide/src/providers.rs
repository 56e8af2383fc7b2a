#![forbid(unsafe_code)]

//! The per-node registry of providers.
//!
//! [`Providers`] maps `Scope → TypeKey → AnyProvider`. Each publishing node
//! owns one instance.
//!
//! # Invariants
//!
//! 1. Every stored provider's declared type equals its key.
//! 2. Inserting under an occupied (scope, type) replaces the old provider
//!    without disposing it; the displaced provider is returned to the caller.
//! 3. A rejected bulk insert leaves the registry unchanged.
//! 4. [`dispose_all`](Providers::dispose_all) attempts every provider even
//!    when some fail.

use std::fmt;

use ahash::AHashMap;
use futures::future::join_all;
use tracing::{debug, trace, warn};

use crate::context::ProvideContext;
use crate::error::{DisposeFailure, ProvideError, Result};
use crate::provider::{AnyProvider, Provider};
use crate::scope::Scope;
use crate::type_key::TypeKey;

/// What `dispose_all` does with individual disposal failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisposePolicy {
    /// Log each failure and return them together as
    /// [`ProvideError::Dispose`] once every provider has been attempted.
    #[default]
    Aggregate,
    /// Log each failure and report success.
    LogOnly,
}

#[derive(Debug, Clone, Default)]
pub struct ProvidersConfig {
    pub dispose_policy: DisposePolicy,
}

type TypeTable = AHashMap<TypeKey, AnyProvider>;

/// A scope → type → provider table.
///
/// Cloning shares every provider handle.
#[derive(Clone, Default)]
pub struct Providers {
    scopes: AHashMap<Scope, TypeTable>,
    config: ProvidersConfig,
}

impl Providers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: ProvidersConfig) -> Self {
        Self {
            scopes: AHashMap::new(),
            config,
        }
    }

    /// Build a registry from `(key, provider)` entries in one scope.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (TypeKey, AnyProvider)>,
        scope: &Scope,
    ) -> Result<Self> {
        let mut providers = Self::new();
        providers.insert_many(entries, scope)?;
        Ok(providers)
    }

    #[must_use]
    pub fn config(&self) -> &ProvidersConfig {
        &self.config
    }

    // ── Insertion ────────────────────────────────────────────────────

    /// Register `provider` in the default scope.
    pub fn provide<T: Clone + 'static>(&mut self, provider: Provider<T>) -> Option<AnyProvider> {
        self.provide_in(provider, &Scope::DEFAULT)
    }

    /// Register `provider` in `scope`, returning the provider it displaced.
    pub fn provide_in<T: Clone + 'static>(
        &mut self,
        provider: Provider<T>,
        scope: &Scope,
    ) -> Option<AnyProvider> {
        self.insert_unchecked(TypeKey::of::<T>(), AnyProvider::new(provider), scope)
    }

    pub fn provide_value<T: Clone + 'static>(&mut self, value: T) -> Option<AnyProvider> {
        self.provide(Provider::value(value))
    }

    pub fn provide_lazy<T: Clone + 'static>(
        &mut self,
        init: impl Fn(&ProvideContext<'_>) -> T + 'static,
    ) -> Option<AnyProvider> {
        self.provide(Provider::lazy(init))
    }

    pub fn provide_factory<T: Clone + 'static>(
        &mut self,
        make: impl Fn(&ProvideContext<'_>) -> T + 'static,
    ) -> Option<AnyProvider> {
        self.provide(Provider::factory(make))
    }

    /// Register several type-erased providers in `scope`.
    ///
    /// Every entry is checked before any is inserted. A key differing from
    /// the provider's declared type fails with
    /// [`ProvideError::TypeMismatch`]; a provider declaring the bottom type
    /// fails with [`ProvideError::TypeInferenceFailure`].
    pub fn insert_many(
        &mut self,
        entries: impl IntoIterator<Item = (TypeKey, AnyProvider)>,
        scope: &Scope,
    ) -> Result<()> {
        let entries: Vec<(TypeKey, AnyProvider)> = entries.into_iter().collect();
        for (key, provider) in &entries {
            let declared = provider.declared_type();
            if declared.is_bottom() {
                return Err(ProvideError::TypeInferenceFailure { key: *key });
            }
            if declared != *key {
                return Err(ProvideError::TypeMismatch {
                    key: *key,
                    declared,
                });
            }
        }
        for (key, provider) in entries {
            self.insert_unchecked(key, provider, scope);
        }
        Ok(())
    }

    /// Copy every provider of `other` into this registry, sharing handles.
    pub fn merge_from(&mut self, other: &Providers) {
        for (scope, table) in &other.scopes {
            for (key, provider) in table {
                self.insert_unchecked(*key, provider.clone(), scope);
            }
        }
    }

    fn insert_unchecked(
        &mut self,
        key: TypeKey,
        provider: AnyProvider,
        scope: &Scope,
    ) -> Option<AnyProvider> {
        trace!(ty = key.name(), scope = scope.label(), strategy = %provider.strategy(), "provider inserted");
        self.scopes
            .entry(scope.clone())
            .or_default()
            .insert(key, provider)
    }

    /// Remove the provider of `T` in `scope` without disposing it.
    pub fn remove<T: 'static>(&mut self, scope: &Scope) -> Option<AnyProvider> {
        let table = self.scopes.get_mut(scope)?;
        let removed = table.remove(&TypeKey::of::<T>());
        if table.is_empty() {
            self.scopes.remove(scope);
        }
        removed
    }

    // ── Lookup ───────────────────────────────────────────────────────

    #[must_use]
    pub fn lookup(&self, ty: TypeKey, scope: &Scope) -> Option<&AnyProvider> {
        self.scopes.get(scope).and_then(|table| table.get(&ty))
    }

    #[must_use]
    pub fn get<T: Clone + 'static>(&self, scope: &Scope) -> Option<Provider<T>> {
        self.lookup(TypeKey::of::<T>(), scope)
            .and_then(AnyProvider::downcast::<T>)
    }

    #[must_use]
    pub fn contains<T: 'static>(&self, scope: &Scope) -> bool {
        self.lookup(TypeKey::of::<T>(), scope).is_some()
    }

    /// Total number of providers across all scopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.values().map(|table| table.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Scope, TypeKey, &AnyProvider)> {
        self.scopes.iter().flat_map(|(scope, table)| {
            table
                .iter()
                .map(move |(key, provider)| (scope, *key, provider))
        })
    }

    // ── Disposal ─────────────────────────────────────────────────────

    /// Dispose every provider in every scope.
    ///
    /// All disposals run concurrently and each is awaited; one failure never
    /// skips another. Failures are logged and then handled per
    /// [`DisposePolicy`]. Calling this again is harmless because provider
    /// disposal is idempotent.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(providers = self.len())))]
    pub async fn dispose_all(&self) -> Result<()> {
        let pending: Vec<_> = self
            .iter()
            .map(|(scope, ty, provider)| {
                let scope = scope.clone();
                let dispose = provider.dispose();
                async move { (scope, ty, dispose.await) }
            })
            .collect();
        debug!(providers = pending.len(), "disposing providers");

        let mut failures = Vec::new();
        for (scope, ty, outcome) in join_all(pending).await {
            if let Err(source) = outcome {
                warn!(ty = ty.name(), scope = scope.label(), error = %source, "provider dispose failed");
                failures.push(DisposeFailure { ty, scope, source });
            }
        }

        match self.config.dispose_policy {
            DisposePolicy::Aggregate if !failures.is_empty() => {
                Err(ProvideError::Dispose { failures })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Providers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (scope, table) in &self.scopes {
            let types: Vec<&'static str> = table.keys().map(TypeKey::name).collect();
            map.entry(scope, &types);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use futures::executor::block_on;
    use std::cell::Cell;
    use std::convert::Infallible;
    use std::rc::Rc;

    fn read<T: Clone + 'static>(providers: &Providers, scope: &Scope) -> Option<T> {
        providers
            .get::<T>(scope)
            .map(|p| p.get(&ProvideContext::detached()))
    }

    #[test]
    fn overwrite_returns_previous_without_disposing() {
        let mut providers = Providers::new();
        let first = Provider::value(1u32);
        assert!(providers.provide(first.clone()).is_none());

        let displaced = providers.provide(Provider::value(2u32)).unwrap();
        assert!(displaced.downcast::<u32>().unwrap().ptr_eq(&first));
        assert!(!first.is_disposed());
        assert_eq!(read::<u32>(&providers, &Scope::DEFAULT), Some(2));
        assert_eq!(providers.len(), 1);
    }

    #[test]
    fn scopes_are_isolated() {
        let a = Scope::new("a");
        let b = Scope::new("b");
        let mut providers = Providers::new();
        providers.provide_in(Provider::value("in a"), &a);
        providers.provide_in(Provider::value("in b"), &b);

        assert_eq!(read::<&str>(&providers, &a), Some("in a"));
        assert_eq!(read::<&str>(&providers, &b), Some("in b"));
        assert_eq!(read::<&str>(&providers, &Scope::DEFAULT), None);
    }

    #[test]
    fn default_scope_is_implicit() {
        let mut providers = Providers::new();
        providers.provide_value(9i8);
        assert_eq!(read::<i8>(&providers, &Scope::default()), Some(9));
        assert!(providers.contains::<i8>(&Scope::DEFAULT));
    }

    #[test]
    fn insert_many_rejects_mismatch_without_mutation() {
        let mut providers = Providers::new();
        providers.provide_value(1u8);

        let err = providers
            .insert_many(
                [
                    (TypeKey::of::<u16>(), AnyProvider::new(Provider::value(2u16))),
                    (TypeKey::of::<String>(), AnyProvider::new(Provider::value(3u32))),
                ],
                &Scope::DEFAULT,
            )
            .unwrap_err();

        assert!(matches!(err, ProvideError::TypeMismatch { key, declared }
            if key == TypeKey::of::<String>() && declared == TypeKey::of::<u32>()));
        assert_eq!(providers.len(), 1);
        assert!(!providers.contains::<u16>(&Scope::DEFAULT));
    }

    #[test]
    fn insert_many_flags_bottom_type() {
        let mut providers = Providers::new();
        let never = Provider::<Infallible>::factory(|_| unreachable!("never produced"));
        let err = providers
            .insert_many(
                [(TypeKey::of::<u8>(), AnyProvider::new(never))],
                &Scope::DEFAULT,
            )
            .unwrap_err();
        assert!(matches!(err, ProvideError::TypeInferenceFailure { .. }));
        assert!(providers.is_empty());
    }

    #[test]
    fn insert_many_accepts_matching_entries() {
        let scope = Scope::new("settings");
        let providers = Providers::from_entries(
            [
                (TypeKey::of::<u8>(), AnyProvider::new(Provider::value(1u8))),
                (TypeKey::of::<bool>(), AnyProvider::new(Provider::value(true))),
            ],
            &scope,
        )
        .unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(read::<bool>(&providers, &scope), Some(true));
    }

    #[test]
    fn merge_shares_handles() {
        let scope = Scope::new("extra");
        let mut source = Providers::new();
        let number = Provider::value(5u64);
        source.provide(number.clone());
        source.provide_in(Provider::value('x'), &scope);

        let mut target = Providers::new();
        target.provide_value(1u64);
        target.merge_from(&source);

        assert!(target.get::<u64>(&Scope::DEFAULT).unwrap().ptr_eq(&number));
        assert_eq!(read::<char>(&target, &scope), Some('x'));
        assert_eq!(target.len(), 2);
    }

    #[test]
    fn remove_drops_empty_scope() {
        let scope = Scope::new("tmp");
        let mut providers = Providers::new();
        providers.provide_in(Provider::value(1u8), &scope);
        assert!(providers.remove::<u8>(&scope).is_some());
        assert!(providers.remove::<u8>(&scope).is_none());
        assert_eq!(providers.scopes().count(), 0);
    }

    fn counted(count: &Rc<Cell<u32>>, fail: bool) -> Provider<u8> {
        let count = Rc::clone(count);
        Provider::value(0u8).on_dispose(move || async move {
            count.set(count.get() + 1);
            if fail {
                Err::<(), BoxError>("refused".into())
            } else {
                Ok(())
            }
        })
    }

    #[test]
    fn dispose_all_attempts_every_provider() {
        let disposed = Rc::new(Cell::new(0u32));
        let mut providers = Providers::new();
        let scopes: Vec<Scope> = (0..4).map(|i| Scope::new(format!("s{i}"))).collect();
        for (i, scope) in scopes.iter().enumerate() {
            providers.provide_in(counted(&disposed, i == 1), scope);
        }

        let err = block_on(providers.dispose_all()).unwrap_err();
        assert_eq!(disposed.get(), 4);
        match err {
            ProvideError::Dispose { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].scope, scopes[1]);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Second pass: every provider is already disposed.
        block_on(providers.dispose_all()).unwrap();
        assert_eq!(disposed.get(), 4);
    }

    #[test]
    fn log_only_policy_swallows_failures() {
        let disposed = Rc::new(Cell::new(0u32));
        let mut providers = Providers::with_config(ProvidersConfig {
            dispose_policy: DisposePolicy::LogOnly,
        });
        providers.provide(counted(&disposed, true));
        block_on(providers.dispose_all()).unwrap();
        assert_eq!(disposed.get(), 1);
    }
}
