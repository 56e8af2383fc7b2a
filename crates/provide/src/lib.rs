#![forbid(unsafe_code)]

//! Typed, scoped, hierarchical value providers with change notification.
//!
//! A tree of publishing nodes each owns a [`Providers`] registry mapping
//! `(Scope, TypeKey)` to a [`Provider`]. Consumers hold their nearest
//! [`ProviderNode`] and resolve values from it upward:
//!
//! ```
//! use provide::{ProviderNode, Providers, Scope, read};
//!
//! let mut root = Providers::new();
//! root.provide_value(String::from("dark"));
//! let root = ProviderNode::root(root);
//!
//! let mut inner = Providers::new();
//! inner.provide_value(42u32);
//! let leaf = root.child(inner);
//!
//! assert_eq!(read::<String>(&leaf, &Scope::DEFAULT).unwrap(), "dark");
//! assert_eq!(read::<u32>(&leaf, &Scope::DEFAULT).unwrap(), 42);
//! ```
//!
//! # Modules
//!
//! - [`provider`]: the four production strategies and type erasure.
//! - [`providers`]: the per-node registry and bulk disposal.
//! - [`node`]: parent-chained resolution and rebuild signalling.
//! - [`consumer`]: `read`, `watch`, and `watch_many`.
//! - [`listenable`], [`observable`], [`merge`]: the change-notification
//!   primitives everything above is built on.
//!
//! Everything is single-threaded (`Rc`/`RefCell`). Stream providers spawn
//! their pump on a caller-supplied [`futures::task::LocalSpawn`].

pub mod consumer;
pub mod context;
pub mod error;
pub mod listenable;
pub mod merge;
pub mod node;
pub mod observable;
pub mod provider;
pub mod providers;
pub mod scope;
pub mod type_key;

pub use consumer::{Dependency, MultiWatch, ProvidedValues, Watch, read, watch, watch_many};
pub use context::ProvideContext;
pub use error::{BoxError, DisposeFailure, ProvideError, Result};
pub use listenable::{
    AsListenable, ChangeNotifier, ChangeSource, Listenable, Listener, ListenerId, Subscription,
};
pub use merge::ListenableMerge;
pub use node::{ProviderNode, SharedProviders};
pub use observable::Observable;
pub use provider::{AnyProvider, Provider, Strategy};
pub use providers::{DisposePolicy, Providers, ProvidersConfig};
pub use scope::Scope;
pub use type_key::TypeKey;
