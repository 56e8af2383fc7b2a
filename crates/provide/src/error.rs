#![forbid(unsafe_code)]

use futures::task::SpawnError;
use thiserror::Error;

use crate::provider::Strategy;
use crate::scope::Scope;
use crate::type_key::TypeKey;

pub type Result<T> = std::result::Result<T, ProvideError>;

/// Error returned by a provider's disposal hook.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ProvideError {
    #[error("provider stored under {key} declares {declared}")]
    TypeMismatch { key: TypeKey, declared: TypeKey },

    #[error(
        "provider stored under {key} has no resolved type; construct it with an explicit type parameter"
    )]
    TypeInferenceFailure { key: TypeKey },

    #[error("{strategy} provider of {ty} has no change source")]
    UnsupportedOperation { ty: TypeKey, strategy: Strategy },

    #[error("no provider of {ty} in scope {scope}")]
    NotFound { ty: TypeKey, scope: Scope },

    #[error("{ty} in scope {scope} is not observable and cannot be watched")]
    NotObservable { ty: TypeKey, scope: Scope },

    #[error("stream provider could not be started: {0}")]
    Spawn(#[from] SpawnError),

    #[error("{count} provider(s) failed to dispose", count = .failures.len())]
    Dispose { failures: Vec<DisposeFailure> },
}

impl ProvideError {
    #[must_use]
    pub fn not_found(ty: TypeKey, scope: &Scope) -> Self {
        Self::NotFound {
            ty,
            scope: scope.clone(),
        }
    }

    #[must_use]
    pub fn not_observable(ty: TypeKey, scope: &Scope) -> Self {
        Self::NotObservable {
            ty,
            scope: scope.clone(),
        }
    }
}

/// One provider's failed disposal, collected by `Providers::dispose_all`.
#[derive(Debug, Error)]
#[error("disposing {ty} in scope {scope} failed: {source}")]
pub struct DisposeFailure {
    pub ty: TypeKey,
    pub scope: Scope,
    #[source]
    pub source: BoxError,
}
