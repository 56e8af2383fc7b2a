#![forbid(unsafe_code)]

//! Scope tokens that partition the value space.
//!
//! A [`Scope`] is an identity, not a value: two scopes compare equal only
//! when one is a clone of the other. The label is for diagnostics.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

// Id 0 is reserved for `Scope::DEFAULT`.
static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Secondary lookup key letting several values of one type coexist.
#[derive(Clone)]
pub struct Scope {
    id: u64,
    label: Cow<'static, str>,
}

impl Scope {
    /// The scope used whenever none is given.
    pub const DEFAULT: Scope = Scope {
        id: 0,
        label: Cow::Borrowed("default"),
    };

    /// Create a fresh scope, distinct from every other scope ever created.
    #[must_use]
    pub fn new(label: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.id == 0
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Scope {}

impl Hash for Scope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope({}#{})", self.label, self.id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_label_distinct_identity() {
        let a = Scope::new("theme");
        let b = Scope::new("theme");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn default_is_stable() {
        assert_eq!(Scope::default(), Scope::DEFAULT);
        assert!(Scope::DEFAULT.is_default());
        assert!(!Scope::new("default").is_default());
    }

    #[test]
    fn display_uses_label() {
        let scope = Scope::new(String::from("sidebar"));
        assert_eq!(scope.to_string(), "sidebar");
        assert!(format!("{scope:?}").starts_with("Scope(sidebar#"));
    }
}
