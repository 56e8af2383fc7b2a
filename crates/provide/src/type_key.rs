#![forbid(unsafe_code)]

//! Runtime type tokens used as registry keys.

use std::any::TypeId;
use std::convert::Infallible;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A `TypeId` paired with the type's name for diagnostics.
///
/// Equality and hashing use the `TypeId` only.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this is the uninhabited bottom type.
    ///
    /// A provider declaring `Infallible` can never produce a value; the
    /// registry treats it as a declaration whose type was never resolved.
    #[must_use]
    pub fn is_bottom(&self) -> bool {
        self.id == TypeId::of::<Infallible>()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_compare_by_type() {
        assert_eq!(TypeKey::of::<u32>(), TypeKey::of::<u32>());
        assert_ne!(TypeKey::of::<u32>(), TypeKey::of::<i32>());
        assert_eq!(TypeKey::of::<String>().name(), "alloc::string::String");
    }

    #[test]
    fn bottom_detection() {
        assert!(TypeKey::of::<Infallible>().is_bottom());
        assert!(!TypeKey::of::<()>().is_bottom());
    }
}
