//! # Runtime Type Identity
//!
//! [`TypeTag`] is the runtime identity a holder records for its payload. Two
//! holders created for the same underlying type compare equal; holders for
//! different types compare unequal; an empty handle reports [`TypeTag::NULL`].

use std::any::{Any, TypeId};

/// Runtime identity of a payload type.
///
/// A thin wrapper over [`TypeId`] with one extra state: the null tag reported
/// by empty handles. Array holders are tagged `[T]`, so the tag of an array
/// of `i32` is `TypeTag::of::<[i32]>()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeTag(Option<TypeId>);

impl TypeTag {
    /// The tag reported by an empty handle.
    pub const NULL: TypeTag = TypeTag(None);

    /// Tag of a concrete type.
    pub fn of<T: Any + ?Sized>() -> Self {
        TypeTag(Some(TypeId::of::<T>()))
    }

    /// Whether this is the null tag.
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub(crate) fn from_id(id: TypeId) -> Self {
        TypeTag(Some(id))
    }
}

impl Default for TypeTag {
    fn default() -> Self {
        TypeTag::NULL
    }
}
