//! # Aliasing Handles
//!
//! [`ObjectPtr`] and [`ObjectRef`] pair a strong handle with a raw interior
//! pointer: "a pointer into shared storage with shared lifetime". The handle
//! guarantees the pointee outlives the alias; the pointer may address the
//! payload itself, a field of it, or anything else whose lifetime encloses
//! the handle's ownership.
//!
//! `ObjectRef` additionally guarantees a non-null interior and dereferences
//! directly; `ObjectPtr` is its nullable counterpart.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::error::ObjectError;
use crate::object::Object;

// ============================================================================
// ObjectPtr
// ============================================================================

/// A strong handle plus a possibly-null interior pointer.
pub struct ObjectPtr<T: Any> {
    object: Object,
    ptr: *const T,
}

unsafe impl<T: Any + Sync> Send for ObjectPtr<T> {}
unsafe impl<T: Any + Sync> Sync for ObjectPtr<T> {}

impl<T: Any> ObjectPtr<T> {
    /// Alias the payload of `object`. The interior pointer is resolved by
    /// exact cast, then by lineage; it is left null if neither matches.
    pub fn new(object: Object) -> Self {
        let ptr = object
            .downcast_ref::<T>()
            .or_else(|| object.upcast_ref::<T>())
            .map_or(std::ptr::null(), |r| r as *const T);
        ObjectPtr { object, ptr }
    }

    /// Pair `object` with a caller-supplied interior pointer, taken
    /// verbatim.
    ///
    /// The caller asserts that `ptr` is null or points into storage that
    /// stays valid at least as long as `object` keeps its holder alive.
    pub fn with_ptr(object: Object, ptr: *const T) -> Self {
        ObjectPtr { object, ptr }
    }

    /// The handle supplying lifetime.
    pub fn object(&self) -> &Object {
        &self.object
    }

    /// Whether the interior pointer is null.
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// The interior, when present.
    pub fn get(&self) -> Option<&T> {
        // The strong handle keeps the pointee's storage alive, so a non-null
        // interior is dereferenceable for as long as `self` is borrowed.
        unsafe { self.ptr.as_ref() }
    }

    /// The interior, reporting null as a cast failure.
    pub fn require(&self) -> Result<&T, ObjectError> {
        self.get().ok_or(ObjectError::BadCast {
            expected: std::any::type_name::<T>(),
            found: self.object.type_name().unwrap_or("<null>"),
        })
    }

    /// Upgrade to the non-null variant.
    pub fn into_ref(self) -> Result<ObjectRef<T>, ObjectError> {
        match NonNull::new(self.ptr as *mut T) {
            Some(ptr) => Ok(ObjectRef {
                object: self.object,
                ptr,
            }),
            None => Err(ObjectError::BadCast {
                expected: std::any::type_name::<T>(),
                found: self.object.type_name().unwrap_or("<null>"),
            }),
        }
    }

    /// Drop the alias, keeping the handle.
    pub fn into_object(self) -> Object {
        self.object
    }
}

impl<T: Any> Clone for ObjectPtr<T> {
    fn clone(&self) -> Self {
        ObjectPtr {
            object: self.object.clone(),
            ptr: self.ptr,
        }
    }
}

impl<T: Any> fmt::Debug for ObjectPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPtr")
            .field("object", &self.object)
            .field("interior", &self.ptr)
            .finish()
    }
}

// ============================================================================
// ObjectRef
// ============================================================================

/// A strong handle plus a non-null interior pointer; dereferences to the
/// interior.
pub struct ObjectRef<T: Any> {
    object: Object,
    ptr: NonNull<T>,
}

unsafe impl<T: Any + Sync> Send for ObjectRef<T> {}
unsafe impl<T: Any + Sync> Sync for ObjectRef<T> {}

impl<T: Any> ObjectRef<T> {
    /// Alias the payload of `object`; fails when the payload is not a `T`
    /// (by exact tag or lineage) or the handle is null.
    pub fn new(object: Object) -> Result<Self, ObjectError> {
        ObjectPtr::new(object).into_ref()
    }

    /// Pair `object` with a caller-supplied non-null interior pointer.
    ///
    /// The caller asserts that `ptr` points into storage that stays valid at
    /// least as long as `object` keeps its holder alive.
    pub fn with_ptr(object: Object, ptr: NonNull<T>) -> Self {
        ObjectRef { object, ptr }
    }

    /// The handle supplying lifetime.
    pub fn object(&self) -> &Object {
        &self.object
    }

    /// A nullable alias of the same interior, sharing the handle.
    pub fn alias(&self) -> ObjectPtr<T> {
        ObjectPtr {
            object: self.object.clone(),
            ptr: self.ptr.as_ptr(),
        }
    }

    /// Drop the alias, keeping the handle.
    pub fn into_object(self) -> Object {
        self.object
    }
}

impl<T: Any> Deref for ObjectRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Non-null by construction; storage pinned by the strong handle.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Any> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        ObjectRef {
            object: self.object.clone(),
            ptr: self.ptr,
        }
    }
}

impl<T: Any + fmt::Debug> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("object", &self.object)
            .field("value", &**self)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage::{self, Extends};

    #[test]
    fn test_ptr_exact_resolution() {
        let o = Object::new(10_i32);
        let p = ObjectPtr::<i32>::new(o.clone());
        assert_eq!(p.get(), Some(&10));
        assert_eq!(o.strong_count(), 2);
        drop(p);
        assert_eq!(o.strong_count(), 1);
    }

    #[test]
    fn test_ptr_mismatch_is_null() {
        let o = Object::new(10_i32);
        let p = ObjectPtr::<u32>::new(o);
        assert!(p.is_null());
        assert!(p.get().is_none());
        assert!(p.require().is_err());
        assert!(p.into_ref().is_err());
    }

    #[test]
    fn test_ref_rejects_null_interior() {
        assert!(ObjectRef::<i32>::new(Object::null()).is_err());
        assert!(ObjectRef::<i32>::new(Object::new("wrong")).is_err());
    }

    #[test]
    fn test_ref_deref_and_alias() {
        let o = Object::new(String::from("interior"));
        let r = ObjectRef::<String>::new(o).unwrap();
        assert_eq!(r.as_str(), "interior");

        let p = r.alias();
        assert_eq!(p.get().map(String::as_str), Some("interior"));
        assert_eq!(p.object(), r.object());
    }

    #[test]
    fn test_field_alias_outlives_source_handle() {
        struct Pair {
            left: u32,
            right: u32,
        }

        let o = Object::new(Pair { left: 1, right: 2 });
        assert_eq!(o.downcast_ref::<Pair>().unwrap().left, 1);
        let field = NonNull::from(&o.downcast_ref::<Pair>().unwrap().right);
        let r = ObjectRef::with_ptr(o, field);
        // The original handle is gone; the alias keeps the pair alive.
        assert_eq!(*r, 2);
    }

    struct Base {
        id: u32,
    }

    struct Wide {
        base: Base,
    }

    impl Extends<Base> for Wide {
        fn as_base(&self) -> &Base {
            &self.base
        }
    }

    #[test]
    fn test_ptr_falls_back_to_lineage() {
        lineage::register::<Wide, Base>();
        let o = Object::new(Wide {
            base: Base { id: 7 },
        });
        let p = ObjectPtr::<Base>::new(o);
        assert_eq!(p.get().unwrap().id, 7);
    }
}
