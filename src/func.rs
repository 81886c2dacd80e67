//! # Callable Wrappers
//!
//! [`FnObject`] is a strong handle constrained to callable holders: the
//! holder stores the callable state behind a mutex and an extended vtable
//! carrying a monomorphized `invoke` slot, so every handle with the same
//! signature dispatches through one uniform call contract regardless of the
//! concrete callable inside.
//!
//! [`FnRef`] is the non-owning counterpart: a `{target, thunk}` pair that
//! either borrows an [`FnObject`] (and can be converted back to one) or
//! borrows an arbitrary closure the caller keeps alive.
//!
//! Argument lists are tuples: a binary callable has `A = (T1, T2)` and is
//! invoked as `f.call((a, b))`.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::error::ObjectError;
use crate::header::{Header, HolderVtable};
use crate::holder::{self, FnVtable};
use crate::object::Object;

// ============================================================================
// Callable
// ============================================================================

/// A value invocable with an argument tuple `A`.
///
/// Implemented for all `FnMut` closures and function pointers of arity zero
/// through six.
pub trait Callable<A> {
    /// The invocation result.
    type Output;

    /// Invoke with `args`.
    fn invoke(&mut self, args: A) -> Self::Output;
}

macro_rules! impl_callable {
    ($( ( $($arg:ident),* ) )+) => {$(
        impl<Fun, Ret, $($arg),*> Callable<($($arg,)*)> for Fun
        where
            Fun: FnMut($($arg),*) -> Ret,
        {
            type Output = Ret;

            #[allow(non_snake_case)]
            fn invoke(&mut self, ($($arg,)*): ($($arg,)*)) -> Ret {
                self($($arg),*)
            }
        }
    )+};
}

impl_callable! {
    ()
    (A1)
    (A1, A2)
    (A1, A2, A3)
    (A1, A2, A3, A4)
    (A1, A2, A3, A4, A5)
    (A1, A2, A3, A4, A5, A6)
}

// ============================================================================
// FnObject
// ============================================================================

/// An owning, signature-typed callable handle.
///
/// ```
/// use anyarc::FnObject;
///
/// let mut seed = 100;
/// let f: FnObject<(i32,), i32> = FnObject::new(move |x: i32| {
///     seed += 1;
///     x + seed
/// });
/// assert_eq!(f.call((1,)), Ok(102));
/// assert_eq!(f.call((1,)), Ok(103));
///
/// let g = f.clone(); // shares the same callable state
/// assert_eq!(g.call((1,)), Ok(104));
/// ```
pub struct FnObject<A, R = ()> {
    object: Object,
    _sig: PhantomData<fn(A) -> R>,
}

impl<A: 'static, R: 'static> FnObject<A, R> {
    /// The empty handle; calling it fails.
    pub const fn null() -> Self {
        FnObject {
            object: Object::null(),
            _sig: PhantomData,
        }
    }

    /// Allocate a callable holder for `callable`.
    pub fn new<F>(callable: F) -> Self
    where
        F: Callable<A, Output = R> + Send + 'static,
    {
        FnObject {
            object: unsafe { Object::from_header(Some(holder::alloc_fn::<F, A, R>(callable))) },
            _sig: PhantomData,
        }
    }

    /// Allocate a callable holder containing a default-constructed `F`.
    pub fn new_default<F>() -> Self
    where
        F: Callable<A, Output = R> + Default + Send + 'static,
    {
        Self::new(F::default())
    }

    /// Adopt a generic handle whose holder is callable with exactly this
    /// signature. Shares the handle on success; the argument is untouched on
    /// failure.
    pub fn from_object(object: &Object) -> Result<Self, ObjectError> {
        let Some(h) = object.header() else {
            return Err(ObjectError::NotCallable);
        };
        let sig = unsafe { h.as_ref() }.vtable().fn_sig;
        if sig.map(|f| f()) != Some(holder::signature_tag::<A, R>()) {
            return Err(ObjectError::NotCallable);
        }
        Ok(FnObject {
            object: object.clone(),
            _sig: PhantomData,
        })
    }

    /// Whether the handle is empty.
    pub fn is_null(&self) -> bool {
        self.object.is_null()
    }

    /// Invoke the stored callable. Fails only when the handle is empty.
    ///
    /// The callable state is locked for the duration of the call, so shared
    /// handles may invoke concurrently and `FnMut` state stays consistent.
    pub fn call(&self, args: A) -> Result<R, ObjectError> {
        let h = self.object.header().ok_or(ObjectError::NotCallable)?;
        Ok(unsafe { invoke_through_header(h, args) })
    }

    /// Replace the contents with a freshly allocated callable.
    pub fn emplace<F>(&mut self, callable: F)
    where
        F: Callable<A, Output = R> + Send + 'static,
    {
        *self = Self::new(callable);
    }

    /// The underlying generic handle.
    pub fn as_object(&self) -> &Object {
        &self.object
    }

    /// Give up the signature typing, keeping the handle.
    pub fn into_object(self) -> Object {
        self.object
    }
}

/// Dispatch through the extended vtable of a callable holder.
///
/// # Safety
///
/// `h` must head a live callable holder whose signature marker is exactly
/// `Signature<A, R>` (checked by every `FnObject` constructor).
unsafe fn invoke_through_header<A, R>(h: NonNull<Header>, args: A) -> R {
    let vt = unsafe { h.as_ref() }.vtable();
    // The base vtable is the first field of the `#[repr(C)]` extended
    // record, so the addresses coincide.
    let fnvt = unsafe { &*(vt as *const HolderVtable as *const FnVtable<A, R>) };
    unsafe { (fnvt.invoke)(h, args) }
}

impl<A: 'static, R: 'static> Default for FnObject<A, R> {
    fn default() -> Self {
        FnObject::null()
    }
}

impl<A, R> Clone for FnObject<A, R> {
    fn clone(&self) -> Self {
        FnObject {
            object: self.object.clone(),
            _sig: PhantomData,
        }
    }
}

impl<A, R> PartialEq for FnObject<A, R> {
    fn eq(&self, other: &Self) -> bool {
        self.object == other.object
    }
}

impl<A, R> Eq for FnObject<A, R> {}

impl<A: 'static, R: 'static> From<FnObject<A, R>> for Object {
    fn from(f: FnObject<A, R>) -> Object {
        f.into_object()
    }
}

impl<A, R> fmt::Debug for FnObject<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnObject")
            .field("object", &self.object)
            .finish()
    }
}

// ============================================================================
// FnRef
// ============================================================================

/// A non-owning callable reference: a target pointer and a call thunk.
///
/// Borrowed either from an [`FnObject`] (in which case [`FnRef::to_object`]
/// recovers an owning handle) or from any [`Callable`] the caller keeps
/// alive for `'a`.
pub struct FnRef<'a, A, R = ()> {
    target: NonNull<()>,
    thunk: unsafe fn(NonNull<()>, A) -> R,
    origin: Option<NonNull<Header>>,
    _life: PhantomData<&'a mut ()>,
}

impl<'a, A: 'static, R: 'static> FnRef<'a, A, R> {
    /// Borrow an owning callable handle. Fails when the handle is empty.
    pub fn new(f: &'a FnObject<A, R>) -> Result<Self, ObjectError> {
        let h = f.as_object().header().ok_or(ObjectError::NotCallable)?;
        Ok(FnRef {
            target: h.cast(),
            thunk: object_thunk::<A, R>,
            origin: Some(h),
            _life: PhantomData,
        })
    }

    /// Borrow an arbitrary callable. The caller keeps `callable` alive and
    /// unaliased for `'a`; conversion back to an owning handle is not
    /// available on this path.
    pub fn borrowed<F>(callable: &'a mut F) -> Self
    where
        F: Callable<A, Output = R>,
    {
        FnRef {
            target: NonNull::from(callable).cast(),
            thunk: borrowed_thunk::<F, A, R>,
            origin: None,
            _life: PhantomData,
        }
    }

    /// Invoke the referenced callable.
    pub fn call(&mut self, args: A) -> R {
        unsafe { (self.thunk)(self.target, args) }
    }

    /// Recover an owning handle; succeeds only when this reference was
    /// constructed from one.
    pub fn to_object(&self) -> Result<FnObject<A, R>, ObjectError> {
        let h = self.origin.ok_or(ObjectError::NotCallable)?;
        Ok(FnObject {
            object: unsafe { Object::clone_header(h) },
            _sig: PhantomData,
        })
    }
}

unsafe fn object_thunk<A: 'static, R: 'static>(target: NonNull<()>, args: A) -> R {
    unsafe { invoke_through_header(target.cast::<Header>(), args) }
}

unsafe fn borrowed_thunk<F, A, R>(target: NonNull<()>, args: A) -> R
where
    F: Callable<A, Output = R>,
{
    unsafe { target.cast::<F>().as_mut() }.invoke(args)
}

impl<A, R> fmt::Debug for FnRef<'_, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRef")
            .field("owned", &self.origin.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stateful_closure() {
        let f: FnObject<(i32,), i32> = FnObject::new({
            let mut seed = 100;
            move |x: i32| {
                seed += 1;
                x + seed
            }
        });
        assert_eq!(f.call((1,)), Ok(102));
        assert_eq!(f.call((1,)), Ok(103));
    }

    #[test]
    fn test_clone_shares_state() {
        let f: FnObject<(), u32> = FnObject::new({
            let mut n = 0;
            move || {
                n += 1;
                n
            }
        });
        let g = f.clone();
        assert_eq!(f, g);
        assert_eq!(f.call(()), Ok(1));
        assert_eq!(g.call(()), Ok(2));
        assert_eq!(f.call(()), Ok(3));
    }

    #[test]
    fn test_fn_pointer() {
        fn echo(x: i32) -> i32 {
            x
        }
        let f: FnObject<(i32,), i32> = FnObject::new(echo);
        assert_eq!(f.call((7,)), Ok(7));
    }

    #[test]
    fn test_empty_call_fails() {
        let f: FnObject<(), ()> = FnObject::null();
        assert_eq!(f.call(()), Err(ObjectError::NotCallable));
        assert!(FnRef::new(&f).is_err());
    }

    #[test]
    fn test_from_object_signature_check() {
        let f: FnObject<(i32,), i32> = FnObject::new(|x: i32| x * 2);
        let o: Object = f.clone().into();

        let ok = FnObject::<(i32,), i32>::from_object(&o).unwrap();
        assert_eq!(ok.call((4,)), Ok(8));
        assert_eq!(ok, f);

        // Same arity, different result type: rejected.
        assert!(FnObject::<(i32,), u32>::from_object(&o).is_err());
        // Not a callable holder at all: rejected.
        assert!(FnObject::<(i32,), i32>::from_object(&Object::new(3_i32)).is_err());
    }

    #[test]
    fn test_emplace_replaces() {
        let mut f: FnObject<(i32,), i32> = FnObject::new(|x: i32| x + 1);
        let old = f.clone();
        f.emplace(|x: i32| x * 10);
        assert_eq!(f.call((5,)), Ok(50));
        assert_eq!(old.call((5,)), Ok(6));
        assert_ne!(f, old);
    }

    #[test]
    fn test_fn_ref_from_object() {
        let f: FnObject<(i32,), i32> = FnObject::new({
            let mut seed = 100;
            move |x: i32| {
                seed += 1;
                x + seed
            }
        });
        assert_eq!(f.call((1,)), Ok(102));

        let mut g = FnRef::new(&f).unwrap();
        assert_eq!(g.call((1,)), 103);
        assert_eq!(g.call((1,)), 104);

        let owned = g.to_object().unwrap();
        assert_eq!(owned, f);
        assert_eq!(owned.call((1,)), Ok(105));
    }

    #[test]
    fn test_fn_ref_borrowed() {
        let mut counter = 0_u32;
        let mut inc = |by: u32| {
            counter += by;
            counter
        };
        let mut r: FnRef<'_, (u32,), u32> = FnRef::borrowed(&mut inc);
        assert_eq!(r.call((2,)), 2);
        assert_eq!(r.call((3,)), 5);
        assert!(r.to_object().is_err());
    }

    #[test]
    fn test_zero_arity() {
        let f: FnObject<(), &'static str> = FnObject::new(|| "ready");
        assert_eq!(f.call(()), Ok("ready"));
    }
}
