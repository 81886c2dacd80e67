//! # Weak Handle
//!
//! [`WeakObject`] observes a payload without keeping it alive. It contributes
//! one to the weak count, so the backing allocation (and the type
//! information in its header) outlives the payload for as long as any weak
//! handle survives; the payload region itself is dead once the last strong
//! handle drops.
//!
//! Weak handles are the crate's only cycle break: a payload that stores a
//! `WeakObject` back toward its owner does not leak.

use std::ptr::NonNull;

use crate::error::ObjectError;
use crate::header::{self, Header};
use crate::object::Object;

/// A non-owning observer of an [`Object`]'s payload.
///
/// ```
/// use anyarc::Object;
///
/// let o = Object::new(1_u32);
/// let w = o.downgrade();
/// assert!(!w.expired());
/// assert_eq!(w.upgrade().unwrap(), o);
/// drop(o);
/// assert!(w.expired());
/// assert!(w.upgrade().is_none());
/// ```
pub struct WeakObject {
    ptr: Option<NonNull<Header>>,
}

unsafe impl Send for WeakObject {}
unsafe impl Sync for WeakObject {}

impl WeakObject {
    /// A weak handle observing nothing; always expired.
    pub const fn null() -> Self {
        WeakObject { ptr: None }
    }

    /// Observe `object`'s payload (weak increment; no strong traffic).
    pub fn new(object: &Object) -> Self {
        if let Some(h) = object.header() {
            unsafe { header::addref_weak(h) };
        }
        WeakObject {
            ptr: object.header(),
        }
    }

    /// Whether the observed payload has been destroyed (or nothing was ever
    /// observed).
    pub fn expired(&self) -> bool {
        match self.ptr {
            Some(h) => unsafe { h.as_ref() }.strong_count() == 0,
            None => true,
        }
    }

    /// Promote to a strong handle; `None` once the payload is gone.
    ///
    /// Succeeds exactly when the strong count can be raised from a non-zero
    /// value, so a successful upgrade is never racing the destructor.
    pub fn upgrade(&self) -> Option<Object> {
        let h = self.ptr?;
        if unsafe { header::upgrade(h) } {
            Some(unsafe { Object::from_header(Some(h)) })
        } else {
            None
        }
    }

    /// Promote to a strong handle, reporting expiry.
    pub fn require(&self) -> Result<Object, ObjectError> {
        self.upgrade().ok_or(ObjectError::Expired)
    }

    /// Block until the strong count reaches zero. Returns immediately for
    /// an expired (or null) handle.
    ///
    /// The wakeup for parked waiters is posted by the strong release path
    /// after the payload destructor finishes.
    pub fn wait_until_dropped(&self) {
        if let Some(h) = self.ptr {
            unsafe { header::wait_strong_dropped(h) };
        }
    }
}

impl Default for WeakObject {
    fn default() -> Self {
        WeakObject::null()
    }
}

impl Clone for WeakObject {
    fn clone(&self) -> Self {
        if let Some(h) = self.ptr {
            unsafe { header::addref_weak(h) };
        }
        WeakObject { ptr: self.ptr }
    }
}

impl Drop for WeakObject {
    fn drop(&mut self) {
        if let Some(h) = self.ptr.take() {
            unsafe { header::release_weak(h) };
        }
    }
}

impl std::fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakObject")
            .field("expired", &self.expired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_null_weak() {
        let w = WeakObject::null();
        assert!(w.expired());
        assert!(w.upgrade().is_none());
        assert_eq!(w.require().unwrap_err(), ObjectError::Expired);
        w.wait_until_dropped(); // must not block
    }

    #[test]
    fn test_weak_roundtrip() {
        let o = Object::new(3_u16);
        let w = o.downgrade();
        assert_eq!(o.weak_count(), 2);
        assert!(!w.expired());
        assert_eq!(w.upgrade().unwrap(), o);

        drop(o);
        assert!(w.expired());
        assert!(w.upgrade().is_none());
    }

    #[test]
    fn test_allocation_survives_payload() {
        struct Flagged(std::sync::Arc<AtomicBool>);
        impl Drop for Flagged {
            fn drop(&mut self) {
                self.0.store(true, Ordering::Relaxed);
            }
        }

        let dropped = std::sync::Arc::new(AtomicBool::new(false));
        let o = Object::new(Flagged(dropped.clone()));
        let w = o.downgrade();
        let w2 = w.clone();
        drop(o);
        // Payload destroyed, allocation still addressable through the weaks.
        assert!(dropped.load(Ordering::Relaxed));
        assert!(w.expired());
        drop(w);
        assert!(w2.expired());
    }

    #[test]
    fn test_wait_until_dropped() {
        let o = Object::new(String::from("going away"));
        let w = o.downgrade();

        let waiter = thread::spawn(move || {
            w.wait_until_dropped();
            assert!(w.expired());
        });

        // Give the waiter a moment to actually park.
        thread::sleep(std::time::Duration::from_millis(50));
        drop(o);
        waiter.join().unwrap();
    }
}
