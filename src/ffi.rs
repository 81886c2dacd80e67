//! # C-ABI Handle Hooks
//!
//! The two callbacks a C-side plain-data tagged value invokes when it copies
//! or clears an embedded opaque handle. The handle's C identity is the raw
//! control-block pointer produced by [`Object::into_raw`]; a C value that
//! embeds one of these pointers calls `anyarc_handle_copy` when the value is
//! copied and `anyarc_handle_clear` when it is cleared, and ownership stays
//! balanced.
//!
//! The tagged-value type itself lives on the C side; only the hooks cross
//! the boundary.

use std::ffi::c_void;

use crate::object::Object;

/// Duplicate ownership of a detached handle pointer: the strong count is
/// incremented and the same pointer is returned. Null in, null out.
///
/// # Safety
///
/// `handle` must be null or a pointer obtained from [`Object::into_raw`]
/// (equivalently, a pointer previously returned by this function) whose
/// detached reference has not been cleared yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyarc_handle_copy(handle: *mut c_void) -> *mut c_void {
    if handle.is_null() {
        return std::ptr::null_mut();
    }
    let copy = unsafe { Object::clone_raw(handle as *const ()) };
    copy.into_raw() as *mut c_void
}

/// Release one ownership unit of a detached handle pointer. Null is a
/// no-op.
///
/// # Safety
///
/// `handle` must be null or a pointer carrying a detached strong reference
/// (from [`Object::into_raw`] or [`anyarc_handle_copy`]); that reference is
/// consumed and must not be cleared again.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn anyarc_handle_clear(handle: *mut c_void) {
    if handle.is_null() {
        return;
    }
    drop(unsafe { Object::from_raw(handle as *const ()) });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_and_clear_balance() {
        let o = Object::new(77_i32);
        let raw = o.clone().into_raw() as *mut c_void;
        assert_eq!(o.strong_count(), 2);

        let dup = unsafe { anyarc_handle_copy(raw) };
        assert_eq!(dup, raw); // same control block, new reference
        assert_eq!(o.strong_count(), 3);

        unsafe { anyarc_handle_clear(dup) };
        assert_eq!(o.strong_count(), 2);
        unsafe { anyarc_handle_clear(raw) };
        assert_eq!(o.strong_count(), 1);
    }

    #[test]
    fn test_null_handles() {
        assert!(unsafe { anyarc_handle_copy(std::ptr::null_mut()) }.is_null());
        unsafe { anyarc_handle_clear(std::ptr::null_mut()) };
    }
}
