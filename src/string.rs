//! # String Handle
//!
//! [`StrObject`] is a pointer-sized handle into a NUL-terminated byte-array
//! holder: the handle stores only the payload address, and the control block
//! is recovered by subtracting the (deterministic, `#[repr(C)]`) payload
//! offset. That keeps `size_of::<StrObject>() == size_of::<*const u8>()`,
//! interoperates with C string APIs, and still carries the full
//! reference-counted lifetime.
//!
//! Comparisons are by pointer identity, like every other handle in the
//! crate — two equal-content strings in different holders are not equal.

use std::ffi::c_char;
use std::fmt;
use std::ptr::NonNull;

use crate::error::ObjectError;
use crate::header::{self, Header};
use crate::holder;
use crate::object::Object;
use crate::tag::TypeTag;

// `c_str()` must never return null; the empty handle points here.
static NUL: u8 = 0;

/// A reference-counted, NUL-terminated, immutable byte string in a single
/// pointer-sized handle.
///
/// ```
/// use anyarc::StrObject;
///
/// let s = StrObject::from_str("hello");
/// assert_eq!(s.len(), 5);
/// assert_eq!(s.as_bytes(), b"hello");
/// assert_eq!(s.to_str(), Ok("hello"));
/// assert_eq!(std::mem::size_of::<StrObject>(), std::mem::size_of::<*const u8>());
/// ```
pub struct StrObject {
    /// First byte of the holder's payload, or `None` for the empty handle.
    ptr: Option<NonNull<u8>>,
}

unsafe impl Send for StrObject {}
unsafe impl Sync for StrObject {}

impl StrObject {
    /// The empty handle.
    pub const fn null() -> Self {
        StrObject { ptr: None }
    }

    /// Copy `text` (plus a terminating NUL) into a fresh holder.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }

    /// Copy `bytes` (plus a terminating NUL) into a fresh holder. Interior
    /// NUL bytes are kept; only [`StrObject::c_str`] consumers will see the
    /// string truncated at the first of them.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let header = holder::alloc_array_with(bytes.len() + 1, |i| {
            if i < bytes.len() { bytes[i] } else { 0 }
        });
        unsafe { Self::adopt(header) }
    }

    /// `count` copies of `byte`, NUL-terminated.
    pub fn repeat(byte: u8, count: usize) -> Self {
        let header = holder::alloc_array_with(count + 1, |i| if i < count { byte } else { 0 });
        unsafe { Self::adopt(header) }
    }

    /// Adopt a generic handle whose holder is a byte array ending in NUL.
    /// Shares the handle on success; the argument is untouched on failure.
    pub fn from_object(object: &Object) -> Result<Self, ObjectError> {
        let bad = || ObjectError::BadCast {
            expected: "[u8] with trailing NUL",
            found: object.type_name().unwrap_or("<null>"),
        };
        if object.tag() != TypeTag::of::<[u8]>() {
            return Err(bad());
        }
        let header = object.header().ok_or_else(bad)?;
        unsafe {
            let (data, len) = holder::array_parts::<u8>(header);
            if len == 0 || *data.as_ptr().add(len - 1) != 0 {
                return Err(bad());
            }
        }
        // Take a share of the holder; the caller's handle is untouched.
        unsafe { header::addref(header) };
        Ok(unsafe { Self::adopt(header) })
    }

    /// Wrap a freshly owned array-holder header (one strong reference is
    /// transferred in).
    unsafe fn adopt(header: NonNull<Header>) -> Self {
        let (data, _) = unsafe { holder::array_parts::<u8>(header) };
        StrObject { ptr: Some(data) }
    }

    fn header(&self) -> Option<NonNull<Header>> {
        self.ptr.map(|p| unsafe {
            NonNull::new_unchecked(
                (p.as_ptr() as *mut u8).sub(holder::array_data_offset::<u8>()) as *mut Header,
            )
        })
    }

    /// Whether the handle is empty.
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Byte length excluding the terminator; zero for the empty handle.
    pub fn len(&self) -> usize {
        match self.header() {
            Some(h) => unsafe { holder::array_parts::<u8>(h).1 - 1 },
            None => 0,
        }
    }

    /// Whether the content is empty (null handle or zero-length string).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The content bytes, excluding the terminator.
    pub fn as_bytes(&self) -> &[u8] {
        match (self.ptr, self.len()) {
            (Some(p), len) => unsafe { std::slice::from_raw_parts(p.as_ptr(), len) },
            (None, _) => &[],
        }
    }

    /// The content bytes including the terminator.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        match self.ptr {
            Some(p) => unsafe { std::slice::from_raw_parts(p.as_ptr(), self.len() + 1) },
            None => std::slice::from_ref(&NUL),
        }
    }

    /// The content as UTF-8.
    pub fn to_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }

    /// A C-compatible pointer to the first byte. Never null: the empty
    /// handle yields a pointer to a static NUL.
    pub fn c_str(&self) -> *const c_char {
        match self.ptr {
            Some(p) => p.as_ptr() as *const c_char,
            None => &NUL as *const u8 as *const c_char,
        }
    }

    /// Iterate over the content bytes.
    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.as_bytes().iter().copied()
    }

    /// Share the holder as a generic handle.
    pub fn to_object(&self) -> Object {
        match self.header() {
            Some(h) => unsafe { Object::clone_header(h) },
            None => Object::null(),
        }
    }

    fn addr(&self) -> usize {
        self.ptr.map_or(0, |p| p.as_ptr() as usize)
    }
}

impl Default for StrObject {
    fn default() -> Self {
        StrObject::null()
    }
}

impl Clone for StrObject {
    fn clone(&self) -> Self {
        if let Some(h) = self.header() {
            unsafe { header::addref(h) };
        }
        StrObject { ptr: self.ptr }
    }
}

impl Drop for StrObject {
    fn drop(&mut self) {
        if let Some(h) = self.header() {
            drop(unsafe { Object::from_header(Some(h)) });
        }
    }
}

impl From<StrObject> for Object {
    fn from(s: StrObject) -> Object {
        let header = s.header();
        std::mem::forget(s);
        unsafe { Object::from_header(header) }
    }
}

impl PartialEq for StrObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for StrObject {}

impl PartialOrd for StrObject {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StrObject {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl std::hash::Hash for StrObject {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for StrObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("StrObject(null)")
        } else {
            write!(f, "StrObject({:?})", String::from_utf8_lossy(self.as_bytes()))
        }
    }
}
