//! # Error Types
//!
//! The failure taxonomy shared by every handle type in the crate.
//!
//! Ownership traffic (clone, drop, counter updates) is infallible and never
//! appears here. Pointer-style accessors return `Option`; the reference-style
//! accessors return `Result<_, ObjectError>` with one of the variants below.
//! Allocation failure is not wrapped: it goes straight through
//! [`std::alloc::handle_alloc_error`].

use thiserror::Error;

/// Errors reported by object handles.
///
/// Every failure is deterministic given the handle's recorded runtime type
/// and nullity; no operation retries internally and no operation leaves a
/// handle partially mutated after reporting an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ObjectError {
    /// A cast requested a type the holder does not store (or the handle was
    /// null when a non-null payload was required).
    #[error("cast to incompatible object type: expected `{expected}`, found `{found}`")]
    BadCast {
        /// Type name the caller asked for.
        expected: &'static str,
        /// Type name actually recorded in the holder, or `"<null>"`.
        found: &'static str,
    },

    /// A callable operation was attempted on an empty handle, or on a holder
    /// that is not callable with the requested signature.
    #[error("object is not callable with the requested signature")]
    NotCallable,

    /// Promotion of a weak handle whose referent has already been dropped.
    #[error("weak object refers to a dropped value")]
    Expired,

    /// Indexed access past the end of an array handle.
    #[error("index {index} out of bounds for array of length {len}")]
    OutOfRange {
        /// The offending index.
        index: usize,
        /// The array length at the time of access.
        len: usize,
    },
}
