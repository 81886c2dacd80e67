//! # Lineage Registry
//!
//! The runtime upcast facility behind [`Object::upcast_ref`]. A type that
//! embeds another type as a base view declares the projection with
//! [`Extends`] and records it once with [`register`]. Polymorphic casts then
//! resolve transitively: if `Derived` extends `Middle` and `Middle` extends
//! `Base`, a `Derived` payload upcasts to all three.
//!
//! The exact type always resolves to the payload itself, so types with no
//! declared lineage still upcast to themselves.
//!
//! ```
//! use anyarc::{lineage, Extends, Object};
//!
//! struct Base {
//!     id: u32,
//! }
//!
//! struct Derived {
//!     base: Base,
//! }
//!
//! impl Extends<Base> for Derived {
//!     fn as_base(&self) -> &Base {
//!         &self.base
//!     }
//! }
//!
//! lineage::register::<Derived, Base>();
//! let o = Object::new(Derived { base: Base { id: 22 } });
//! assert!(o.downcast_ref::<Base>().is_none()); // exact cast: no lineage
//! assert_eq!(o.upcast_ref::<Base>().unwrap().id, 22);
//! ```
//!
//! [`Object::upcast_ref`]: crate::Object::upcast_ref

use std::any::{self, Any, TypeId};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::OnceLock;

use log::debug;
use parking_lot::RwLock;

/// Declares that a `B` is embedded in `Self` and reachable by reference
/// projection.
///
/// The projection must return a reference into `self` (a field, or a field
/// of a field); the registry composes projections across levels, so only the
/// directly embedded base needs declaring at each level.
pub trait Extends<B: Any>: Any {
    /// Project the embedded base view.
    fn as_base(&self) -> &B;
}

struct Edge {
    base: TypeId,
    // Valid only for payloads whose dynamic type is the edge's source; the
    // resolver upholds this by tracking the tag alongside the pointer.
    project: unsafe fn(NonNull<()>) -> NonNull<()>,
}

static REGISTRY: OnceLock<RwLock<HashMap<TypeId, Vec<Edge>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<TypeId, Vec<Edge>>> {
    REGISTRY.get_or_init(Default::default)
}

/// Record the edge `D → B` in the global registry. Idempotent; safe to call
/// from multiple threads and multiple call sites.
pub fn register<D: Extends<B>, B: Any>() {
    unsafe fn project<D: Extends<B>, B: Any>(p: NonNull<()>) -> NonNull<()> {
        NonNull::from(unsafe { p.cast::<D>().as_ref() }.as_base()).cast()
    }

    let mut map = registry().write();
    let edges = map.entry(TypeId::of::<D>()).or_default();
    if edges.iter().any(|e| e.base == TypeId::of::<B>()) {
        return;
    }
    debug!(
        "lineage: {} -> {}",
        any::type_name::<D>(),
        any::type_name::<B>()
    );
    edges.push(Edge {
        base: TypeId::of::<B>(),
        project: project::<D, B>,
    });
}

/// Walk the registry from the payload's exact type toward `want`, composing
/// projections. Returns the adjusted payload pointer on success.
pub(crate) fn resolve(from: TypeId, payload: NonNull<()>, want: TypeId) -> Option<NonNull<()>> {
    if from == want {
        return Some(payload);
    }

    let map = registry().read();
    let mut stack = vec![(from, payload)];
    let mut seen: Vec<TypeId> = Vec::new();
    while let Some((tag, p)) = stack.pop() {
        if tag == want {
            return Some(p);
        }
        if seen.contains(&tag) {
            continue;
        }
        seen.push(tag);
        if let Some(edges) = map.get(&tag) {
            for edge in edges {
                stack.push((edge.base, unsafe { (edge.project)(p) }));
            }
        }
    }
    None
}
