//! Tessera ECS -- archetype-based component storage with name-keyed columns.
//!
//! Entities live in archetypes: dense, column-oriented tables, one per
//! distinct component set. Components are identified by interned names
//! ([`NameId`](name::NameId)), and an archetype tree resolves "this set plus
//! or minus one component" to the right table when a `set` or `remove`
//! changes an entity's shape. Values move as raw bytes, with a thin
//! [`bytemuck::Pod`]-bounded typed layer on top.
//!
//! # Quick start
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[repr(C)]
//! #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Location { x: f32, y: f32 }
//!
//! let mut store = EntityStore::new();
//! let location = store.register_component::<Location>("location");
//!
//! let e = store.new_entity().unwrap();
//! store.set_component(e, location, Location { x: 1.0, y: 2.0 }).unwrap();
//!
//! assert_eq!(
//!     store.get_component::<Location>(e, location).unwrap(),
//!     Some(&Location { x: 1.0, y: 2.0 }),
//! );
//!
//! for handle in store.query(QueryFilter::all([location])) {
//!     for (entity, loc) in handle.entities().iter().zip(handle.column::<Location>(location).unwrap()) {
//!         println!("{entity}: {loc:?}");
//!     }
//! }
//! ```
//!
//! # Invalidation
//!
//! Anything borrowed from the store (component references, query handles,
//! column slices) is valid only until the next mutating call: mutations may
//! grow column buffers or relocate rows. The borrow checker enforces this;
//! there is no runtime generation counter to check.

#![deny(unsafe_code)]

pub mod archetype;
pub mod entity;
#[allow(unsafe_code)]
pub(crate) mod mem;
pub mod name;
pub mod query;
pub mod store;
pub(crate) mod tree;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by store operations.
///
/// Only recoverable conditions are represented here; misuse (wrong value
/// size, writing the reserved `id` component, debug-mode type mismatches)
/// panics instead.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A column buffer allocation failed. The failed operation had no
    /// observable effect.
    #[error("out of memory: failed to allocate {bytes} bytes of column storage")]
    OutOfMemory {
        /// Size of the allocation that failed.
        bytes: usize,
    },

    /// The entity id is not present in this store's directory.
    #[error("entity {entity} does not exist in this store")]
    UnknownEntity {
        /// The offending id.
        entity: entity::EntityId,
    },

    /// A by-name operation referenced a component that was never registered.
    #[error("component '{name}' is not registered")]
    UnknownComponent {
        /// The unregistered component name.
        name: String,
    },

    /// A JSON value did not match the registered component's schema.
    #[error("failed to deserialize component '{name}': {details}")]
    ComponentDeserialization {
        /// The component name.
        name: String,
        /// The underlying serde error.
        details: String,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, Column, ColumnMeta};
    pub use crate::entity::EntityId;
    pub use crate::name::{NameId, NameTable};
    pub use crate::query::{ArchetypeHandle, QueryFilter, QueryIter};
    pub use crate::store::{EntityLocation, EntityStore};
    pub use crate::EcsError;
}
