//! Entity identifiers and allocation.
//!
//! An [`EntityId`] is an opaque 64-bit handle, unique within one
//! [`EntityStore`](crate::store::EntityStore). Ids are allocated from a
//! monotonic counter and are never reused for the lifetime of the store, so
//! a stale id simply stops resolving -- there is no generation tag to check.
//!
//! `EntityId` is `Pod` because every archetype stores the ids of its rows in
//! the reserved `id` column, byte for byte.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Opaque handle to an entity. Unique within a store, never reused.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Pod, Zeroable)]
pub struct EntityId(u64);

impl EntityId {
    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityIdAllocator
// ---------------------------------------------------------------------------

/// Hands out fresh [`EntityId`]s from a monotonic counter.
///
/// Ids start at 1 and are never recycled. Liveness is tracked by the store's
/// entity directory, not here.
#[derive(Debug)]
pub(crate) struct EntityIdAllocator {
    next: u64,
}

impl EntityIdAllocator {
    pub(crate) fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next id.
    pub(crate) fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next += 1;
        id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_unique_ids() {
        let mut alloc = EntityIdAllocator::new();
        let mut ids: Vec<u64> = (0..100).map(|_| alloc.allocate().to_raw()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn ids_are_monotonic() {
        let mut alloc = EntityIdAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert!(a.to_raw() < b.to_raw());
    }

    #[test]
    fn entity_id_roundtrip() {
        let id = EntityId::from_raw(42);
        assert_eq!(id.to_raw(), 42);
        assert_eq!(EntityId::from_raw(id.to_raw()), id);
    }
}
