//! Query primitive: iterate archetypes by required component set.
//!
//! [`EntityStore::query`] resolves which materialized archetypes contain all
//! of the requested components and yields one [`ArchetypeHandle`] per match.
//! A handle exposes the archetype's typed column slices; per-row iteration
//! is the caller's loop over those slices.
//!
//! Iteration order follows tree node indices, so it is stable within one
//! iteration as long as the store is not mutated. Handles and slices borrow
//! the store: any mutating call invalidates them, enforced by the borrow
//! checker.

use bytemuck::Pod;

use crate::archetype::{Archetype, ColumnMeta};
use crate::entity::EntityId;
use crate::name::NameId;
use crate::store::EntityStore;

// ---------------------------------------------------------------------------
// QueryFilter
// ---------------------------------------------------------------------------

/// Which archetypes a query matches. Currently a single `all` predicate:
/// every listed component must be present.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    all: Vec<NameId>,
}

impl QueryFilter {
    /// Match archetypes containing every name in `names`. The reserved `id`
    /// is implied and may be omitted.
    pub fn all<I: IntoIterator<Item = NameId>>(names: I) -> Self {
        let mut all: Vec<NameId> = names.into_iter().filter(|&n| n != NameId::ID).collect();
        all.sort();
        all.dedup();
        Self { all }
    }
}

// ---------------------------------------------------------------------------
// ArchetypeHandle
// ---------------------------------------------------------------------------

/// Borrowed view of one matching archetype.
///
/// All slices returned from a handle share the archetype's row index: row
/// `r` of every column belongs to the entity at `entities()[r]`.
#[derive(Clone, Copy)]
pub struct ArchetypeHandle<'s> {
    archetype: &'s Archetype,
    index: u32,
}

impl<'s> ArchetypeHandle<'s> {
    pub(crate) fn new(archetype: &'s Archetype, index: u32) -> Self {
        Self { archetype, index }
    }

    /// The archetype's node index in the tree.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of live rows.
    pub fn len(&self) -> u32 {
        self.archetype.len()
    }

    /// Whether the archetype holds no rows.
    pub fn is_empty(&self) -> bool {
        self.archetype.is_empty()
    }

    /// The entity ids of all rows.
    pub fn entities(&self) -> &'s [EntityId] {
        self.archetype.entities()
    }

    /// The entity at `row`.
    pub fn entity_at(&self, row: u32) -> EntityId {
        self.archetype.entity_at(row)
    }

    /// Typed view of one column across all rows. `None` for a missing
    /// column or a zero-sized component.
    pub fn column<T: Pod>(&self, name: NameId) -> Option<&'s [T]> {
        self.archetype.column_slice::<T>(name)
    }

    /// Raw bytes of one component at one row.
    pub fn get_raw(&self, row: u32, name: NameId) -> Option<&'s [u8]> {
        self.archetype.get_raw(row, name)
    }

    /// Whether the archetype has a column for `name`.
    pub fn has_component(&self, name: NameId) -> bool {
        self.archetype.has_component(name)
    }

    /// Column metadata in ascending name order.
    pub fn column_metas(&self) -> impl Iterator<Item = &'s ColumnMeta> + 's {
        self.archetype.columns().iter().map(|c| c.meta())
    }
}

impl std::fmt::Debug for ArchetypeHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchetypeHandle")
            .field("index", &self.index)
            .field("len", &self.archetype.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// QueryIter
// ---------------------------------------------------------------------------

/// Lazy, forward-only iterator over matching archetypes.
pub struct QueryIter<'s> {
    store: &'s EntityStore,
    filter: QueryFilter,
    cursor: u32,
}

impl<'s> Iterator for QueryIter<'s> {
    type Item = ArchetypeHandle<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.store.tree();
        while (self.cursor as usize) < tree.node_count() {
            let index = self.cursor;
            self.cursor += 1;
            if let Some(archetype) = tree.archetype(index) {
                if !archetype.is_empty() && archetype.has_components(&self.filter.all) {
                    return Some(ArchetypeHandle::new(archetype, index));
                }
            }
        }
        None
    }
}

impl EntityStore {
    /// Iterate the archetypes whose component set satisfies `filter`,
    /// skipping empty tables.
    pub fn query(&self, filter: QueryFilter) -> QueryIter<'_> {
        QueryIter {
            store: self,
            filter,
            cursor: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
