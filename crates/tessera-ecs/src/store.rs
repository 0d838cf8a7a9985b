//! The [`EntityStore`] is the top-level container: it owns the name table,
//! the archetype tree (and through it every archetype table), the entity
//! directory, and the id allocator, and it implements the component
//! mutation protocol.
//!
//! # Migration
//!
//! Setting a component an entity does not yet have (or removing one it has)
//! moves the entity's row to the archetype for the new component set: the
//! tree resolves the target node, the target table is materialized on first
//! use, the row is copied over, and the old row is swap-removed with the
//! displaced entity's directory entry patched. The transition is atomic with
//! respect to allocation failure: every fallible allocation happens before
//! the first observable mutation, so an `OutOfMemory` error leaves the store
//! exactly as it was (at worst with an empty, reusable archetype table that
//! [`clear_cache`](EntityStore::clear_cache) can reclaim).
//!
//! # Borrowing
//!
//! Query handles and component references borrow the store. Any mutation may
//! grow column buffers or relocate rows, so everything handed out by `&self`
//! methods is invalidated by the next `&mut self` call -- which is exactly
//! what the borrow checker enforces.

use std::collections::HashMap;

use bytemuck::Pod;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::archetype::{Archetype, ColumnMeta};
use crate::entity::{EntityId, EntityIdAllocator};
use crate::mem::AllocError;
use crate::name::{NameId, NameTable};
use crate::query::ArchetypeHandle;
use crate::tree::{ArchetypeTree, ROOT};
use crate::EcsError;

fn oom(err: AllocError) -> EcsError {
    EcsError::OutOfMemory { bytes: err.bytes }
}

// ---------------------------------------------------------------------------
// EntityLocation
// ---------------------------------------------------------------------------

/// Where an entity lives: which archetype node and which row of its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    /// Index of the archetype node in the tree.
    pub archetype: u32,
    /// Row within that archetype's table.
    pub row: u32,
}

// ---------------------------------------------------------------------------
// Component registry (for the by-name JSON path)
// ---------------------------------------------------------------------------

/// Type-erased conversion from a JSON value to a component's raw bytes.
type DeserializeFn = Box<dyn Fn(&serde_json::Value) -> Result<Vec<u8>, String> + Send + Sync>;

struct RegisteredComponent {
    meta: ColumnMeta,
    deserialize: DeserializeFn,
}

/// Registry of components registered by string name, used by
/// [`EntityStore::set_component_json`]. The raw and typed component paths do
/// not require registration.
#[derive(Default)]
struct ComponentRegistry {
    entries: HashMap<NameId, RegisteredComponent>,
}

impl ComponentRegistry {
    fn register<T>(&mut self, name: NameId, display_name: &str) -> &RegisteredComponent
    where
        T: Pod + Serialize + DeserializeOwned,
    {
        let meta = ColumnMeta::of::<T>(name);
        let entry = self.entries.entry(name).or_insert_with(|| RegisteredComponent {
            meta,
            deserialize: Box::new(|value: &serde_json::Value| {
                let typed: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
                Ok(bytemuck::bytes_of(&typed).to_vec())
            }),
        });
        assert_eq!(
            entry.meta, meta,
            "component '{display_name}' re-registered with a different layout"
        );
        entry
    }

    fn get(&self, name: NameId) -> Option<&RegisteredComponent> {
        self.entries.get(&name)
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("count", &self.entries.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

/// Archetype-based component storage for entities.
///
/// See the [module docs](self) for the migration and borrowing contracts.
#[derive(Debug)]
pub struct EntityStore {
    names: NameTable,
    tree: ArchetypeTree,
    /// Entity id -> (archetype node, row). The `id` column of that row holds
    /// the same entity id.
    directory: HashMap<EntityId, EntityLocation>,
    allocator: EntityIdAllocator,
    registry: ComponentRegistry,
}

impl EntityStore {
    /// Create an empty store. The root archetype `{id}` is materialized up
    /// front; every fresh entity starts there.
    pub fn new() -> Self {
        Self {
            names: NameTable::new(),
            tree: ArchetypeTree::new(Archetype::new(vec![ColumnMeta::id_column()])),
            directory: HashMap::new(),
            allocator: EntityIdAllocator::new(),
            registry: ComponentRegistry::default(),
        }
    }

    /// The store's name table.
    pub fn names(&self) -> &NameTable {
        &self.names
    }

    /// Intern a component name. Idempotent shorthand for
    /// `store.names` interning.
    pub fn intern(&mut self, name: &str) -> NameId {
        self.names.intern(name)
    }

    /// Register component type `T` under `name` for the by-name JSON path
    /// ([`set_component_json`](Self::set_component_json)). Idempotent; panics
    /// if `name` was previously registered with a different layout.
    pub fn register_component<T>(&mut self, name: &str) -> NameId
    where
        T: Pod + Serialize + DeserializeOwned,
    {
        let id = self.names.intern(name);
        self.registry.register::<T>(id, name);
        id
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Create a new entity with no components (beyond the implicit `id`).
    pub fn new_entity(&mut self) -> Result<EntityId, EcsError> {
        let entity = self.allocator.allocate();
        let root = self
            .tree
            .archetype_mut(ROOT)
            .expect("root is always materialized");
        let row = root
            .append_row(&[(NameId::ID, bytemuck::bytes_of(&entity))])
            .map_err(oom)?;
        self.directory
            .insert(entity, EntityLocation { archetype: ROOT, row });
        Ok(entity)
    }

    /// Delete an entity and its row.
    pub fn delete_entity(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let loc = self
            .directory
            .remove(&entity)
            .ok_or(EcsError::UnknownEntity { entity })?;
        let archetype = self
            .tree
            .archetype_mut(loc.archetype)
            .expect("live entities point at materialized archetypes");
        if let Some(displaced) = archetype.remove(loc.row) {
            self.patch_displaced(displaced, loc.row);
        }
        Ok(())
    }

    /// Current location of a live entity.
    pub fn location(&self, entity: EntityId) -> Result<EntityLocation, EcsError> {
        self.directory
            .get(&entity)
            .copied()
            .ok_or(EcsError::UnknownEntity { entity })
    }

    // -- component access ---------------------------------------------------

    /// Set a component from raw bytes. `meta` supplies the column layout
    /// used if the component's column does not exist yet.
    ///
    /// Writes in place when the entity already has the component; otherwise
    /// migrates the entity to the archetype for its widened set.
    ///
    /// # Panics
    ///
    /// Panics on programmer errors: writing the reserved `id` component, or
    /// a byte length that contradicts `meta.size` (or an existing column's
    /// size).
    pub fn set_component_raw(
        &mut self,
        entity: EntityId,
        meta: ColumnMeta,
        bytes: &[u8],
    ) -> Result<(), EcsError> {
        assert_ne!(
            meta.name,
            NameId::ID,
            "the reserved id component cannot be written"
        );
        assert_eq!(
            bytes.len(),
            meta.size as usize,
            "component {:?}: value is {} bytes, declared size is {}",
            meta.name,
            bytes.len(),
            meta.size
        );
        let loc = self.location(entity)?;
        let current = self
            .tree
            .archetype(loc.archetype)
            .expect("live entities point at materialized archetypes");

        if current.has_component(meta.name) {
            let archetype = self.tree.archetype_mut(loc.archetype).expect("checked above");
            archetype.debug_check_type(meta.name, meta.type_id);
            archetype.set_raw(loc.row, meta.name, bytes);
            return Ok(());
        }

        // Migrate to the archetype for (current set + name).
        let target = self.tree.add(loc.archetype, meta.name);
        self.materialize_for_set(target, loc.archetype, Some(meta), None);

        // The append is the only fallible step; it happens before any
        // observable mutation so an OutOfMemory leaves the store untouched.
        let target_archetype = self.tree.archetype_mut(target).expect("just materialized");
        let new_row = target_archetype.append_undefined().map_err(oom)?;

        let scratch = self
            .tree
            .archetype(loc.archetype)
            .expect("still materialized")
            .read_row(loc.row);
        let target_archetype = self.tree.archetype_mut(target).expect("just materialized");
        for (name, value) in &scratch {
            target_archetype.set_raw(new_row, *name, value);
        }
        target_archetype.debug_check_type(meta.name, meta.type_id);
        target_archetype.set_raw(new_row, meta.name, bytes);

        self.finish_migration(entity, loc, target, new_row);
        Ok(())
    }

    /// Typed wrapper over [`set_component_raw`](Self::set_component_raw).
    pub fn set_component<T: Pod>(
        &mut self,
        entity: EntityId,
        name: NameId,
        value: T,
    ) -> Result<(), EcsError> {
        self.set_component_raw(entity, ColumnMeta::of::<T>(name), bytemuck::bytes_of(&value))
    }

    /// Set a component from a JSON value, by registered string name.
    ///
    /// This is the entry point a dispatch façade uses when component values
    /// arrive as data rather than as Rust types. The name must have been
    /// registered via [`register_component`](Self::register_component).
    pub fn set_component_json(
        &mut self,
        entity: EntityId,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<(), EcsError> {
        let unknown = || EcsError::UnknownComponent {
            name: name.to_owned(),
        };
        let id = self.names.get(name).ok_or_else(unknown)?;
        let (meta, bytes) = {
            let entry = self.registry.get(id).ok_or_else(unknown)?;
            let bytes =
                (entry.deserialize)(value).map_err(|details| EcsError::ComponentDeserialization {
                    name: name.to_owned(),
                    details,
                })?;
            (entry.meta, bytes)
        };
        self.set_component_raw(entity, meta, &bytes)
    }

    /// Read a component's raw bytes. `Ok(None)` when the entity does not
    /// have the component.
    pub fn get_component_raw(
        &self,
        entity: EntityId,
        name: NameId,
    ) -> Result<Option<&[u8]>, EcsError> {
        let loc = self.location(entity)?;
        let archetype = self
            .tree
            .archetype(loc.archetype)
            .expect("live entities point at materialized archetypes");
        Ok(archetype.get_raw(loc.row, name))
    }

    /// Typed component read. `Ok(None)` when the entity does not have the
    /// component.
    pub fn get_component<T: Pod>(
        &self,
        entity: EntityId,
        name: NameId,
    ) -> Result<Option<&T>, EcsError> {
        let loc = self.location(entity)?;
        let archetype = self
            .tree
            .archetype(loc.archetype)
            .expect("live entities point at materialized archetypes");
        Ok(archetype.get_at::<T>(loc.row, name))
    }

    /// Whether the entity currently has the component. Always true for the
    /// reserved `id`.
    pub fn has_component(&self, entity: EntityId, name: NameId) -> Result<bool, EcsError> {
        let loc = self.location(entity)?;
        // Walk the tree's parent chain rather than the archetype's columns;
        // a node's set and its table's columns are the same by construction.
        Ok(self.tree.contains(loc.archetype, name))
    }

    /// Remove a component, migrating the entity to the archetype for its
    /// narrowed set. Removing an absent component or the reserved `id` is a
    /// no-op.
    pub fn remove_component(&mut self, entity: EntityId, name: NameId) -> Result<(), EcsError> {
        if name == NameId::ID {
            return Ok(());
        }
        let loc = self.location(entity)?;
        let current = self
            .tree
            .archetype(loc.archetype)
            .expect("live entities point at materialized archetypes");
        if !current.has_component(name) {
            return Ok(());
        }

        let target = self.tree.remove(loc.archetype, name);
        self.materialize_for_set(target, loc.archetype, None, Some(name));

        let target_archetype = self.tree.archetype_mut(target).expect("just materialized");
        let new_row = target_archetype.append_undefined().map_err(oom)?;

        let scratch = self
            .tree
            .archetype(loc.archetype)
            .expect("still materialized")
            .read_row(loc.row);
        let target_archetype = self.tree.archetype_mut(target).expect("just materialized");
        for (column_name, value) in &scratch {
            if *column_name != name {
                target_archetype.set_raw(new_row, *column_name, value);
            }
        }

        self.finish_migration(entity, loc, target, new_row);
        Ok(())
    }

    // -- queries & introspection --------------------------------------------

    /// Exact-set archetype lookup through the tree's bucket table. The `id`
    /// component is implied; `names` need not include it.
    pub fn find_archetype(&self, names: &[NameId]) -> Option<ArchetypeHandle<'_>> {
        let mut set: Vec<NameId> = Vec::with_capacity(names.len() + 1);
        set.push(NameId::ID);
        set.extend_from_slice(names);
        set.sort();
        set.dedup();
        let index = self.tree.find_by_set(&set)?;
        Some(ArchetypeHandle::new(
            self.tree.archetype(index).expect("bucketed nodes are materialized"),
            index,
        ))
    }

    /// The materialized archetype at a node index, if any.
    pub fn archetype_at(&self, index: u32) -> Option<ArchetypeHandle<'_>> {
        if index as usize >= self.tree.node_count() {
            return None;
        }
        self.tree
            .archetype(index)
            .map(|archetype| ArchetypeHandle::new(archetype, index))
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.directory.len()
    }

    /// Number of materialized archetype tables.
    pub fn archetype_count(&self) -> usize {
        self.tree.archetype_count()
    }

    /// Number of archetype tree nodes, materialized or not.
    pub fn node_count(&self) -> usize {
        self.tree.node_count()
    }

    /// Drop archetype tree nodes (and their tables) that hold no rows and
    /// index nothing, repeating until nothing more can be removed. Tables
    /// with live rows and their ancestor nodes are always retained.
    pub fn clear_cache(&mut self) {
        if let Some(remap) = self.tree.clear_cache() {
            for loc in self.directory.values_mut() {
                loc.archetype = remap[loc.archetype as usize];
                debug_assert_ne!(loc.archetype, u32::MAX, "live entity in a removed node");
            }
            debug!(nodes = self.tree.node_count(), "cleared archetype cache");
        }
    }

    pub(crate) fn tree(&self) -> &ArchetypeTree {
        &self.tree
    }

    // -- internals ----------------------------------------------------------

    /// Materialize `target`'s table if needed, deriving column metadata from
    /// `source`'s columns plus `added` / minus `removed`.
    fn materialize_for_set(
        &mut self,
        target: u32,
        source: u32,
        added: Option<ColumnMeta>,
        removed: Option<NameId>,
    ) {
        if self.tree.archetype(target).is_some() {
            return;
        }
        let mut metas: Vec<ColumnMeta> = self
            .tree
            .archetype(source)
            .expect("source archetype is materialized")
            .columns()
            .iter()
            .map(|c| *c.meta())
            .collect();
        if let Some(meta) = added {
            let pos = metas.partition_point(|m| m.name < meta.name);
            metas.insert(pos, meta);
        }
        if let Some(name) = removed {
            metas.retain(|m| m.name != name);
        }
        let archetype = Archetype::new(metas);
        debug!(
            node = target,
            components = %archetype.describe(&self.names),
            "materialized archetype"
        );
        self.tree.materialize(target, archetype);
    }

    /// Swap-remove the migrated entity's old row, patch the displaced
    /// entity, and point the directory at the new location.
    fn finish_migration(
        &mut self,
        entity: EntityId,
        old: EntityLocation,
        target: u32,
        new_row: u32,
    ) {
        let old_archetype = self
            .tree
            .archetype_mut(old.archetype)
            .expect("still materialized");
        if let Some(displaced) = old_archetype.remove(old.row) {
            self.patch_displaced(displaced, old.row);
        }
        self.directory.insert(
            entity,
            EntityLocation {
                archetype: target,
                row: new_row,
            },
        );
    }

    fn patch_displaced(&mut self, displaced: EntityId, vacated_row: u32) {
        self.directory
            .get_mut(&displaced)
            .expect("displaced entity is in the directory")
            .row = vacated_row;
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::fail;

    fn store_with(names: &[&str]) -> (EntityStore, Vec<NameId>) {
        let mut store = EntityStore::new();
        let ids = names.iter().map(|&n| store.intern(n)).collect();
        (store, ids)
    }

    #[test]
    fn new_entity_lives_in_the_root_archetype() {
        let mut store = EntityStore::new();
        let e = store.new_entity().unwrap();
        let loc = store.location(e).unwrap();
        assert_eq!(loc.archetype, 0);
        assert_eq!(store.archetype_at(0).unwrap().entity_at(loc.row), e);
    }

    #[test]
    fn set_then_get_roundtrips() {
        let (mut store, names) = store_with(&["health"]);
        let e = store.new_entity().unwrap();
        store.set_component(e, names[0], 100u64).unwrap();
        assert_eq!(store.get_component::<u64>(e, names[0]).unwrap(), Some(&100));
        // Overwrite in place: same archetype, new value.
        let before = store.location(e).unwrap();
        store.set_component(e, names[0], 55u64).unwrap();
        assert_eq!(store.location(e).unwrap(), before);
        assert_eq!(store.get_component::<u64>(e, names[0]).unwrap(), Some(&55));
    }

    #[test]
    fn migration_patches_the_displaced_entity() {
        let (mut store, names) = store_with(&["a", "b"]);
        let e1 = store.new_entity().unwrap();
        let e2 = store.new_entity().unwrap();
        store.set_component(e1, names[0], 1u64).unwrap();
        store.set_component(e2, names[0], 2u64).unwrap();
        // e1 and e2 share {id,a}; migrating e1 out swap-removes its row and
        // relocates e2 within that table.
        store.set_component(e1, names[1], 10u64).unwrap();
        let loc2 = store.location(e2).unwrap();
        assert_eq!(
            store.archetype_at(loc2.archetype).unwrap().entity_at(loc2.row),
            e2
        );
        assert_eq!(store.get_component::<u64>(e2, names[0]).unwrap(), Some(&2));
        assert_eq!(store.get_component::<u64>(e1, names[0]).unwrap(), Some(&1));
        assert_eq!(store.get_component::<u64>(e1, names[1]).unwrap(), Some(&10));
    }

    #[test]
    fn unknown_entities_are_reported() {
        let mut store = EntityStore::new();
        let e = store.new_entity().unwrap();
        store.delete_entity(e).unwrap();
        let name = store.intern("a");
        assert!(matches!(
            store.delete_entity(e),
            Err(EcsError::UnknownEntity { .. })
        ));
        assert!(matches!(
            store.set_component(e, name, 1u64),
            Err(EcsError::UnknownEntity { .. })
        ));
        assert!(matches!(
            store.get_component::<u64>(e, name),
            Err(EcsError::UnknownEntity { .. })
        ));
        assert!(matches!(
            store.remove_component(e, name),
            Err(EcsError::UnknownEntity { .. })
        ));
        assert!(matches!(
            store.has_component(e, name),
            Err(EcsError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn remove_of_absent_component_is_a_noop() {
        let (mut store, names) = store_with(&["a", "b"]);
        let e = store.new_entity().unwrap();
        store.set_component(e, names[0], 1u64).unwrap();
        let before = store.location(e).unwrap();
        store.remove_component(e, names[1]).unwrap();
        assert_eq!(store.location(e).unwrap(), before);
        // Removing the reserved id is also a no-op.
        store.remove_component(e, NameId::ID).unwrap();
        assert!(store.has_component(e, NameId::ID).unwrap());
    }

    #[test]
    fn json_components_route_through_the_registry() {
        let mut store = EntityStore::new();
        let health = store.register_component::<u64>("health");
        let e = store.new_entity().unwrap();
        store
            .set_component_json(e, "health", &serde_json::json!(77))
            .unwrap();
        assert_eq!(store.get_component::<u64>(e, health).unwrap(), Some(&77));

        assert!(matches!(
            store.set_component_json(e, "mana", &serde_json::json!(1)),
            Err(EcsError::UnknownComponent { .. })
        ));
        assert!(matches!(
            store.set_component_json(e, "health", &serde_json::json!("not a number")),
            Err(EcsError::ComponentDeserialization { .. })
        ));
    }

    #[test]
    fn clear_cache_remaps_the_directory() {
        let (mut store, names) = store_with(&["a", "b"]);
        let e = store.new_entity().unwrap();
        // Build {id,b} first so its node index is below {id,a,b}, then leave
        // it empty by widening the set. Compaction then shifts indices.
        store.set_component(e, names[1], 5u64).unwrap();
        store.set_component(e, names[0], 6u64).unwrap();
        let nodes_before = store.node_count();
        store.clear_cache();
        assert!(store.node_count() < nodes_before);
        assert_eq!(store.get_component::<u64>(e, names[0]).unwrap(), Some(&6));
        assert_eq!(store.get_component::<u64>(e, names[1]).unwrap(), Some(&5));
        let loc = store.location(e).unwrap();
        assert_eq!(
            store.archetype_at(loc.archetype).unwrap().entity_at(loc.row),
            e
        );
    }

    #[test]
    #[should_panic(expected = "reserved id component")]
    fn writing_the_id_component_panics() {
        let mut store = EntityStore::new();
        let e = store.new_entity().unwrap();
        let _ = store.set_component(e, NameId::ID, 7u64);
    }

    #[test]
    #[should_panic(expected = "different layout")]
    fn conflicting_registration_panics() {
        let mut store = EntityStore::new();
        store.register_component::<u64>("health");
        store.register_component::<u32>("health");
    }

    // -- out-of-memory atomicity ---------------------------------------------

    #[test]
    fn failed_allocation_leaves_the_store_untouched() {
        fail::reset();
        let (mut store, names) = store_with(&["a", "b"]);
        let e1 = store.new_entity().unwrap();
        let e2 = store.new_entity().unwrap();
        store.set_component(e1, names[0], 10u64).unwrap();
        store.set_component(e2, names[0], 20u64).unwrap();

        // Migrating e1 to {id,a,b} materializes a new table and grows its
        // column buffers. Fail each allocation in turn until the operation
        // goes through; every failure must leave no observable change.
        for attempt in 1u64.. {
            fail::fail_on(attempt);
            match store.set_component(e1, names[1], 30u64) {
                Err(EcsError::OutOfMemory { .. }) => {
                    assert_eq!(store.get_component::<u64>(e1, names[0]).unwrap(), Some(&10));
                    assert_eq!(store.get_component::<u64>(e2, names[0]).unwrap(), Some(&20));
                    assert_eq!(store.get_component::<u64>(e1, names[1]).unwrap(), None);
                    assert!(!store.has_component(e1, names[1]).unwrap());
                    assert_eq!(store.entity_count(), 2);
                }
                Ok(()) => break,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        fail::reset();

        assert_eq!(store.get_component::<u64>(e1, names[0]).unwrap(), Some(&10));
        assert_eq!(store.get_component::<u64>(e1, names[1]).unwrap(), Some(&30));
        assert_eq!(store.get_component::<u64>(e2, names[0]).unwrap(), Some(&20));
    }

    #[test]
    fn failed_new_entity_reports_out_of_memory() {
        fail::reset();
        let mut store = EntityStore::new();
        fail::fail_on(1);
        assert!(matches!(
            store.new_entity(),
            Err(EcsError::OutOfMemory { .. })
        ));
        fail::reset();
        assert_eq!(store.entity_count(), 0);
        // The store recovers on the next attempt.
        let e = store.new_entity().unwrap();
        assert_eq!(store.location(e).unwrap().archetype, 0);
    }
}
