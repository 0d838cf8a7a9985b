//! Component name interning.
//!
//! Components are identified by [`NameId`] -- a stable 32-bit id produced by
//! interning the component's string name in a [`NameTable`]. The numeric
//! order of `NameId`s is what defines the canonical column order inside an
//! archetype, so ids must never change for the lifetime of a store.
//!
//! `NameId` 0 is reserved for the `"id"` pseudo-component that every entity
//! carries (the column holding the entity's own [`EntityId`](crate::entity::EntityId)).

use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// NameId
// ---------------------------------------------------------------------------

/// Stable identifier for an interned component name.
///
/// Ordered by numeric value; this order defines canonical column order
/// within an archetype and the parent-chain order in the archetype tree.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameId(u32);

impl NameId {
    /// The reserved id of the `"id"` pseudo-component.
    pub const ID: NameId = NameId(0);

    /// Raw `u32` representation.
    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }

    /// Reconstruct from a raw `u32`.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameId({})", self.0)
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// NameTable
// ---------------------------------------------------------------------------

/// Interns component names to stable [`NameId`]s.
///
/// Interning is idempotent: the same string always yields the same id.
/// `"id"` is pre-interned as [`NameId::ID`] on construction. Reverse lookup
/// via [`resolve`](Self::resolve) exists for diagnostics only; no core logic
/// depends on the string form of a name.
#[derive(Debug)]
pub struct NameTable {
    by_name: HashMap<String, NameId>,
    /// Indexed by `NameId`.
    names: Vec<String>,
}

impl NameTable {
    /// Create a table with the reserved `"id"` name pre-interned.
    pub fn new() -> Self {
        let mut table = Self {
            by_name: HashMap::new(),
            names: Vec::new(),
        };
        let id = table.intern("id");
        debug_assert_eq!(id, NameId::ID);
        table
    }

    /// Intern `name`, returning its stable id. Idempotent.
    pub fn intern(&mut self, name: &str) -> NameId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = NameId(self.names.len() as u32);
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), id);
        id
    }

    /// Look up an already-interned name without creating a new id.
    pub fn get(&self, name: &str) -> Option<NameId> {
        self.by_name.get(name).copied()
    }

    /// Resolve an id back to its string name. Diagnostics only.
    pub fn resolve(&self, id: NameId) -> Option<&str> {
        self.names.get(id.0 as usize).map(|s| s.as_str())
    }

    /// Number of interned names (including the reserved `"id"`).
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the table holds only the reserved name. Never truly empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
