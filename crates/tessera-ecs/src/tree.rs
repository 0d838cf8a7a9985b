//! The archetype tree: a canonical index from component set to archetype.
//!
//! Every node represents one order-normalized component set. A node's set is
//! the names along its parent chain up to the root, and children strictly
//! increase the name, so walking root-to-leaf yields the set in ascending
//! [`NameId`] order with no duplicates. That makes "this set plus one
//! component" and "this set minus one component" cheap pointer chases
//! instead of hash rebuilds, and guarantees that any insertion order for the
//! same set lands on the same node.
//!
//! Node 0 is the root: the base set `{id}`, its own parent, always
//! materialized. A node carries a materialized [`Archetype`] table only once
//! an entity has (or recently had) that exact set.
//!
//! A side table maps the order-independent set hash to the head of a chain
//! of materialized nodes (linked through [`Archetype::next`]) for exact-set
//! lookup.

use std::collections::HashMap;

use crate::archetype::{set_hash, Archetype};
use crate::name::NameId;

/// Index of the root node (component set `{id}`).
pub(crate) const ROOT: u32 = 0;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Node {
    /// The component this node adds to its parent's set.
    name: NameId,
    /// Parent index in the flat node array; the root is its own parent.
    parent: u32,
    /// Materialized table, present iff an entity has (or recently had) this
    /// exact set.
    archetype: Option<Archetype>,
}

// ---------------------------------------------------------------------------
// ArchetypeTree
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct ArchetypeTree {
    nodes: Vec<Node>,
    /// Component-set hash -> head node of the bucket chain. Only
    /// materialized nodes are bucketed; ties chain through `Archetype::next`.
    buckets: HashMap<u64, u32>,
}

impl ArchetypeTree {
    /// Create a tree holding only the materialized root archetype `{id}`.
    pub(crate) fn new(root_archetype: Archetype) -> Self {
        let mut tree = Self {
            nodes: vec![Node {
                name: NameId::ID,
                parent: ROOT,
                archetype: None,
            }],
            buckets: HashMap::new(),
        };
        tree.materialize(ROOT, root_archetype);
        tree
    }

    /// Number of nodes, including the root and unmaterialized nodes.
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes holding a materialized archetype.
    pub(crate) fn archetype_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.archetype.is_some()).count()
    }

    /// The materialized archetype at `idx`, if any.
    pub(crate) fn archetype(&self, idx: u32) -> Option<&Archetype> {
        self.nodes[idx as usize].archetype.as_ref()
    }

    /// Mutable access to the materialized archetype at `idx`.
    pub(crate) fn archetype_mut(&mut self, idx: u32) -> Option<&mut Archetype> {
        self.nodes[idx as usize].archetype.as_mut()
    }

    /// The component set of node `idx`, ascending (always starts with `id`).
    pub(crate) fn components_of(&self, idx: u32) -> Vec<NameId> {
        let mut names = Vec::new();
        let mut cur = idx;
        loop {
            names.push(self.nodes[cur as usize].name);
            if cur == ROOT {
                break;
            }
            cur = self.nodes[cur as usize].parent;
        }
        names.reverse();
        names
    }

    // -- set algebra --------------------------------------------------------

    /// Resolve the node for "`idx`'s set plus `name`".
    ///
    /// Walks the parent chain to the insertion point, then rebuilds the
    /// popped suffix below it through [`insert`](Self::insert), so shared
    /// prefixes are deduplicated and the resulting chain stays ascending.
    /// Adding a component already in the set (or the reserved `id`) returns
    /// `idx` unchanged.
    pub(crate) fn add(&mut self, idx: u32, name: NameId) -> u32 {
        if name == NameId::ID {
            return idx;
        }
        let mut popped: Vec<NameId> = Vec::new();
        let mut cur = idx;
        let pivot = loop {
            let n = self.nodes[cur as usize].name;
            if n == name {
                return idx;
            }
            if n < name {
                // Passed the insertion point; the walk ends at the root at
                // the latest, whose name (id, 0) is below everything.
                break cur;
            }
            popped.push(n);
            cur = self.nodes[cur as usize].parent;
        };
        let mut node = self.insert(pivot, name);
        for &n in popped.iter().rev() {
            node = self.insert(node, n);
        }
        node
    }

    /// Resolve the node for "`idx`'s set minus `name`".
    ///
    /// Removing an absent component or the reserved `id` is a no-op.
    pub(crate) fn remove(&mut self, idx: u32, name: NameId) -> u32 {
        if name == NameId::ID {
            return idx;
        }
        let mut popped: Vec<NameId> = Vec::new();
        let mut cur = idx;
        loop {
            let n = self.nodes[cur as usize].name;
            if n == name {
                break;
            }
            if n < name {
                return idx;
            }
            popped.push(n);
            cur = self.nodes[cur as usize].parent;
        }
        // Rebuild the popped suffix on top of the removed node's parent.
        let mut node = self.nodes[cur as usize].parent;
        for &n in popped.iter().rev() {
            node = self.insert(node, n);
        }
        node
    }

    /// Whether `name` is in node `idx`'s component set.
    ///
    /// Names decrease walking up the chain, so the walk stops early once the
    /// current name drops below the target.
    pub(crate) fn contains(&self, idx: u32, name: NameId) -> bool {
        if name == NameId::ID {
            return true;
        }
        let mut cur = idx;
        loop {
            let n = self.nodes[cur as usize].name;
            if n == name {
                return true;
            }
            if n < name {
                return false;
            }
            cur = self.nodes[cur as usize].parent;
        }
    }

    /// Find the existing child `(parent, name)` or append a new node.
    fn insert(&mut self, parent: u32, name: NameId) -> u32 {
        debug_assert_ne!(name, NameId::ID, "id is only ever the root's name");
        if let Some(existing) = self
            .nodes
            .iter()
            .position(|n| n.parent == parent && n.name == name)
        {
            return existing as u32;
        }
        self.nodes.push(Node {
            name,
            parent,
            archetype: None,
        });
        (self.nodes.len() - 1) as u32
    }

    // -- materialization & bucket table --------------------------------------

    /// Attach a freshly built table to node `idx` and register it in the
    /// hash bucket chain.
    pub(crate) fn materialize(&mut self, idx: u32, mut archetype: Archetype) {
        debug_assert!(
            archetype.names_match(&self.components_of(idx)),
            "archetype columns must match the node's component set"
        );
        let node = &mut self.nodes[idx as usize];
        assert!(node.archetype.is_none(), "node {idx} is already materialized");
        archetype.next = self.buckets.get(&archetype.hash()).copied();
        self.buckets.insert(archetype.hash(), idx);
        node.archetype = Some(archetype);
    }

    /// Exact-set lookup through the bucket table. `names` must be the
    /// canonical ascending set, including the `id` column.
    pub(crate) fn find_by_set(&self, names: &[NameId]) -> Option<u32> {
        let mut cur = *self.buckets.get(&set_hash(names.iter().copied()))?;
        loop {
            let archetype = self.nodes[cur as usize]
                .archetype
                .as_ref()
                .expect("bucketed nodes are materialized");
            if archetype.names_match(names) {
                return Some(cur);
            }
            cur = archetype.next?;
        }
    }

    // -- cache clearing -----------------------------------------------------

    /// Remove every node that is not the root, holds no live rows, and is
    /// not the parent of any surviving node. Removal can orphan previously
    /// protected parents, so the sweep repeats until a full pass removes
    /// nothing.
    ///
    /// Returns the old-index -> new-index map when any node was removed
    /// (`u32::MAX` marks removed nodes), or `None` when the tree is
    /// unchanged. Callers holding node indices (the entity directory) must
    /// remap them.
    pub(crate) fn clear_cache(&mut self) -> Option<Vec<u32>> {
        let n = self.nodes.len();
        let mut keep = vec![true; n];
        let mut child_count = vec![0u32; n];
        for (i, node) in self.nodes.iter().enumerate() {
            if i != ROOT as usize {
                child_count[node.parent as usize] += 1;
            }
        }

        // Fixed point: removing a leaf may orphan its parent.
        loop {
            let mut changed = false;
            for i in 1..n {
                let empty = self.nodes[i]
                    .archetype
                    .as_ref()
                    .map_or(true, |a| a.is_empty());
                if keep[i] && child_count[i] == 0 && empty {
                    keep[i] = false;
                    child_count[self.nodes[i].parent as usize] -= 1;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        if keep.iter().all(|&k| k) {
            return None;
        }

        // Compact the node array and patch parent links.
        let mut remap = vec![u32::MAX; n];
        let mut next_idx = 0u32;
        for (i, &k) in keep.iter().enumerate() {
            if k {
                remap[i] = next_idx;
                next_idx += 1;
            }
        }
        let old_nodes = std::mem::take(&mut self.nodes);
        self.nodes = old_nodes
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep[*i])
            .map(|(_, mut node)| {
                node.parent = remap[node.parent as usize];
                debug_assert_ne!(node.parent, u32::MAX, "kept node lost its parent");
                node
            })
            .collect();

        // Bucket heads and next links hold node indices; rebuild them.
        self.buckets.clear();
        for i in 0..self.nodes.len() {
            if let Some(archetype) = self.nodes[i].archetype.as_mut() {
                let hash = archetype.hash();
                archetype.next = self.buckets.get(&hash).copied();
                self.buckets.insert(hash, i as u32);
            }
        }

        Some(remap)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
