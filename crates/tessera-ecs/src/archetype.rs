//! Dense, column-oriented archetype tables.
//!
//! An [`Archetype`] stores every entity that has the exact same set of
//! components. Storage is one [`Column`] of raw bytes per component, all
//! columns sharing a common row index, so iteration over one component is a
//! linear walk of one buffer. Rows are kept dense with swap-remove; row
//! order is not stable across removals.
//!
//! Columns are identified by [`NameId`] and kept sorted ascending by name,
//! which makes an archetype's identity a function of its component *set*
//! only. Every archetype carries the reserved `id` column ([`NameId::ID`])
//! holding the [`EntityId`] of each row.

use bytemuck::Pod;

use crate::entity::EntityId;
use crate::mem::{AllocError, RawBuffer};
use crate::name::{NameId, NameTable};

// ---------------------------------------------------------------------------
// ColumnMeta
// ---------------------------------------------------------------------------

/// Layout and identity of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Interned component name; defines column order.
    pub name: NameId,
    /// Opaque identity of the stored type, checked in debug builds only.
    /// Zero means "unchecked".
    pub type_id: u32,
    /// Element size in bytes. Zero-sized components are tracked for
    /// membership but allocate no storage.
    pub size: u32,
    /// Element alignment.
    pub align: u16,
}

impl ColumnMeta {
    /// Describe a column from explicit layout values.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a nonzero power of two, or if a nonzero
    /// `size` is not a multiple of `align` (elements are stored at stride
    /// `size`).
    pub fn new(name: NameId, type_id: u32, size: u32, align: u16) -> Self {
        assert!(
            align != 0 && align.is_power_of_two(),
            "component {name:?}: alignment {align} must be a nonzero power of two"
        );
        assert!(
            size == 0 || size % align as u32 == 0,
            "component {name:?}: size {size} must be a multiple of alignment {align}"
        );
        Self {
            name,
            type_id,
            size,
            align,
        }
    }

    /// Describe a column holding values of type `T`.
    pub fn of<T: Pod>(name: NameId) -> Self {
        let size = u32::try_from(std::mem::size_of::<T>()).expect("component too large");
        let align = u16::try_from(std::mem::align_of::<T>()).expect("component over-aligned");
        Self::new(name, type_id_of::<T>(), size, align)
    }

    /// The meta of the reserved `id` column present in every archetype.
    pub(crate) fn id_column() -> Self {
        Self::of::<EntityId>(NameId::ID)
    }
}

/// Debug-only type identity: a 32-bit digest of `std::any::TypeId`.
/// Never zero (zero is the "unchecked" sentinel).
pub(crate) fn type_id_of<T: 'static>() -> u32 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::any::TypeId::of::<T>().hash(&mut hasher);
    let digest = hasher.finish() as u32;
    if digest == 0 {
        1
    } else {
        digest
    }
}

// ---------------------------------------------------------------------------
// Column
// ---------------------------------------------------------------------------

/// One component's contiguous value array within an archetype.
///
/// Length and capacity live on the owning [`Archetype`]; all columns of an
/// archetype are equally long.
#[derive(Debug)]
pub struct Column {
    meta: ColumnMeta,
    data: RawBuffer,
}

impl Column {
    fn new(meta: ColumnMeta) -> Self {
        Self {
            meta,
            data: RawBuffer::new(meta.align as usize),
        }
    }

    /// The column's layout and identity.
    #[inline]
    pub fn meta(&self) -> &ColumnMeta {
        &self.meta
    }

    /// The component name this column stores.
    #[inline]
    pub fn name(&self) -> NameId {
        self.meta.name
    }

    /// Bytes of the element at `row`. Empty for zero-sized components.
    #[inline]
    fn bytes_at(&self, row: u32) -> &[u8] {
        let size = self.meta.size as usize;
        if size == 0 {
            return &[];
        }
        &self.data.as_slice()[row as usize * size..][..size]
    }

    /// Overwrite the element at `row`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` does not match the column's element size.
    fn write_at(&mut self, row: u32, bytes: &[u8]) {
        let size = self.meta.size as usize;
        assert_eq!(
            bytes.len(),
            size,
            "component {:?}: value is {} bytes, column stores {} bytes",
            self.meta.name,
            bytes.len(),
            size
        );
        if size == 0 {
            return;
        }
        self.data.as_mut_slice()[row as usize * size..][..size].copy_from_slice(bytes);
    }

    /// Copy the element at `src` over the element at `dst`.
    fn copy_row_within(&mut self, src: u32, dst: u32) {
        let size = self.meta.size as usize;
        if size == 0 || src == dst {
            return;
        }
        self.data
            .as_mut_slice()
            .copy_within(src as usize * size..(src as usize + 1) * size, dst as usize * size);
    }

    /// Grow backing storage to hold `rows` elements.
    fn grow_to_rows(&mut self, rows: u32) -> Result<(), AllocError> {
        let size = self.meta.size as usize;
        if size == 0 {
            return Ok(());
        }
        let bytes = (rows as usize)
            .checked_mul(size)
            .ok_or(AllocError { bytes: usize::MAX })?;
        self.data.grow_to(bytes)
    }

    /// The initialized prefix covering `len` rows.
    #[inline]
    fn live_bytes(&self, len: u32) -> &[u8] {
        &self.data.as_slice()[..len as usize * self.meta.size as usize]
    }

    /// Debug-mode type identity check. Zero on either side disables it.
    #[inline]
    pub(crate) fn debug_check_type(&self, expected: u32) {
        debug_assert!(
            self.meta.type_id == 0 || expected == 0 || self.meta.type_id == expected,
            "component {:?}: stored type does not match accessed type",
            self.meta.name
        );
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// A dense table of all entities sharing one exact component set.
#[derive(Debug)]
pub struct Archetype {
    /// Sorted ascending by name, unique. Always includes the `id` column.
    columns: Vec<Column>,
    /// Live row count, identical across columns.
    len: u32,
    /// Allocated row count, identical across columns. Never shrinks.
    capacity: u32,
    /// Order-independent hash of the component-name set.
    hash: u64,
    /// Next node in the same hash bucket, if any (see the archetype tree's
    /// bucket table).
    pub(crate) next: Option<u32>,
}

impl Archetype {
    /// Build an empty table for the given column set.
    ///
    /// # Panics
    ///
    /// Panics unless `metas` starts with the reserved `id` column and is
    /// strictly ascending by name (which also implies uniqueness).
    pub(crate) fn new(metas: Vec<ColumnMeta>) -> Self {
        assert!(
            metas.first().map(|m| m.name) == Some(NameId::ID),
            "every archetype must start with the reserved id column"
        );
        assert!(
            metas.windows(2).all(|w| w[0].name < w[1].name),
            "archetype columns must be strictly ascending by name"
        );
        let hash = set_hash(metas.iter().map(|m| m.name));
        Self {
            columns: metas.into_iter().map(Column::new).collect(),
            len: 0,
            capacity: 0,
            hash,
            next: None,
        }
    }

    /// Live row count.
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the table holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated row count.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Order-independent hash of the component-name set.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The columns, sorted ascending by name.
    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Component names in ascending order.
    pub fn component_names(&self) -> impl Iterator<Item = NameId> + '_ {
        self.columns.iter().map(|c| c.meta.name)
    }

    fn column_pos(&self, name: NameId) -> Option<usize> {
        // Linear scan; column counts are small.
        self.columns.iter().position(|c| c.meta.name == name)
    }

    /// Whether a column for `name` exists.
    #[inline]
    pub fn has_component(&self, name: NameId) -> bool {
        self.column_pos(name).is_some()
    }

    /// Whether columns exist for every name in `names`.
    pub fn has_components(&self, names: &[NameId]) -> bool {
        names.iter().all(|&n| self.has_component(n))
    }

    /// Look up a column by component name.
    pub fn column_by_name(&self, name: NameId) -> Option<&Column> {
        self.column_pos(name).map(|i| &self.columns[i])
    }

    /// Debug-mode check that the caller's type identity matches the stored
    /// column's. No-op when the column does not exist.
    #[inline]
    pub(crate) fn debug_check_type(&self, name: NameId, expected: u32) {
        if let Some(column) = self.column_by_name(name) {
            column.debug_check_type(expected);
        }
    }

    /// Whether this archetype's component set is exactly `names`
    /// (ascending, including the `id` column).
    pub(crate) fn names_match(&self, names: &[NameId]) -> bool {
        self.columns.len() == names.len()
            && self.columns.iter().zip(names).all(|(c, &n)| c.meta.name == n)
    }

    // -- capacity -----------------------------------------------------------

    /// Grow every column to hold at least `rows` rows. Never shrinks.
    pub fn ensure_total_capacity(&mut self, rows: u32) -> Result<(), AllocError> {
        if rows <= self.capacity {
            return Ok(());
        }
        for column in &mut self.columns {
            column.grow_to_rows(rows)?;
        }
        self.capacity = rows;
        Ok(())
    }

    /// Make room for one more row, growing geometrically when full.
    fn reserve_one(&mut self) -> Result<(), AllocError> {
        if self.len < self.capacity {
            return Ok(());
        }
        let grown = self
            .capacity
            .saturating_add(self.capacity / 2)
            .saturating_add(8);
        self.ensure_total_capacity(grown)
    }

    // -- row mutation -------------------------------------------------------

    /// Reserve one uninitialized row and return its index.
    ///
    /// The new row's contents are unspecified until written; callers must
    /// fill every column before reading it back.
    pub fn append_undefined(&mut self) -> Result<u32, AllocError> {
        self.reserve_one()?;
        let row = self.len;
        self.len += 1;
        Ok(row)
    }

    /// Append a full row. `values` must provide one `(name, bytes)` pair per
    /// column, in column order. Returns the new row's index.
    ///
    /// # Panics
    ///
    /// Panics if the value count, a name, or a value size does not match the
    /// columns.
    pub fn append_row(&mut self, values: &[(NameId, &[u8])]) -> Result<u32, AllocError> {
        assert_eq!(
            values.len(),
            self.columns.len(),
            "append_row requires exactly one value per column"
        );
        self.reserve_one()?;
        let row = self.len;
        self.len += 1;
        for (i, (name, bytes)) in values.iter().enumerate() {
            assert_eq!(
                self.columns[i].meta.name, *name,
                "append_row values must be in column order"
            );
            self.columns[i].write_at(row, bytes);
        }
        Ok(row)
    }

    /// Overwrite the value of component `name` at `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds, the column does not exist, or the
    /// value size does not match the column.
    pub fn set_raw(&mut self, row: u32, name: NameId, bytes: &[u8]) {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        let pos = self
            .column_pos(name)
            .unwrap_or_else(|| panic!("archetype has no column for component {name:?}"));
        self.columns[pos].write_at(row, bytes);
    }

    /// Read the value of component `name` at `row`, or `None` if this
    /// archetype has no such column.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    pub fn get_raw(&self, row: u32, name: NameId) -> Option<&[u8]> {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        self.column_by_name(name).map(|c| c.bytes_at(row))
    }

    /// Typed read of component `name` at `row`. Checks the stored type
    /// identity in debug builds.
    pub fn get_at<T: Pod>(&self, row: u32, name: NameId) -> Option<&T> {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        let column = self.column_by_name(name)?;
        column.debug_check_type(type_id_of::<T>());
        Some(bytemuck::from_bytes(column.bytes_at(row)))
    }

    /// Typed view of a whole column, covering all live rows.
    ///
    /// Returns `None` for a missing column and for zero-sized components
    /// (which have no storage to view).
    pub fn column_slice<T: Pod>(&self, name: NameId) -> Option<&[T]> {
        let column = self.column_by_name(name)?;
        if column.meta.size == 0 {
            return None;
        }
        assert_eq!(
            std::mem::size_of::<T>(),
            column.meta.size as usize,
            "component {name:?}: slice element size does not match column size"
        );
        column.debug_check_type(type_id_of::<T>());
        Some(bytemuck::cast_slice(column.live_bytes(self.len)))
    }

    /// The entity ids of all live rows (the `id` column).
    pub fn entities(&self) -> &[EntityId] {
        self.column_slice::<EntityId>(NameId::ID)
            .expect("every archetype has an id column")
    }

    /// The entity stored at `row`.
    pub fn entity_at(&self, row: u32) -> EntityId {
        self.entities()[row as usize]
    }

    /// Swap-remove the row at `row`, keeping storage dense.
    ///
    /// Returns the entity that was relocated into `row` (the former last
    /// row), or `None` if the removed row was the last one. Callers use the
    /// returned id to patch that entity's directory entry.
    pub fn remove(&mut self, row: u32) -> Option<EntityId> {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        let last = self.len - 1;
        for column in &mut self.columns {
            column.copy_row_within(last, row);
        }
        self.len = last;
        if row < last {
            Some(self.entity_at(row))
        } else {
            None
        }
    }

    /// Copy of the full row at `row` as `(name, bytes)` pairs in column
    /// order. Used as scratch during entity migration.
    pub(crate) fn read_row(&self, row: u32) -> Vec<(NameId, Vec<u8>)> {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        self.columns
            .iter()
            .map(|c| (c.meta.name, c.bytes_at(row).to_vec()))
            .collect()
    }

    /// Human-readable component list, e.g. `[id, location, rotation]`.
    /// Diagnostics only.
    pub fn describe(&self, names: &NameTable) -> String {
        let parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| match names.resolve(c.meta.name) {
                Some(s) => s.to_owned(),
                None => format!("{}", c.meta.name),
            })
            .collect();
        format!("[{}]", parts.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Component-set hashing
// ---------------------------------------------------------------------------

/// Order-independent 64-bit hash of a component-name set.
///
/// XOR of a per-name mix; valid because names within a set are unique.
pub(crate) fn set_hash<I: IntoIterator<Item = NameId>>(names: I) -> u64 {
    names
        .into_iter()
        .fold(0, |acc, n| acc ^ splitmix64(n.to_raw() as u64 + 1))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
