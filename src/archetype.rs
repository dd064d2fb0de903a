// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Archetype (table) storage: columnar storage for every entity sharing one
//! family.

use rustc_hash::FxHashMap;

use crate::component::ComponentDescriptor;
use crate::entity::Entity;
use crate::family::{FamilyComponents, FamilyId};
use crate::utils::align_to;

/// A single component's column: a type-erased, contiguous byte buffer with
/// one `item_size`-byte slot per row.
pub struct Column {
    data: Vec<u8>,
    item_size: usize,
}

impl Column {
    pub fn new(descriptor: ComponentDescriptor) -> Self {
        // Pad the slot size to the component's alignment so successive rows
        // land at aligned offsets even though the backing `Vec<u8>` itself is
        // only byte-aligned.
        let item_size = align_to(descriptor.size.max(1), descriptor.align.max(1));
        Self {
            data: Vec::new(),
            item_size,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.item_size
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grow the column by one zero-initialised slot.
    pub fn push_default(&mut self) {
        self.data.resize(self.data.len() + self.item_size, 0);
    }

    pub fn slice(&self, row: usize) -> &[u8] {
        let off = row * self.item_size;
        &self.data[off..off + self.item_size]
    }

    pub fn slice_mut(&mut self, row: usize) -> &mut [u8] {
        let off = row * self.item_size;
        &mut self.data[off..off + self.item_size]
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Raw pointer to row `row`'s storage, bypassing the borrow checker.
    ///
    /// Used by the system dispatcher to hand out column pointers that
    /// outlive the short-lived `&Table` borrow used to compute them (see
    /// `Cursor`). Valid only for as long as the table isn't restructured —
    /// the dispatcher upholds that by never merging mid-dispatch.
    pub fn raw_ptr(&self, row: usize) -> *mut u8 {
        let off = row * self.item_size;
        self.data.as_ptr().wrapping_add(off) as *mut u8
    }

    pub fn set(&mut self, row: usize, bytes: &[u8]) {
        let slot = self.slice_mut(row);
        let n = slot.len().min(bytes.len());
        slot[..n].copy_from_slice(&bytes[..n]);
    }

    /// Swap-remove row `row`, shrinking the column by one.
    pub fn swap_remove(&mut self, row: usize) {
        let last = self.len() - 1;
        if row != last {
            let (head, tail) = self.data.split_at_mut(last * self.item_size);
            head[row * self.item_size..row * self.item_size + self.item_size]
                .copy_from_slice(&tail[..self.item_size]);
        }
        self.data.truncate(last * self.item_size);
    }
}

/// Columnar storage for all entities whose component set equals one family.
pub struct Table {
    family_id: FamilyId,
    /// Canonical (ascending-handle) component order; `columns[i]` holds
    /// `components[i]`'s data.
    components: FamilyComponents,
    column_of: FxHashMap<Entity, usize>,
    columns: Vec<Column>,
    entities: Vec<Entity>,
}

impl Table {
    pub fn new(
        family_id: FamilyId,
        components: FamilyComponents,
        descriptor_of: impl Fn(Entity) -> ComponentDescriptor,
    ) -> Self {
        let mut columns = Vec::with_capacity(components.len());
        let mut column_of = FxHashMap::default();
        for (i, &c) in components.iter().enumerate() {
            columns.push(Column::new(descriptor_of(c)));
            column_of.insert(c, i);
        }
        Self {
            family_id,
            components,
            column_of,
            columns,
            entities: Vec::new(),
        }
    }

    pub fn family_id(&self) -> FamilyId {
        self.family_id
    }

    pub fn components(&self) -> &[Entity] {
        &self.components
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn row_count(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn column_index(&self, component: Entity) -> Option<usize> {
        self.column_of.get(&component).copied()
    }

    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    pub fn column_mut(&mut self, index: usize) -> &mut Column {
        &mut self.columns[index]
    }

    /// Grow every column and the entity column by one row; component slots
    /// are zero-initialised. Returns the new row index.
    pub fn insert(&mut self, entity: Entity) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        for column in &mut self.columns {
            column.push_default();
        }
        row
    }

    /// Remove `row` via swap-with-last. Returns the handle of the entity
    /// relocated into `row`, if the removed row wasn't already last.
    pub fn delete(&mut self, row: usize) -> Option<Entity> {
        let last = self.entities.len() - 1;
        self.entities.swap_remove(row);
        for column in &mut self.columns {
            column.swap_remove(row);
        }
        if row != last {
            Some(self.entities[row])
        } else {
            None
        }
    }

    pub fn get(&self, row: usize, component: Entity) -> Option<&[u8]> {
        let idx = self.column_index(component)?;
        Some(self.columns[idx].slice(row))
    }

    pub fn get_mut(&mut self, row: usize, component: Entity) -> Option<&mut [u8]> {
        let idx = self.column_index(component)?;
        Some(self.columns[idx].slice_mut(row))
    }

    pub fn set(&mut self, row: usize, component: Entity, bytes: &[u8]) -> bool {
        match self.column_index(component) {
            Some(idx) => {
                self.columns[idx].set(row, bytes);
                true
            }
            None => false,
        }
    }
}

/// Move the entity at `src_row` of `src` into a freshly allocated row of
/// `dst`, copying every component shared by both families; components
/// unique to `dst` are left zero-initialised, components unique to `src`
/// are dropped. Then removes `src_row` from `src` (swap-with-last).
///
/// Returns the new row index in `dst`, and the entity (if any) relocated
/// into `src_row` as a result of the swap-remove.
pub fn move_row(src: &mut Table, src_row: usize, dst: &mut Table) -> (usize, Option<Entity>) {
    let entity = src.entities()[src_row];
    let new_row = dst.insert(entity);

    for (dst_idx, &component) in dst.components.clone().iter().enumerate() {
        if let Some(src_idx) = src.column_index(component) {
            let bytes = src.column(src_idx).slice(src_row).to_vec();
            dst.columns[dst_idx].set(new_row, &bytes);
        }
    }

    let relocated = src.delete(src_row);
    (new_row, relocated)
}
