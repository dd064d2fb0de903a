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

//! System trait and the row cursor handed to a system on each matched table.

use smallvec::SmallVec;

use crate::archetype::Table;
use crate::entity::Entity;
use crate::error::Result;
use crate::world::World;

/// A system is invoked once per table whose family is a superset of the
/// system's declared family. Structural edits it performs against `world`
/// are staged and become visible to the next system in the phase; reads go
/// through `cursor`, which is backed directly by the matched table's live
/// column buffers.
pub trait System {
    fn name(&self) -> &str;

    fn run(&mut self, world: &mut World, cursor: &Cursor) -> Result<()>;
}

pub type BoxedSystem = Box<dyn System>;

/// One matched component column: a raw pointer to row 0's storage plus the
/// stride to reach any other row.
#[derive(Clone, Copy)]
struct RawColumn {
    ptr: *mut u8,
    item_size: usize,
}

/// Row-range iteration handle for one (system, table) dispatch.
///
/// Holds raw pointers rather than a borrow of the table so that it can be
/// constructed before the system's `&mut World` is taken: the dispatcher
/// computes a `Cursor` from a short-lived `&Table` borrow, then calls
/// `System::run(&mut World, &Cursor)` with that borrow already released.
/// This is sound because no merge runs between the cursor's construction
/// and the end of that one system's dispatch over that one table — nothing
/// reallocates the column buffers the pointers point into.
pub struct Cursor {
    entities_ptr: *const Entity,
    row_count: usize,
    columns: SmallVec<[RawColumn; 8]>,
}

impl Cursor {
    /// Build a cursor for `table`, exposing one column per entry in
    /// `requested_columns` (table-column indices, in the system's declared
    /// family order).
    pub(crate) fn from_table(table: &Table, requested_columns: &[usize]) -> Self {
        let columns = requested_columns
            .iter()
            .map(|&idx| {
                let column = table.column(idx);
                RawColumn {
                    ptr: column.raw_ptr(0),
                    item_size: column.item_size(),
                }
            })
            .collect();
        Self {
            entities_ptr: table.entities().as_ptr(),
            row_count: table.row_count(),
            columns,
        }
    }

    pub fn first(&self) -> usize {
        0
    }

    pub fn last(&self) -> usize {
        self.row_count
    }

    pub fn next(&self, row: usize) -> usize {
        row + 1
    }

    pub fn entity(&self, row: usize) -> Entity {
        debug_assert!(row < self.row_count);
        // SAFETY: row is bounds-checked above; entities_ptr is valid for
        // row_count elements for the cursor's lifetime (see struct docs).
        unsafe { *self.entities_ptr.add(row) }
    }

    /// Pointer to `column_index`'s (not the table's) storage for `row`.
    /// `column_index` indexes into the system's declared family, not the
    /// table's own column order.
    pub fn data(&self, row: usize, column_index: usize) -> *mut u8 {
        debug_assert!(row < self.row_count);
        let column = self.columns[column_index];
        // SAFETY: row is bounds-checked above; the pointer is valid for
        // item_size bytes per the same argument as `entity`.
        unsafe { column.ptr.add(row * column.item_size) }
    }
}
