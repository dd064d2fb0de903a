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

//! Entity handles and row locations.
//!
//! Entities, components and families are all the same kind of handle: an
//! opaque, monotonically allocated 64-bit id. `0` is reserved and never
//! handed out by [`EntityAllocator`] — it means "no entity".

use std::sync::atomic::{AtomicU64, Ordering};

use crate::family::FamilyId;

/// Opaque handle to an entity (or, interchangeably, a component — a
/// component is just an entity that also carries a descriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(pub u64);

impl Entity {
    /// The reserved "no entity" value.
    pub const NONE: Entity = Entity(0);

    /// True for every handle except [`Entity::NONE`].
    pub fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::NONE
    }
}

/// Allocates fresh, never-reused entity handles.
///
/// Unlike a generational slot map, handles here are not recycled: the spec
/// requires that a handle never be reused within a world's lifetime, so a
/// single monotonic counter is the whole allocator.
#[derive(Debug)]
pub struct EntityAllocator {
    next: AtomicU64,
}

impl EntityAllocator {
    pub fn new() -> Self {
        // Start at 1: 0 is reserved for Entity::NONE.
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate and return a fresh handle.
    ///
    /// # Panics
    /// Panics on exhaustion of the 64-bit handle space (not reachable in
    /// practice).
    pub fn alloc(&self) -> Entity {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            panic!("entity handle space exhausted");
        }
        Entity(id)
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Location of an entity: which family's table, and which row within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row {
    pub family: FamilyId,
    pub index: usize,
}

impl Row {
    pub fn new(family: FamilyId, index: usize) -> Self {
        Self { family, index }
    }
}
