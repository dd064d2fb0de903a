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

//! Schedule: ordered phases of systems, dispatched serially.
//!
//! Parallel execution is a later concern (see the crate root docs); for now
//! a phase is just a run-in-registration-order list, and phases themselves
//! run in declaration order. The per-system matched-table cache lives here
//! rather than on `System` itself, since a system is a bare trait object.

use smallvec::SmallVec;

use crate::entity::Entity;
use crate::family::FamilyId;
use crate::system::BoxedSystem;

/// Handle to a declared phase, returned by [`Schedule::declare_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseId(pub(crate) usize);

/// Matched (table, column-mapping) pairs for one system, refreshed lazily
/// whenever the world's table generation moves past what was cached.
///
/// `generation` starts at `None` (via `#[derive(Default)]`) rather than
/// `0`, so a freshly registered system is always stale on its first
/// dispatch — even if no table has been created since the world itself
/// was constructed and the world's own generation counter is still at its
/// initial value. Comparing two `u64`s that both default to `0` would
/// make the first refresh a no-op and leave `tables` empty forever.
#[derive(Default)]
pub(crate) struct MatchCache {
    generation: Option<u64>,
    pub(crate) tables: Vec<(usize, SmallVec<[usize; 8]>)>,
}

impl MatchCache {
    pub(crate) fn is_stale(&self, current_generation: u64) -> bool {
        self.generation != Some(current_generation)
    }

    pub(crate) fn refresh(&mut self, generation: u64, tables: Vec<(usize, SmallVec<[usize; 8]>)>) {
        self.generation = Some(generation);
        self.tables = tables;
    }
}

pub(crate) struct SystemEntry {
    /// The system's own handle, returned from `system_register`.
    pub(crate) entity: Entity,
    pub(crate) family: FamilyId,
    pub(crate) system: BoxedSystem,
    pub(crate) cache: MatchCache,
}

/// Ordered phases of systems. Phases execute in declaration order; systems
/// within a phase execute in registration order.
#[derive(Default)]
pub struct Schedule {
    phases: Vec<Vec<SystemEntry>>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_phase(&mut self) -> PhaseId {
        let id = PhaseId(self.phases.len());
        self.phases.push(Vec::new());
        id
    }

    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }

    /// Register a system into a previously declared phase.
    ///
    /// # Panics
    /// Panics if `phase` was not returned by this schedule's
    /// `declare_phase` — an invalid `PhaseId` is a caller bug, not a
    /// recoverable runtime condition.
    pub(crate) fn register(&mut self, phase: PhaseId, entity: Entity, family: FamilyId, system: BoxedSystem) {
        let bucket = self
            .phases
            .get_mut(phase.0)
            .expect("PhaseId not declared on this schedule");
        bucket.push(SystemEntry {
            entity,
            family,
            system,
            cache: MatchCache::default(),
        });
    }

    pub(crate) fn phases_mut(&mut self) -> impl Iterator<Item = &mut Vec<SystemEntry>> {
        self.phases.iter_mut()
    }

    pub fn system_count(&self) -> usize {
        self.phases.iter().map(|p| p.len()).sum()
    }
}
