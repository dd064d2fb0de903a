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

//! World: central entity, table and family storage, and the frame loop.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

#[cfg(feature = "profiling")]
use tracing::{debug, trace};

use crate::archetype::Table;
use crate::component::{ComponentDescriptor, ComponentRegistry};
use crate::entity::{Entity, EntityAllocator, Row};
use crate::error::{EcsError, Result};
use crate::family::{FamilyId, FamilyRegistry};
use crate::schedule::{PhaseId, Schedule};
use crate::stage::{Stage, WorldStore};
use crate::system::{BoxedSystem, Cursor};

/// Central ECS world: family registry, table storage, entity directory, the
/// staging buffers, and the system schedule.
pub struct World {
    entity_allocator: EntityAllocator,
    component_registry: ComponentRegistry,
    family_registry: FamilyRegistry,

    tables: Vec<Table>,
    table_index: FxHashMap<FamilyId, usize>,
    /// Bumped whenever a table is created, so systems know to re-run the
    /// matcher instead of trusting a stale cache.
    table_generation: u64,

    directory: FxHashMap<Entity, Row>,

    /// Stage for edits made outside `progress`; merged immediately after
    /// every operation.
    main_stage: Stage,
    /// Stage for edits made by a running system; merged after that system
    /// returns, before the next one runs. `Some` only while `in_progress`.
    frame_stage: Option<Stage>,
    in_progress: bool,

    schedule: Schedule,
    delta_time: f32,

    /// Opaque embedder-owned pointer; the world neither owns nor interprets
    /// it, and drops it unexamined on teardown.
    context: *mut (),
}

impl World {
    pub fn new() -> Self {
        let mut family_registry = FamilyRegistry::new();
        let mut table_index = FxHashMap::default();
        let empty_table = Table::new(FamilyId::EMPTY, Default::default(), |_| {
            ComponentDescriptor::new(0, 1)
        });
        table_index.insert(FamilyId::EMPTY, 0);
        // Registering the bootstrap id is redundant (FamilyRegistry::new
        // already reserves it) but cheap and keeps this constructor
        // independent of that invariant.
        let _ = family_registry.register(&[]);

        Self {
            entity_allocator: EntityAllocator::new(),
            component_registry: ComponentRegistry::new(),
            family_registry,
            tables: vec![empty_table],
            table_index,
            table_generation: 0,
            directory: FxHashMap::default(),
            main_stage: Stage::new(),
            frame_stage: None,
            in_progress: false,
            schedule: Schedule::new(),
            delta_time: 0.0,
            context: std::ptr::null_mut(),
        }
    }

    fn store(&mut self) -> WorldStore<'_> {
        WorldStore {
            family_registry: &mut self.family_registry,
            tables: &mut self.tables,
            table_index: &mut self.table_index,
            directory: &mut self.directory,
            component_registry: &self.component_registry,
        }
    }

    /// Borrow the currently-active stage and a `WorldStore` view at once.
    /// Written as direct field projections (not via `self.store()`) so the
    /// borrow checker sees the two borrows as disjoint.
    fn split(&mut self) -> (&mut Stage, WorldStore<'_>) {
        let stage = if self.in_progress {
            self.frame_stage
                .as_mut()
                .expect("in_progress implies frame_stage is Some")
        } else {
            &mut self.main_stage
        };
        let store = WorldStore {
            family_registry: &mut self.family_registry,
            tables: &mut self.tables,
            table_index: &mut self.table_index,
            directory: &mut self.directory,
            component_registry: &self.component_registry,
        };
        (stage, store)
    }

    fn bump_generation_if_grown(&mut self, before: usize) {
        if self.tables.len() != before {
            self.table_generation += 1;
        }
    }

    /// Drain and merge `main_stage`. Used by every public operation called
    /// outside a running frame, so an embedder never has to call `commit`
    /// itself.
    fn merge_main_stage(&mut self) -> Result<()> {
        let stage = std::mem::take(&mut self.main_stage);
        let before = self.tables.len();
        let result = {
            let mut store = self.store();
            stage.merge(&mut store)
        };
        self.bump_generation_if_grown(before);
        result
    }

    /// Drain and merge `frame_stage`, then open a fresh one. Called by the
    /// dispatcher between systems within a phase.
    fn merge_frame_stage(&mut self) -> Result<()> {
        let stage = self
            .frame_stage
            .take()
            .expect("frame_stage present while in_progress");
        let before = self.tables.len();
        let result = {
            let mut store = self.store();
            stage.merge(&mut store)
        };
        self.bump_generation_if_grown(before);
        self.frame_stage = Some(Stage::new());
        result
    }

    fn require_component(&self, component: Entity) -> Result<()> {
        if self.component_registry.is_component(component) {
            Ok(())
        } else {
            Err(EcsError::NotAComponent(component))
        }
    }

    /// Require that `entity` is a handle this world actually produced: live
    /// in the directory, or already committed within the currently active
    /// stage (an entity created earlier in the same frame, not yet merged).
    /// A handle that was never returned by `entity_new`/`entity_clone` is
    /// rejected — handles are never reused, so a caller can't conjure one
    /// out of thin air and have it silently become live.
    fn require_entity(&self, entity: Entity) -> Result<()> {
        if self.directory.contains_key(&entity) {
            return Ok(());
        }
        let active_stage = if self.in_progress {
            self.frame_stage.as_ref()
        } else {
            Some(&self.main_stage)
        };
        if active_stage.is_some_and(|stage| stage.has_pending_entity(entity)) {
            return Ok(());
        }
        Err(EcsError::NotAnEntity(entity))
    }

    // ---- §6 external interface -------------------------------------

    pub fn component_register(&mut self, descriptor: ComponentDescriptor) -> Entity {
        let component = self.entity_allocator.alloc();
        self.component_registry.register(component, descriptor);
        component
    }

    pub fn family_register(&mut self, components: &[Entity]) -> FamilyId {
        self.family_registry.register(components)
    }

    /// Allocate a fresh handle and, if `family_hint` is non-empty, stage it
    /// into that family; every entity — including one created with the
    /// empty family — is committed (and, outside a frame, merged) so it
    /// has a directory entry and a table row before this call returns.
    pub fn entity_new(&mut self, family_hint: FamilyId) -> Result<Entity> {
        let entity = self.entity_allocator.alloc();
        if family_hint != FamilyId::EMPTY {
            let (stage, mut store) = self.split();
            stage.stage_add_family(&mut store, entity, family_hint)?;
        }
        self.commit(entity)?;
        Ok(entity)
    }

    pub fn entity_delete(&mut self, entity: Entity) -> Result<()> {
        let was_in_progress = self.in_progress;
        {
            let (stage, _store) = self.split();
            stage.stage_delete(entity);
        }
        if !was_in_progress {
            self.merge_main_stage()?;
        }
        Ok(())
    }

    pub fn entity_add(&mut self, entity: Entity, component: Entity) -> Result<()> {
        self.require_component(component)?;
        self.require_entity(entity)?;
        {
            let (stage, mut store) = self.split();
            stage.stage_add(&mut store, entity, component)?;
        }
        self.commit(entity)
    }

    pub fn entity_remove(&mut self, entity: Entity, component: Entity) -> Result<()> {
        self.require_component(component)?;
        self.require_entity(entity)?;
        {
            let (stage, mut store) = self.split();
            stage.stage_remove(&mut store, entity, component)?;
        }
        self.commit(entity)
    }

    pub fn entity_set(&mut self, entity: Entity, component: Entity, bytes: &[u8]) -> Result<()> {
        self.require_component(component)?;
        self.require_entity(entity)?;
        {
            let (stage, mut store) = self.split();
            stage.stage_set(&mut store, entity, component, bytes)?;
        }
        self.commit(entity)
    }

    /// Read a component's live bytes, bypassing any stage: reads always
    /// observe the committed main store.
    pub fn entity_get(&self, entity: Entity, component: Entity) -> Result<&[u8]> {
        self.require_component(component)?;
        let location = self
            .directory
            .get(&entity)
            .ok_or(EcsError::NotAnEntity(entity))?;
        let table_idx = *self.table_index.get(&location.family).ok_or_else(|| {
            EcsError::InternalInvariant(format!(
                "directory pointed entity {entity:?} at unknown family {:?}",
                location.family
            ))
        })?;
        self.tables[table_idx]
            .get(location.index, component)
            .ok_or(EcsError::ComponentNotInFamily { entity, component })
    }

    pub fn entity_has(&self, entity: Entity, component: Entity) -> Result<bool> {
        let location = self
            .directory
            .get(&entity)
            .ok_or(EcsError::NotAnEntity(entity))?;
        Ok(self.family_registry.contains(location.family, component))
    }

    /// Allocate a fresh handle, stage it into `source`'s current family,
    /// and — if `copy_values` — stage a byte-for-byte copy of every
    /// component `source` carries. Observable after the enclosing merge
    /// (immediately if called outside a frame).
    pub fn entity_clone(&mut self, source: Entity, copy_values: bool) -> Result<Entity> {
        if !self.directory.contains_key(&source) {
            return Err(EcsError::NotAnEntity(source));
        }
        let clone = self.entity_allocator.alloc();
        {
            let (stage, mut store) = self.split();
            let source_family = store.current_family(source);
            stage.stage_add_family(&mut store, clone, source_family)?;

            if copy_values {
                if let Some(&table_idx) = store.table_index.get(&source_family) {
                    let components: Vec<Entity> = store.tables[table_idx].components().to_vec();
                    let source_row = store.directory[&source].index;
                    for component in components {
                        if let Some(bytes) = store.tables[table_idx].get(source_row, component) {
                            let bytes = bytes.to_vec();
                            stage.stage_set(&mut store, clone, component, &bytes)?;
                        }
                    }
                }
            }
        }
        self.commit(clone)?;
        Ok(clone)
    }

    /// Outside a frame, resolves `entity`'s target family and merges the
    /// main stage immediately. Inside a frame, only resolves the target —
    /// application happens when the running system returns and the
    /// dispatcher merges the frame stage.
    pub fn commit(&mut self, entity: Entity) -> Result<()> {
        let was_in_progress = self.in_progress;
        {
            let (stage, mut store) = self.split();
            stage.commit(&mut store, entity)?;
        }
        if !was_in_progress {
            self.merge_main_stage()?;
        }
        Ok(())
    }

    pub fn declare_phase(&mut self) -> PhaseId {
        self.schedule.declare_phase()
    }

    /// Register `system` to run during `phase` against every table whose
    /// family is a superset of `family`. Returns a handle for the system
    /// itself.
    pub fn system_register(&mut self, phase: PhaseId, family: FamilyId, system: BoxedSystem) -> Entity {
        let entity = self.entity_allocator.alloc();
        self.schedule.register(phase, entity, family, system);
        entity
    }

    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Run every declared phase once, in order; within a phase, systems run
    /// in registration order, with a merge after each one.
    ///
    /// # Errors
    /// Returns [`EcsError::FrameReentrant`] if a frame is already in
    /// progress (`world_progress` must not be called recursively — a
    /// system must never call it on its own world).
    pub fn progress(&mut self, dt: f32) -> Result<()> {
        if self.in_progress {
            return Err(EcsError::FrameReentrant);
        }
        self.in_progress = true;
        self.frame_stage = Some(Stage::new());
        self.delta_time = dt;

        let result = self.run_schedule();

        self.frame_stage = None;
        self.in_progress = false;
        result
    }

    fn run_schedule(&mut self) -> Result<()> {
        let mut schedule = std::mem::take(&mut self.schedule);
        let result = self.dispatch(&mut schedule);
        self.schedule = schedule;
        result
    }

    fn dispatch(&mut self, schedule: &mut Schedule) -> Result<()> {
        for phase in schedule.phases_mut() {
            for entry in phase.iter_mut() {
                self.refresh_match_cache(entry);
                let matched = entry.cache.tables.clone();
                #[cfg(feature = "profiling")]
                trace!(system = entry.system.name(), tables = matched.len(), "dispatch");
                for (table_idx, columns) in matched {
                    let cursor = Cursor::from_table(&self.tables[table_idx], &columns);
                    entry.system.run(self, &cursor)?;
                }
                self.merge_frame_stage()?;
            }
        }
        Ok(())
    }

    fn refresh_match_cache(&self, entry: &mut crate::schedule::SystemEntry) {
        if !entry.cache.is_stale(self.table_generation) {
            return;
        }
        let components: Vec<Entity> = self
            .family_registry
            .components(entry.family)
            .map(|c| c.to_vec())
            .unwrap_or_default();
        let mut matched = Vec::new();
        for (idx, table) in self.tables.iter().enumerate() {
            if self.family_registry.is_subset(entry.family, table.family_id()) {
                let columns: SmallVec<[usize; 8]> = components
                    .iter()
                    .map(|&c| {
                        table
                            .column_index(c)
                            .expect("subset guarantees every declared component has a column")
                    })
                    .collect();
                matched.push((idx, columns));
            }
        }
        #[cfg(feature = "profiling")]
        debug!(system = entry.system.name(), matched = matched.len(), "matcher refresh");
        entry.cache.refresh(self.table_generation, matched);
    }

    pub fn set_context(&mut self, context: *mut ()) {
        self.context = context;
    }

    pub fn context(&self) -> *mut () {
        self.context
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_foo_bar(world: &mut World) -> (Entity, Entity) {
        let foo = world.component_register(ComponentDescriptor::new(4, 4));
        let bar = world.component_register(ComponentDescriptor::new(4, 4));
        (foo, bar)
    }

    #[test]
    fn s1_add_moves_entity_to_wider_family() {
        let mut world = World::new();
        let (foo, bar) = register_foo_bar(&mut world);
        let foo_family = world.family_register(&[foo]);

        let e = world.entity_new(foo_family).unwrap();
        assert!(world.entity_has(e, foo).unwrap());
        assert!(!world.entity_has(e, bar).unwrap());

        world.entity_add(e, bar).unwrap();
        assert!(world.entity_has(e, bar).unwrap());

        let expected = world.family_register(&[foo, bar]);
        assert_eq!(world.directory[&e].family, expected);
    }

    #[test]
    fn s2_clone_without_values_zeroes_data() {
        let mut world = World::new();
        let (foo, _bar) = register_foo_bar(&mut world);
        let foo_family = world.family_register(&[foo]);

        let e = world.entity_new(foo_family).unwrap();
        world.entity_set(e, foo, &10u32.to_ne_bytes()).unwrap();

        let clone = world.entity_clone(e, false).unwrap();
        assert!(world.entity_has(clone, foo).unwrap());
        let bytes = world.entity_get(clone, foo).unwrap();
        assert_eq!(u32::from_ne_bytes(bytes.try_into().unwrap()), 0);
    }

    #[test]
    fn s3_clone_with_values_copies_data() {
        let mut world = World::new();
        let (foo, bar) = register_foo_bar(&mut world);
        let family = world.family_register(&[foo, bar]);

        let e = world.entity_new(family).unwrap();
        world.entity_set(e, foo, &10u32.to_ne_bytes()).unwrap();
        world.entity_set(e, bar, &20u32.to_ne_bytes()).unwrap();

        let clone = world.entity_clone(e, true).unwrap();
        let foo_bytes = world.entity_get(clone, foo).unwrap();
        let bar_bytes = world.entity_get(clone, bar).unwrap();
        assert_eq!(u32::from_ne_bytes(foo_bytes.try_into().unwrap()), 10);
        assert_eq!(u32::from_ne_bytes(bar_bytes.try_into().unwrap()), 20);
    }

    #[test]
    fn s6_empty_family_clone_both_recorded() {
        let mut world = World::new();
        let e = world.entity_new(FamilyId::EMPTY).unwrap();
        let clone = world.entity_clone(e, false).unwrap();

        assert_eq!(world.directory[&e].family, FamilyId::EMPTY);
        assert_eq!(world.directory[&clone].family, FamilyId::EMPTY);
    }

    #[test]
    fn progress_rejects_reentrant_call() {
        use std::cell::Cell;
        use std::rc::Rc;

        struct Reentrant {
            ran: Rc<Cell<bool>>,
        }
        impl crate::system::System for Reentrant {
            fn name(&self) -> &str {
                "reentrant"
            }
            fn run(&mut self, world: &mut World, _cursor: &crate::system::Cursor) -> Result<()> {
                self.ran.set(true);
                assert!(matches!(world.progress(0.0), Err(EcsError::FrameReentrant)));
                Ok(())
            }
        }

        let mut world = World::new();
        let phase = world.declare_phase();
        let ran = Rc::new(Cell::new(false));
        world.system_register(phase, FamilyId::EMPTY, Box::new(Reentrant { ran: ran.clone() }));
        world.progress(0.0).unwrap();
        // Guards against the matcher silently never dispatching this system
        // (e.g. a stale match-cache default matching the world's initial
        // table generation): the assertion inside `run` only fires if the
        // system is actually invoked.
        assert!(ran.get(), "Reentrant system was never dispatched");
    }

    #[test]
    fn empty_family_system_matches_bootstrap_table_on_first_dispatch() {
        use std::cell::Cell;
        use std::rc::Rc;

        struct CountCalls {
            calls: Rc<Cell<usize>>,
        }
        impl crate::system::System for CountCalls {
            fn name(&self) -> &str {
                "count_calls"
            }
            fn run(&mut self, _world: &mut World, _cursor: &crate::system::Cursor) -> Result<()> {
                self.calls.set(self.calls.get() + 1);
                Ok(())
            }
        }

        let mut world = World::new();
        let phase = world.declare_phase();
        let calls = Rc::new(Cell::new(0));
        world.system_register(phase, FamilyId::EMPTY, Box::new(CountCalls { calls: calls.clone() }));
        // No table has been created since `World::new`; the bootstrap empty
        // table must still be matched on this very first dispatch.
        world.progress(0.0).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn add_on_fabricated_handle_is_rejected() {
        let mut world = World::new();
        let (foo, _bar) = register_foo_bar(&mut world);
        let fabricated = Entity(999_999);

        assert_eq!(
            world.entity_add(fabricated, foo).unwrap_err(),
            EcsError::NotAnEntity(fabricated)
        );
        assert!(!world.directory.contains_key(&fabricated));
    }

    #[test]
    fn remove_and_set_on_fabricated_handle_are_rejected() {
        let mut world = World::new();
        let (foo, _bar) = register_foo_bar(&mut world);
        let fabricated = Entity(999_999);

        assert_eq!(
            world.entity_remove(fabricated, foo).unwrap_err(),
            EcsError::NotAnEntity(fabricated)
        );
        assert_eq!(
            world.entity_set(fabricated, foo, &1u32.to_ne_bytes()).unwrap_err(),
            EcsError::NotAnEntity(fabricated)
        );
    }

    #[test]
    fn add_on_entity_created_earlier_in_same_frame_succeeds() {
        struct SpawnThenAdd {
            foo: Entity,
        }
        impl crate::system::System for SpawnThenAdd {
            fn name(&self) -> &str {
                "spawn_then_add"
            }
            fn run(&mut self, world: &mut World, _cursor: &crate::system::Cursor) -> Result<()> {
                let fresh = world.entity_new(FamilyId::EMPTY)?;
                // `fresh` is only staged in this frame's stage, not yet in
                // the directory (reads still correctly see it as absent
                // until the frame stage merges) — but it must still be
                // accepted as a live handle for a structural write.
                world.entity_add(fresh, self.foo)?;
                Ok(())
            }
        }

        let mut world = World::new();
        let foo = world.component_register(ComponentDescriptor::new(4, 4));
        let phase = world.declare_phase();
        world.system_register(phase, FamilyId::EMPTY, Box::new(SpawnThenAdd { foo }));
        world.progress(0.0).unwrap();
    }

    #[test]
    fn delete_idempotent() {
        let mut world = World::new();
        let e = world.entity_new(FamilyId::EMPTY).unwrap();
        world.entity_delete(e).unwrap();
        world.entity_delete(e).unwrap();
        assert!(world.entity_has(e, Entity(999)).is_err());
    }

    #[test]
    fn add_remove_are_idempotent() {
        let mut world = World::new();
        let (foo, _bar) = register_foo_bar(&mut world);
        let e = world.entity_new(FamilyId::EMPTY).unwrap();

        world.entity_add(e, foo).unwrap();
        world.entity_add(e, foo).unwrap();
        assert!(world.entity_has(e, foo).unwrap());

        world.entity_remove(e, foo).unwrap();
        world.entity_remove(e, foo).unwrap();
        assert!(!world.entity_has(e, foo).unwrap());
    }
}
