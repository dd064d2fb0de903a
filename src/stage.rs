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

//! Stage: the deferred-mutation buffer, and the merge procedure that folds
//! one back into the world.
//!
//! A stage never touches live table storage. Every structural edit
//! (`add`/`remove`/`set`/`delete`/`new`/`clone`) issued while a stage is
//! active accumulates here; `merge` is the only place tables and the entity
//! directory change. That separation is what makes in-flight iteration
//! structurally stable: a system holds raw pointers into a table's columns,
//! and nothing moves those columns out from under it until the system
//! returns and the world merges.

use rustc_hash::FxHashMap;

use crate::archetype::{move_row, Table};
use crate::component::ComponentRegistry;
use crate::entity::{Entity, Row};
use crate::error::{invariant_violation, Result};
use crate::family::{FamilyComponents, FamilyId, FamilyRegistry};

/// Borrowed view over the world-owned state a merge needs to touch.
/// Kept separate from `World` itself so `stage.rs` has no dependency on
/// `world.rs` (the dependency runs the other way).
pub struct WorldStore<'a> {
    pub family_registry: &'a mut FamilyRegistry,
    pub tables: &'a mut Vec<Table>,
    pub table_index: &'a mut FxHashMap<FamilyId, usize>,
    pub directory: &'a mut FxHashMap<Entity, Row>,
    pub component_registry: &'a ComponentRegistry,
}

impl<'a> WorldStore<'a> {
    pub(crate) fn get_or_create_table(&mut self, family: FamilyId) -> Result<usize> {
        if let Some(&idx) = self.table_index.get(&family) {
            return Ok(idx);
        }
        let components: FamilyComponents = self.family_registry.components(family)?.into();
        let component_registry = &self.component_registry;
        let table = Table::new(family, components, |c| {
            component_registry
                .descriptor(c)
                .unwrap_or(crate::component::ComponentDescriptor::new(0, 1))
        });
        let idx = self.tables.len();
        self.tables.push(table);
        self.table_index.insert(family, idx);
        Ok(idx)
    }

    /// Immediate delete: used both by the public `entity_delete` path and by
    /// merge's delete phase.
    pub fn delete_immediate(&mut self, entity: Entity) -> Result<()> {
        let Some(location) = self.directory.remove(&entity) else {
            return Ok(()); // already gone: delete is idempotent
        };
        let Some(&table_idx) = self.table_index.get(&location.family) else {
            return invariant_violation(format!(
                "directory pointed entity {entity:?} at unknown family {:?}",
                location.family
            ));
        };
        if let Some(relocated) = self.tables[table_idx].delete(location.index) {
            if let Some(loc) = self.directory.get_mut(&relocated) {
                loc.index = location.index;
            } else {
                return invariant_violation(format!(
                    "table swap relocated entity {relocated:?} not present in directory"
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn current_family(&self, entity: Entity) -> FamilyId {
        self.directory
            .get(&entity)
            .map(|r| r.family)
            .unwrap_or(FamilyId::EMPTY)
    }
}

/// Per-context deferred mutation buffer.
#[derive(Default)]
pub struct Stage {
    /// Accumulated union of components staged for addition, per entity.
    add_stage: FxHashMap<Entity, FamilyId>,
    /// Accumulated union of components staged for removal, per entity.
    remove_stage: FxHashMap<Entity, FamilyId>,
    /// Target family an entity resolved to the last time it was committed
    /// this stage's lifetime; applied to the world at merge.
    entity_stage: FxHashMap<Entity, FamilyId>,
    /// Entities queued for deletion.
    delete_stage: Vec<Entity>,
    /// Pending component value writes: (entity, component) -> bytes.
    data_stage: FxHashMap<(Entity, Entity), Vec<u8>>,
    /// Families interned while staging that the world doesn't have yet.
    family_stage: FxHashMap<FamilyId, FamilyComponents>,
    /// Placeholder (empty) tables pre-built for families introduced this
    /// frame, so merge's "fold tables" phase has something to adopt.
    table_stage: FxHashMap<FamilyId, usize>,
    table_db_stage: Vec<Table>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.add_stage.is_empty()
            && self.remove_stage.is_empty()
            && self.entity_stage.is_empty()
            && self.delete_stage.is_empty()
            && self.data_stage.is_empty()
    }

    /// Whether `entity` has already been committed within this stage (i.e.
    /// has a pending target family recorded in `entity_stage`) even though
    /// it isn't in the world's directory yet. Lets `World` recognise an
    /// entity created earlier in the same frame, before the frame stage has
    /// merged, as a legitimate handle rather than a fabricated one.
    pub(crate) fn has_pending_entity(&self, entity: Entity) -> bool {
        self.entity_stage.contains_key(&entity)
    }

    /// Look up a family's component list. In practice this always hits the
    /// live registry: `intern`/`merge_families` register eagerly (interning
    /// has no side effects beyond the registry itself), so `family_stage`
    /// only exists to give phase 1 of `merge` something to fold, matching
    /// the shape of a stage that might one day defer interning too.
    fn ensure_family_exists(&mut self, store: &WorldStore<'_>, family: FamilyId) -> FamilyComponents {
        if let Ok(components) = store.family_registry.components(family) {
            return components.into();
        }
        self.family_stage
            .entry(family)
            .or_insert_with(FamilyComponents::new)
            .clone()
    }

    /// Stage `component`'s addition for `entity`: unions it into the
    /// entity's accumulated add-set for this stage.
    pub fn stage_add(
        &mut self,
        store: &mut WorldStore<'_>,
        entity: Entity,
        component: Entity,
    ) -> Result<()> {
        let component_family = self.intern(store, &[component]);
        self.stage_add_family(store, entity, component_family)
    }

    /// As `stage_add`, but with a whole family rather than a single
    /// component — used by `clone` to stage the source's entire family.
    pub fn stage_add_family(
        &mut self,
        store: &mut WorldStore<'_>,
        entity: Entity,
        family: FamilyId,
    ) -> Result<()> {
        let existing = self.add_stage.get(&entity).copied().unwrap_or(FamilyId::EMPTY);
        let merged = self.merge_families(store, existing, family, FamilyId::EMPTY)?;
        self.add_stage.insert(entity, merged);
        Ok(())
    }

    pub fn stage_remove(
        &mut self,
        store: &mut WorldStore<'_>,
        entity: Entity,
        component: Entity,
    ) -> Result<()> {
        let component_family = self.intern(store, &[component]);
        let existing = self.remove_stage.get(&entity).copied().unwrap_or(FamilyId::EMPTY);
        let merged = self.merge_families(store, existing, component_family, FamilyId::EMPTY)?;
        self.remove_stage.insert(entity, merged);
        Ok(())
    }

    /// Ensure the entity will carry `component` after merge (implicit add)
    /// and record the pending value write.
    pub fn stage_set(
        &mut self,
        store: &mut WorldStore<'_>,
        entity: Entity,
        component: Entity,
        bytes: &[u8],
    ) -> Result<()> {
        self.stage_add(store, entity, component)?;
        self.data_stage.insert((entity, component), bytes.to_vec());
        Ok(())
    }

    pub fn stage_delete(&mut self, entity: Entity) {
        self.delete_stage.push(entity);
    }

    /// Resolve the entity's staged family (base family composed with its
    /// accumulated add/remove sets) and, if different from where it
    /// currently lives, record the target in `entity_stage` and ensure a
    /// (possibly staged) table exists for it. A no-op for entities with no
    /// pending structural change that already have a location.
    pub fn commit(&mut self, store: &mut WorldStore<'_>, entity: Entity) -> Result<()> {
        let added = self.add_stage.get(&entity).copied();
        let removed = self.remove_stage.get(&entity).copied();
        if added.is_none() && removed.is_none() && store.directory.contains_key(&entity) {
            return Ok(());
        }

        let base = store.current_family(entity);
        let target = self.merge_families(
            store,
            base,
            added.unwrap_or(FamilyId::EMPTY),
            removed.unwrap_or(FamilyId::EMPTY),
        )?;

        let already_there = store
            .directory
            .get(&entity)
            .map(|r| r.family)
            .is_some_and(|f| f == target);
        if already_there {
            return Ok(());
        }

        // Make sure a table exists for the target family (staged if the
        // world doesn't have one yet) so merge's fold-tables phase has
        // something to adopt.
        if !store.table_index.contains_key(&target) && !self.table_stage.contains_key(&target) {
            let components = self.ensure_family_exists(store, target);
            let component_registry = store.component_registry;
            let table = Table::new(target, components, |c| {
                component_registry
                    .descriptor(c)
                    .unwrap_or(crate::component::ComponentDescriptor::new(0, 1))
            });
            let idx = self.table_db_stage.len();
            self.table_db_stage.push(table);
            self.table_stage.insert(target, idx);
        }

        self.entity_stage.insert(entity, target);
        Ok(())
    }

    fn intern(&mut self, store: &mut WorldStore<'_>, components: &[Entity]) -> FamilyId {
        // Interning is a pure, side-effect-isolated operation (a newly
        // interned family with no table and no entities is inert), so it's
        // safe to register it directly into the world's live registry even
        // while a stage is open, rather than staging the record.
        store.family_registry.register(components)
    }

    fn merge_families(
        &mut self,
        store: &mut WorldStore<'_>,
        base: FamilyId,
        added: FamilyId,
        removed: FamilyId,
    ) -> Result<FamilyId> {
        store.family_registry.merge(base, added, removed)
    }

    /// Fold this stage into the world, in the fixed phase order the spec
    /// mandates: families, then tables, then deletes, then commits.
    pub fn merge(mut self, store: &mut WorldStore<'_>) -> Result<()> {
        // Phase 1: fold families.
        for (id, components) in self.family_stage.drain() {
            store.family_registry.adopt(id, components);
        }

        // Phase 2: fold tables. Adopt each staged placeholder table into the
        // world if it's still needed; if something else already created a
        // table for that family, drop the placeholder (it was never
        // written to, so nothing is lost).
        let mut staged_tables: Vec<Option<Table>> = std::mem::take(&mut self.table_db_stage)
            .into_iter()
            .map(Some)
            .collect();
        for (family, idx) in self.table_stage.drain() {
            let table = staged_tables[idx]
                .take()
                .unwrap_or_else(|| unreachable!("table_stage index staged exactly once"));
            if !store.table_index.contains_key(&family) {
                let table_idx = store.tables.len();
                store.tables.push(table);
                store.table_index.insert(family, table_idx);
            }
        }

        // Phase 3: deletes. An entity that is both staged for a commit and
        // deleted in the same frame has its commit discarded here, so
        // delete wins.
        for entity in self.delete_stage.drain(..) {
            self.entity_stage.remove(&entity);
            self.data_stage.retain(|(e, _), _| *e != entity);
            store.delete_immediate(entity)?;
        }

        // Phase 4: commits.
        for (entity, target) in self.entity_stage.drain() {
            let dst_idx = store.get_or_create_table(target)?;
            let current = store.directory.get(&entity).copied();

            let new_row = match current {
                Some(loc) => {
                    let Some(&src_idx) = store.table_index.get(&loc.family) else {
                        return invariant_violation(format!(
                            "entity {entity:?} had a directory entry for unknown family {:?}",
                            loc.family
                        ));
                    };
                    if src_idx == dst_idx {
                        loc.index
                    } else {
                        let (src_table, dst_table) = two_mut(store.tables, src_idx, dst_idx);
                        let (new_row, relocated) = move_row(src_table, loc.index, dst_table);
                        if let Some(relocated) = relocated {
                            if let Some(reloc_loc) = store.directory.get_mut(&relocated) {
                                reloc_loc.index = loc.index;
                            } else {
                                return invariant_violation(format!(
                                    "table swap relocated entity {relocated:?} not present in directory"
                                ));
                            }
                        }
                        new_row
                    }
                }
                None => store.tables[dst_idx].insert(entity),
            };

            // Overlay staged data writes for components the target family
            // actually carries; anything else is discarded per spec.
            let components: Vec<Entity> = store.tables[dst_idx].components().to_vec();
            for component in components {
                if let Some(bytes) = self.data_stage.remove(&(entity, component)) {
                    store.tables[dst_idx].set(new_row, component, &bytes);
                }
            }

            store.directory.insert(entity, Row::new(target, new_row));
        }

        // Anything left in data_stage targeted a component the merged
        // family doesn't carry; discard per the staging invariant.
        self.data_stage.clear();
        self.add_stage.clear();
        self.remove_stage.clear();

        Ok(())
    }
}

/// Borrow two distinct elements of a slice mutably at once, regardless of
/// which index is larger.
fn two_mut<T>(slice: &mut [T], i: usize, j: usize) -> (&mut T, &mut T) {
    assert_ne!(i, j);
    if i < j {
        let (head, tail) = slice.split_at_mut(j);
        (&mut head[i], &mut tail[0])
    } else {
        let (head, tail) = slice.split_at_mut(i);
        (&mut tail[0], &mut head[j])
    }
}
