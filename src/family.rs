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

//! Family registry: interns component sets to stable [`FamilyId`]s.
//!
//! A family is the archetype signature — the unordered set of component
//! handles an entity carries. `FamilyId` equality must coincide with set
//! equality, so the id is derived from a hash of the (sorted, deduplicated)
//! component set. On the rare hash collision we linearly probe to the next
//! id rather than letting two distinct sets share an id.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::entity::Entity;
use crate::error::{invariant_violation, Result};

/// Small-vector type used for a family's canonical component order.
pub type FamilyComponents = SmallVec<[Entity; 8]>;

/// Stable identifier for an interned component set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyId(pub u64);

impl FamilyId {
    /// The distinguished id of the empty component set.
    pub const EMPTY: FamilyId = FamilyId(0);
}

struct FamilyRecord {
    /// Ascending order by handle value — the canonical column order tables
    /// use for this family.
    components: FamilyComponents,
}

/// Interns component sets into stable [`FamilyId`]s for the lifetime of a
/// world.
#[derive(Default)]
pub struct FamilyRegistry {
    families: FxHashMap<FamilyId, FamilyRecord>,
}

impl FamilyRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.families.insert(
            FamilyId::EMPTY,
            FamilyRecord {
                components: FamilyComponents::new(),
            },
        );
        registry
    }

    /// Intern `components`, returning the family's stable id. Repeated calls
    /// with an equal set (order and duplicates ignored) return the same id.
    pub fn register(&mut self, components: &[Entity]) -> FamilyId {
        let mut sorted: FamilyComponents = components.iter().copied().collect();
        sorted.sort_unstable();
        sorted.dedup();
        self.intern(sorted)
    }

    /// Adopt a family record that was staged elsewhere (see `Stage::merge`),
    /// if the world doesn't already have one for this id.
    pub(crate) fn adopt(&mut self, id: FamilyId, components: FamilyComponents) {
        self.families.entry(id).or_insert(FamilyRecord { components });
    }

    pub(crate) fn contains_id(&self, id: FamilyId) -> bool {
        self.families.contains_key(&id)
    }

    fn intern(&mut self, sorted: FamilyComponents) -> FamilyId {
        if sorted.is_empty() {
            return FamilyId::EMPTY;
        }

        let mut candidate = Self::hash_of(&sorted);
        loop {
            match self.families.get(&candidate) {
                None => {
                    self.families
                        .insert(candidate, FamilyRecord { components: sorted });
                    return candidate;
                }
                Some(record) if record.components == sorted => return candidate,
                Some(_) => {
                    // Hash collision between two distinct sets: probe forward,
                    // skipping the reserved empty id.
                    candidate = FamilyId(candidate.0.wrapping_add(1));
                    if candidate == FamilyId::EMPTY {
                        candidate = FamilyId(1);
                    }
                }
            }
        }
    }

    fn hash_of(components: &[Entity]) -> FamilyId {
        let mut hasher = ahash::AHasher::default();
        components.len().hash(&mut hasher);
        for c in components {
            c.0.hash(&mut hasher);
        }
        let h = hasher.finish();
        // Reserve 0 for the empty family exclusively.
        FamilyId(if h == 0 { 1 } else { h })
    }

    /// Set algebra: `(base ∪ added) \ removed`, interning the result.
    pub fn merge(&mut self, base: FamilyId, added: FamilyId, removed: FamilyId) -> Result<FamilyId> {
        let base_set = self.components(base)?.to_vec();
        let added_set = self.components(added)?.to_vec();
        let removed_set = self.components(removed)?.to_vec();

        let mut result: FamilyComponents =
            base_set.into_iter().chain(added_set).collect();
        result.sort_unstable();
        result.dedup();
        result.retain(|c| !removed_set.contains(c));

        Ok(self.intern(result))
    }

    /// The family's canonical, ascending-order component sequence.
    pub fn components(&self, id: FamilyId) -> Result<&[Entity]> {
        self.families
            .get(&id)
            .map(|r| r.components.as_slice())
            .ok_or_else(|| {
                invariant_violation::<()>(format!("unknown family id {id:?}")).unwrap_err()
            })
    }

    pub fn contains(&self, id: FamilyId, component: Entity) -> bool {
        self.families
            .get(&id)
            .is_some_and(|r| r.components.binary_search(&component).is_ok())
    }

    /// Is `sub`'s component set a subset of `sup`'s?
    pub fn is_subset(&self, sub: FamilyId, sup: FamilyId) -> bool {
        if sub == sup {
            return true;
        }
        match (self.families.get(&sub), self.families.get(&sup)) {
            (Some(sub_rec), Some(sup_rec)) => sub_rec
                .components
                .iter()
                .all(|c| sup_rec.components.binary_search(c).is_ok()),
            _ => false,
        }
    }
}
