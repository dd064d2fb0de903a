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

//! Components: entities that additionally carry a data descriptor.
//!
//! A component is identified by its [`Entity`] handle like anything else in
//! the world; what makes it a component is the presence of a
//! [`ComponentDescriptor`] in the [`ComponentRegistry`].

use rustc_hash::FxHashMap;

use crate::entity::Entity;

/// Size and alignment of a component's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentDescriptor {
    pub size: usize,
    pub align: usize,
}

impl ComponentDescriptor {
    pub fn new(size: usize, align: usize) -> Self {
        Self { size, align }
    }

    /// Descriptor for a concrete Rust type, for embedders that know their
    /// component types at compile time.
    pub fn of<T>() -> Self {
        Self {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
        }
    }
}

/// Tracks which entities are components, and their descriptors.
#[derive(Default)]
pub struct ComponentRegistry {
    descriptors: FxHashMap<Entity, ComponentDescriptor>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component: Entity, descriptor: ComponentDescriptor) {
        self.descriptors.insert(component, descriptor);
    }

    pub fn descriptor(&self, component: Entity) -> Option<ComponentDescriptor> {
        self.descriptors.get(&component).copied()
    }

    pub fn is_component(&self, handle: Entity) -> bool {
        self.descriptors.contains_key(&handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_of_matches_layout() {
        let d = ComponentDescriptor::of::<u64>();
        assert_eq!(d.size, 8);
        assert_eq!(d.align, 8);
    }

    #[test]
    fn registry_tracks_registered_handles() {
        let mut reg = ComponentRegistry::new();
        let c = Entity(7);
        assert!(!reg.is_component(c));
        reg.register(c, ComponentDescriptor::new(4, 4));
        assert!(reg.is_component(c));
        assert_eq!(reg.descriptor(c), Some(ComponentDescriptor::new(4, 4)));
    }
}
