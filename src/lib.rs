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

//! Archetype-table ECS core: a family registry, columnar table storage, and
//! deferred-mutation staging, dispatched through a serial system schedule.

pub mod archetype;
pub mod component;
pub mod entity;
pub mod error;
pub mod family;
pub mod schedule;
pub mod stage;
pub mod system;
pub mod utils;
pub mod world;

pub use archetype::Table;
pub use component::{ComponentDescriptor, ComponentRegistry};
pub use entity::{Entity, EntityAllocator};
pub use error::{EcsError, Result};
pub use family::{FamilyComponents, FamilyId, FamilyRegistry};
pub use schedule::{PhaseId, Schedule};
pub use stage::Stage;
pub use system::{BoxedSystem, Cursor, System};
pub use world::World;
