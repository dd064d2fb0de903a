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

//! Error types

use std::fmt;

use crate::entity::Entity;

/// ECS error type
///
/// Every public operation returns `Ok` or one of these. `InternalInvariant`
/// is the exception: it marks a detected violation of the storage
/// invariants and is fatal (see [`EcsError::is_fatal`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// A handle used where a component is required does not carry a
    /// component descriptor.
    NotAComponent(Entity),

    /// A handle is zero, or not present in the entity directory.
    NotAnEntity(Entity),

    /// `get`/`set` for a component the entity does not and will not carry.
    ComponentNotInFamily { entity: Entity, component: Entity },

    /// Buffer growth failed.
    OutOfMemory,

    /// A detected violation of the storage invariants. Fatal: the world is
    /// poisoned and must not be used further.
    InternalInvariant(String),

    /// `world_progress` was called while a frame was already in progress.
    FrameReentrant,
}

impl EcsError {
    /// `InternalInvariant` is non-recoverable; every other variant is an
    /// ordinary, catchable failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EcsError::InternalInvariant(_))
    }
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::NotAComponent(e) => write!(f, "handle {e:?} is not a component"),
            EcsError::NotAnEntity(e) => write!(f, "handle {e:?} is not a live entity"),
            EcsError::ComponentNotInFamily { entity, component } => write!(
                f,
                "entity {entity:?} does not carry component {component:?}"
            ),
            EcsError::OutOfMemory => write!(f, "out of memory"),
            EcsError::InternalInvariant(msg) => write!(f, "internal invariant violated: {msg}"),
            EcsError::FrameReentrant => write!(f, "world_progress called re-entrantly"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;

/// Raise an `InternalInvariant` failure. In debug builds this terminates the
/// process immediately, matching the spec's "fatal; the world is poisoned"
/// contract; in release builds it is returned as an ordinary error for the
/// caller to surface.
pub(crate) fn invariant_violation<T>(msg: impl Into<String>) -> Result<T> {
    let msg = msg.into();
    if cfg!(debug_assertions) {
        panic!("internal invariant violated: {msg}");
    }
    Err(EcsError::InternalInvariant(msg))
}
