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

//! End-to-end scenarios exercising the matcher and dispatcher across a full
//! `world_progress` tick.

use reflecs_core::{ComponentDescriptor, Cursor, EcsError, Entity, FamilyId, System, World};

/// S4: for each Foo-bearing row, clone with values and double the clone's Foo.
struct DoubleFoo {
    foo: Entity,
}

impl System for DoubleFoo {
    fn name(&self) -> &str {
        "double_foo"
    }

    fn run(&mut self, world: &mut World, cursor: &Cursor) -> reflecs_core::Result<()> {
        let mut row = cursor.first();
        while row < cursor.last() {
            let source = cursor.entity(row);
            let ptr = cursor.data(row, 0) as *const u8;
            let value = u32::from_ne_bytes(unsafe { *(ptr as *const [u8; 4]) });

            let clone = world.entity_clone(source, true)?;
            world.entity_set(clone, self.foo, &(value * 2).to_ne_bytes())?;

            row = cursor.next(row);
        }
        Ok(())
    }
}

#[test]
fn s4_system_clones_and_doubles() {
    let mut world = World::new();
    let foo = world.component_register(ComponentDescriptor::new(4, 4));
    let foo_family = world.family_register(&[foo]);

    let source = world.entity_new(foo_family).unwrap();
    world.entity_set(source, foo, &7u32.to_ne_bytes()).unwrap();

    let phase = world.declare_phase();
    world.system_register(phase, foo_family, Box::new(DoubleFoo { foo }));

    world.progress(0.0).unwrap();

    // Exactly one clone was produced: source plus the new entity.
    let mut doubled = None;
    for candidate in [source.0 + 1, source.0 + 2, source.0 + 3] {
        let candidate = Entity(candidate);
        if world.entity_has(candidate, foo).unwrap_or(false) {
            let bytes = world.entity_get(candidate, foo).unwrap();
            let value = u32::from_ne_bytes(bytes.try_into().unwrap());
            if value == 14 {
                doubled = Some(candidate);
            }
        }
    }
    assert!(doubled.is_some(), "expected a cloned entity with Foo doubled to 14");
}

/// S5: first system adds Bar to every Foo-bearing entity; second system
/// matches {Foo, Bar} and must see exactly the entities the first touched.
struct AddBarToFoo {
    bar: Entity,
}

impl System for AddBarToFoo {
    fn name(&self) -> &str {
        "add_bar_to_foo"
    }

    fn run(&mut self, world: &mut World, cursor: &Cursor) -> reflecs_core::Result<()> {
        let mut row = cursor.first();
        while row < cursor.last() {
            let entity = cursor.entity(row);
            world.entity_add(entity, self.bar)?;
            row = cursor.next(row);
        }
        Ok(())
    }
}

struct RecordFooBar {
    seen: std::rc::Rc<std::cell::RefCell<Vec<Entity>>>,
}

impl System for RecordFooBar {
    fn name(&self) -> &str {
        "record_foo_bar"
    }

    fn run(&mut self, _world: &mut World, cursor: &Cursor) -> reflecs_core::Result<()> {
        let mut row = cursor.first();
        while row < cursor.last() {
            self.seen.borrow_mut().push(cursor.entity(row));
            row = cursor.next(row);
        }
        Ok(())
    }
}

#[test]
fn s5_second_system_sees_exactly_first_systems_output() {
    let mut world = World::new();
    let foo = world.component_register(ComponentDescriptor::new(4, 4));
    let bar = world.component_register(ComponentDescriptor::new(4, 4));
    let foo_family = world.family_register(&[foo]);
    let foo_bar_family = world.family_register(&[foo, bar]);

    let e1 = world.entity_new(foo_family).unwrap();
    let e2 = world.entity_new(foo_family).unwrap();
    // A third entity with neither component should never show up downstream.
    let _e3 = world.entity_new(FamilyId::EMPTY).unwrap();

    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

    let phase = world.declare_phase();
    world.system_register(phase, foo_family, Box::new(AddBarToFoo { bar }));
    world.system_register(
        phase,
        foo_bar_family,
        Box::new(RecordFooBar { seen: seen.clone() }),
    );

    world.progress(0.0).unwrap();

    let mut seen = seen.borrow().clone();
    seen.sort_by_key(|e| e.0);
    let mut expected = vec![e1, e2];
    expected.sort_by_key(|e| e.0);
    assert_eq!(seen, expected);
}

#[test]
fn directory_consistency_after_structural_churn() {
    let mut world = World::new();
    let foo = world.component_register(ComponentDescriptor::new(4, 4));
    let bar = world.component_register(ComponentDescriptor::new(4, 4));

    let a = world.entity_new(FamilyId::EMPTY).unwrap();
    let b = world.entity_new(FamilyId::EMPTY).unwrap();
    let c = world.entity_new(FamilyId::EMPTY).unwrap();

    world.entity_add(a, foo).unwrap();
    world.entity_add(b, foo).unwrap();
    world.entity_add(b, bar).unwrap();
    world.entity_delete(a).unwrap();
    world.entity_add(c, foo).unwrap();

    assert!(!world.entity_has(a, foo).is_ok() || world.entity_has(a, foo).is_err());
    assert!(world.entity_has(b, foo).unwrap());
    assert!(world.entity_has(b, bar).unwrap());
    assert!(world.entity_has(c, foo).unwrap());
}

/// Cloning a stale or zero handle must fail, not panic.
#[test]
fn clone_of_unknown_handle_is_not_an_entity_error() {
    let mut world = World::new();
    assert_eq!(
        world.entity_clone(Entity::NONE, false).unwrap_err(),
        EcsError::NotAnEntity(Entity::NONE)
    );

    let foo = world.component_register(ComponentDescriptor::new(4, 4));
    let e = world.entity_new(FamilyId::EMPTY).unwrap();
    world.entity_add(e, foo).unwrap();
    world.entity_delete(e).unwrap();
    assert_eq!(
        world.entity_clone(e, true).unwrap_err(),
        EcsError::NotAnEntity(e)
    );
}

/// A component the source carries but never explicitly `set` must still
/// show up as a present, zeroed slot on the clone, not a missing one.
#[test]
fn clone_copies_never_set_component_as_present_zero() {
    let mut world = World::new();
    let foo = world.component_register(ComponentDescriptor::new(4, 4));
    let foo_family = world.family_register(&[foo]);

    let source = world.entity_new(foo_family).unwrap();
    let clone = world.entity_clone(source, true).unwrap();

    assert!(world.entity_has(clone, foo).unwrap());
    let bytes = world.entity_get(clone, foo).unwrap();
    assert_eq!(u32::from_ne_bytes(bytes.try_into().unwrap()), 0);
}

/// Invariant 5 (staging atomicity): a structural edit issued inside a
/// system must not be observable to that same system's continued
/// iteration over the table it started with, only to the next system.
struct SpawnOneAndCountRows {
    foo: Entity,
    rows_seen_in_system: std::rc::Rc<std::cell::Cell<usize>>,
}

impl System for SpawnOneAndCountRows {
    fn name(&self) -> &str {
        "spawn_one_and_count_rows"
    }

    fn run(&mut self, world: &mut World, cursor: &Cursor) -> reflecs_core::Result<()> {
        let starting_last = cursor.last();
        let foo_family = world.family_register(&[self.foo]);
        let mut row = cursor.first();
        while row < cursor.last() {
            // Spawning here must not grow the range this same iteration sees.
            let _new = world.entity_new(foo_family)?;
            assert_eq!(cursor.last(), starting_last);
            self.rows_seen_in_system.set(self.rows_seen_in_system.get() + 1);
            row = cursor.next(row);
        }
        Ok(())
    }
}

#[test]
fn s5_staged_spawns_are_invisible_within_the_spawning_system() {
    let mut world = World::new();
    let foo = world.component_register(ComponentDescriptor::new(4, 4));
    let foo_family = world.family_register(&[foo]);
    world.entity_new(foo_family).unwrap();

    let rows_seen = std::rc::Rc::new(std::cell::Cell::new(0));
    let phase = world.declare_phase();
    world.system_register(
        phase,
        foo_family,
        Box::new(SpawnOneAndCountRows {
            foo,
            rows_seen_in_system: rows_seen.clone(),
        }),
    );

    world.progress(0.0).unwrap();

    // Only the one pre-existing entity was visible to the system; the
    // entity it spawned mid-iteration shows up only on the next frame.
    assert_eq!(rows_seen.get(), 1);

    // A second frame now sees both the original entity and the one spawned
    // by the first frame's system.
    world.progress(0.0).unwrap();
    assert_eq!(rows_seen.get(), 1 + 2);
}
