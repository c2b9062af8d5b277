//! End-to-end scenario tests mirroring the entity-store/job-system
//! walkthrough used to validate this crate's behavior against the original.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dots_ecs::job::{JobSystem, JobSystemConfig};
use dots_ecs::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health(u32);

fn build_store() -> EntityStore {
    let mut builder = EntityStoreBuilder::new();
    builder.register::<Position>().unwrap();
    builder.register::<Velocity>().unwrap();
    builder.register::<Health>().unwrap();
    builder
        .build(EntityStoreConfig {
            max_entities: 64,
            max_chunks: 16,
            chunk_size: 1024,
        })
        .unwrap()
}

fn wait_for(predicate: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !predicate() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    true
}

#[test]
fn scenario_a_select_yields_expected_subsets() {
    let mut store = build_store();
    let e1 = store.create_entity();
    let e2 = store.create_entity();
    let e3 = store.create_entity();
    assert_eq!((e1.get(), e2.get(), e3.get()), (1, 2, 3));

    store.add_components(e1, (Position { x: 1.0, y: 2.0, z: 3.0 },)).unwrap();
    store
        .add_components(
            e2,
            (
                Position { x: 10.0, y: 20.0, z: 30.0 },
                Velocity { x: 10.0, y: 0.0, z: 1.0 },
            ),
        )
        .unwrap();
    store.add_components(e1, (Velocity { x: 1.0, y: 1.0, z: 1.0 },)).unwrap();
    store.add_components(e3, (Position { x: 1.0, y: 2.0, z: 3.0 },)).unwrap();
    store.del_components::<(Velocity,)>(e2).unwrap();

    let mut both: Vec<u32> = store
        .select::<(Position, Velocity)>()
        .iter()
        .flat_map(|sub| sub.ids().iter().map(|id| id.get()).collect::<Vec<_>>())
        .collect();
    both.sort_unstable();
    assert_eq!(both, vec![e1.get()]);

    let mut positions: Vec<u32> = store
        .select::<(Position,)>()
        .iter()
        .flat_map(|sub| sub.ids().iter().map(|id| id.get()).collect::<Vec<_>>())
        .collect();
    positions.sort_unstable();
    let mut expected = vec![e1.get(), e2.get(), e3.get()];
    expected.sort_unstable();
    assert_eq!(positions, expected);
}

#[test]
fn scenario_b_applying_velocity_leaves_velocityless_entities_untouched() {
    let mut store = build_store();
    let e1 = store.create_entity();
    let e2 = store.create_entity();
    store.add_components(e1, (Position { x: 1.0, y: 2.0, z: 3.0 },)).unwrap();
    store
        .add_components(
            e2,
            (
                Position { x: 10.0, y: 20.0, z: 30.0 },
                Velocity { x: 10.0, y: 0.0, z: 1.0 },
            ),
        )
        .unwrap();
    store.add_components(e1, (Velocity { x: 1.0, y: 1.0, z: 1.0 },)).unwrap();

    for sub in store.select::<(Position, Velocity)>().iter() {
        let positions = sub.write::<Position>();
        let velocities = sub.read::<Velocity>();
        for (p, v) in positions.iter_mut().zip(velocities.iter()) {
            p.x += v.x;
            p.y += v.y;
            p.z += v.z;
        }
    }

    let mut found = 0;
    for sub in store.select::<(Position,)>().iter() {
        for (&id, &p) in sub.ids().iter().zip(sub.read::<Position>().iter()) {
            if id == e1 {
                assert_eq!(p, Position { x: 2.0, y: 3.0, z: 4.0 });
                found += 1;
            } else if id == e2 {
                assert_eq!(p, Position { x: 10.0, y: 20.0, z: 30.0 });
                found += 1;
            }
        }
    }
    assert_eq!(found, 2);
}

#[test]
fn scenario_c_barrier_sees_every_append_scheduled_before_it() {
    let system = JobSystem::new(JobSystemConfig {
        queue_capacity: 64,
        caller_also_works: false,
    });
    if system.worker_count() < 2 {
        // Nothing to serialize against on a single-core machine; the
        // barrier short-circuits (see DESIGN.md), so this scenario doesn't
        // apply.
        return;
    }

    let shared = Arc::new(Mutex::new(Vec::<u32>::new()));
    let observed = Arc::new(AtomicUsize::new(usize::MAX));

    for i in 0..10 {
        let shared = Arc::clone(&shared);
        system.schedule(move || shared.lock().unwrap().push(i));
    }

    {
        let shared = Arc::clone(&shared);
        let observed = Arc::clone(&observed);
        system.schedule_not_concurrent(move || {
            observed.store(shared.lock().unwrap().len(), Ordering::SeqCst);
        });
    }

    for i in 10..20 {
        let shared = Arc::clone(&shared);
        system.schedule(move || shared.lock().unwrap().push(i));
    }

    assert!(wait_for(|| observed.load(Ordering::SeqCst) != usize::MAX, Duration::from_secs(5)));
    assert_eq!(observed.load(Ordering::SeqCst), 10);
    assert!(wait_for(|| shared.lock().unwrap().len() == 20, Duration::from_secs(5)));
}

// Exact bucket-collision probing (the earliest-tombstone-wins rule this
// scenario describes) is exercised at the table level by
// `entity::tests::tombstoned_slot_is_not_found_but_is_reused`, which has
// direct access to the table's capacity to construct a colliding handle.
// This test instead checks the observable behavior through the public
// `EntityStore` API: a destroyed entity's slot doesn't linger, and the next
// entity reuses the vacancy rather than growing the live set.
#[test]
fn scenario_d_destroyed_entity_slot_is_reclaimed_by_the_next_created_entity() {
    let mut store = build_store();
    let a = store.create_entity();
    store.add_components(a, (Health(10),)).unwrap();
    store.destroy_entity(a).unwrap();
    assert_eq!(store.live_count(), 0);

    let b = store.create_entity();
    store.add_components(b, (Health(20),)).unwrap();
    assert_eq!(store.live_count(), 1);

    let values: Vec<u32> = store
        .select::<(Health,)>()
        .iter()
        .flat_map(|sub| sub.read::<Health>().iter().map(|h| h.0).collect::<Vec<_>>())
        .collect();
    assert_eq!(values, vec![20]);
}

#[test]
fn scenario_e_archetype_overflows_across_three_chunks() {
    let mut builder = EntityStoreBuilder::new();
    builder.register::<Position>().unwrap();
    let mut store = builder
        .build(EntityStoreConfig {
            max_entities: 256,
            max_chunks: 8,
            chunk_size: 64,
        })
        .unwrap();

    // Insert one at a time until a third archetype-map slot materializes —
    // this happens exactly at the (2K+1)-th row for whatever per-chunk
    // capacity K this layout works out to, without this test needing to
    // know K itself.
    let mut inserted = 0;
    let mut slot_count = 0;
    while slot_count < 3 {
        let e = store.create_entity();
        store.add_components(e, (Position { x: 1.0, y: 1.0, z: 1.0 },)).unwrap();
        inserted += 1;
        slot_count = store.select::<(Position,)>().iter().count();
        assert!(inserted <= 256, "never reached a third slot within max_entities");
    }

    assert_eq!(slot_count, 3);
    let total_rows: usize = store.select::<(Position,)>().iter().map(|sub| sub.len()).sum();
    assert_eq!(total_rows, inserted);
    assert_eq!(store.live_count(), inserted);
}
