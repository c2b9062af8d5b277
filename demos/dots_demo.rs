//! Reproduces the original `DOTS::Entities` / `DOTS::JobSystem` demo scenario:
//! three entities, a job applying `Position += Velocity`, and a
//! `schedule_not_concurrent` barrier job that prints the result.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use glam::Vec3;
use parking_lot::Condvar;

use dots_ecs::job::{JobSystem, JobSystemConfig};
use dots_ecs::{EntityStoreBuilder, EntityStoreConfig};

#[derive(Debug, Clone, Copy)]
struct Position(Vec3);

#[derive(Debug, Clone, Copy)]
struct Velocity(Vec3);

#[derive(Debug, Clone, Copy)]
struct Health(u32);

fn main() {
    let mut builder = EntityStoreBuilder::new();
    builder.register::<Position>().unwrap();
    builder.register::<Velocity>().unwrap();
    builder.register::<Health>().unwrap();
    let store = builder
        .build(EntityStoreConfig {
            max_entities: 1000,
            max_chunks: 100,
            chunk_size: 1024 * 16,
        })
        .unwrap();
    let store = Arc::new(Mutex::new(store));

    let system = JobSystem::new(JobSystemConfig {
        queue_capacity: 64,
        caller_also_works: false,
    });
    println!("{}", system.worker_count());

    let (first, second, third) = {
        let mut store = store.lock().unwrap();
        let first = store.create_entity();
        let second = store.create_entity();
        let third = store.create_entity();
        store.add_components(first, (Position(Vec3::new(1.0, 2.0, 3.0)),)).unwrap();
        store
            .add_components(
                second,
                (Position(Vec3::new(10.0, 20.0, 30.0)), Velocity(Vec3::new(10.0, 0.0, 1.0))),
            )
            .unwrap();
        store.add_components(first, (Velocity(Vec3::new(1.0, 1.0, 1.0)),)).unwrap();
        store.add_components(third, (Position(Vec3::new(1.0, 2.0, 3.0)),)).unwrap();
        store.del_components::<(Velocity,)>(second).unwrap();
        (first, second, third)
    };
    let _ = (first, second, third);

    {
        let store = Arc::clone(&store);
        system.schedule(move || {
            let store = store.lock().unwrap();
            for sub in store.select::<(Position, Velocity)>().iter() {
                let positions = sub.write::<Position>();
                let velocities = sub.read::<Velocity>();
                for (p, v) in positions.iter_mut().zip(velocities.iter()) {
                    p.0 += v.0;
                }
            }
        });
    }

    let done = Arc::new((Mutex::new(false), Condvar::new()));

    {
        let store = Arc::clone(&store);
        system.schedule_not_concurrent(move || {
            let store = store.lock().unwrap();
            for sub in store.select::<(Position,)>().iter() {
                for (id, p) in sub.ids().iter().zip(sub.read::<Position>().iter()) {
                    println!("Entity {id} position: {} {} {}", p.0.x, p.0.y, p.0.z);
                }
            }
        });
    }

    {
        let done = Arc::clone(&done);
        system.schedule(move || {
            let (finished, cvar) = &*done;
            *finished.lock().unwrap() = true;
            cvar.notify_one();
        });
    }

    let (finished, cvar) = &*done;
    let mut guard = finished.lock().unwrap();
    if !*guard {
        let (new_guard, _) = cvar.wait_for(guard, Duration::from_secs(5));
        guard = new_guard;
    }
    debug_assert!(*guard, "demo jobs did not complete in time");
}
