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

//! Entity store: central entity and archetype storage.

use smallvec::SmallVec;

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::archetype::{self, ArchetypeStorage};
use crate::component::{Bundle, Component, ComponentRegistry, ComponentSet, MAX_BUNDLE_COMPONENTS};
use crate::entity::{EntityId, EntityMap, EntityPosition};
use crate::error::Result;
use crate::query::View;

/// Build-time sizing for an [`EntityStore`].
#[derive(Debug, Clone, Copy)]
pub struct EntityStoreConfig {
    pub max_entities: u16,
    pub max_chunks: u16,
    pub chunk_size: u16,
}

/// Accumulates `register::<T>()` calls before the component roster is
/// frozen by [`EntityStoreBuilder::build`].
#[derive(Default)]
pub struct EntityStoreBuilder {
    registry: ComponentRegistry,
}

impl EntityStoreBuilder {
    pub fn new() -> Self {
        Self {
            registry: ComponentRegistry::new(),
        }
    }

    /// Assign `T` a roster index. Idempotent; errors once 32 distinct types
    /// have been registered.
    pub fn register<T: Component>(&mut self) -> Result<u8> {
        self.registry.register::<T>()
    }

    /// Freeze the roster and allocate the store. Fails if `chunk_size` is
    /// too small to hold even a componentless row (index + id columns).
    pub fn build(self, config: EntityStoreConfig) -> Result<EntityStore> {
        archetype::validate_layout(0, &self.registry, config.chunk_size)?;
        Ok(EntityStore {
            entities: EntityMap::with_capacity(config.max_entities),
            storage: ArchetypeStorage::new(config.max_chunks, config.chunk_size),
            registry: self.registry,
        })
    }
}

/// Owns the entity map, archetype-chunked storage, and the frozen component
/// roster. The public typed entity/component API lives here.
pub struct EntityStore {
    entities: EntityMap,
    storage: ArchetypeStorage,
    registry: ComponentRegistry,
}

impl EntityStore {
    pub fn live_count(&self) -> usize {
        self.entities.live_count()
    }

    pub(crate) fn storage(&self) -> &ArchetypeStorage {
        &self.storage
    }

    pub(crate) fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Hand out the next handle. Does not allocate storage; the entity has
    /// no row until its first `add_components`.
    pub fn create_entity(&mut self) -> EntityId {
        let id = self.entities.create_entity();
        #[cfg(feature = "tracing")]
        trace!(entity = id.get(), "created entity");
        id
    }

    /// Remove an entity's row (if it has one) and tombstone its entity-map
    /// slot. A handle that was created but never given a row destroys as a
    /// no-op. Errors `NotFound` only for a handle that was never issued.
    pub fn destroy_entity(&mut self, id: EntityId) -> Result<()> {
        if !self.entities.is_issued(id) {
            return Err(crate::error::EcsError::NotFound);
        }
        if let Some(index) = self.entities.find(id) {
            let position = self.entities.position(index);
            let relocated = self.storage.remove_row(position.archetype_slot as usize, position.row as usize, &self.registry);
            if let Some((moved_emi, moved_row)) = relocated {
                self.entities.set_position(
                    moved_emi as usize,
                    EntityPosition {
                        archetype_slot: position.archetype_slot,
                        row: moved_row as u16,
                    },
                );
            }
            self.entities.tombstone(index);
        }
        #[cfg(feature = "tracing")]
        trace!(entity = id.get(), "destroyed entity");
        Ok(())
    }

    /// Create the entity's first row, or migrate it to the union archetype
    /// if it already has one. New component values overwrite any previous
    /// values for the same types.
    pub fn add_components<B: Bundle>(&mut self, id: EntityId, bundle: B) -> Result<()> {
        if !self.entities.is_issued(id) {
            return Err(crate::error::EcsError::NotFound);
        }
        let addition_mask = B::archetype_mask(&self.registry);
        let (emi, had_row) = self.entities.reserve(id)?;

        if !had_row {
            let addr = match self.storage.add_row(addition_mask, &self.registry, emi as u16, id) {
                Ok(addr) => addr,
                Err(err) => {
                    // `reserve` already committed the entity-map slot; undo
                    // that before propagating, or a retry would find a
                    // stale `Occupied(id)` with a never-set position.
                    self.entities.tombstone(emi);
                    return Err(err);
                }
            };
            self.write_bundle(addr.archetype_slot, addr.row, bundle, 0);
            self.entities.set_position(
                emi,
                EntityPosition {
                    archetype_slot: addr.archetype_slot as u16,
                    row: addr.row as u16,
                },
            );
            #[cfg(feature = "tracing")]
            debug!(entity = id.get(), archetype = addition_mask, "first row");
            return Ok(());
        }

        let position = self.entities.position(emi);
        let current_archetype = self.storage.chunk(position.archetype_slot as usize).archetype();
        let dst_archetype = current_archetype | addition_mask;

        if dst_archetype == current_archetype {
            // Every newly-supplied component type was already present:
            // overwrite in place instead of migrating. The row already
            // holds an initialized value for each, so drop it first.
            self.write_bundle(position.archetype_slot as usize, position.row as usize, bundle, addition_mask);
            return Ok(());
        }

        let (addr, relocated) =
            self.storage
                .transfer_row(dst_archetype, &self.registry, position.archetype_slot as usize, position.row as usize)?;
        if let Some((moved_emi, moved_row)) = relocated {
            self.entities.set_position(
                moved_emi as usize,
                EntityPosition {
                    archetype_slot: position.archetype_slot,
                    row: moved_row as u16,
                },
            );
        }
        // Components the entity already had are carried into the new row by
        // `transfer_row`'s copy, so any of those among the bundle's own
        // members land here already initialized; drop them before overwrite.
        // Members that are new to the entity land on unwritten bytes and
        // must not be dropped.
        self.write_bundle(addr.archetype_slot, addr.row, bundle, addition_mask & current_archetype);
        self.entities.set_position(
            emi,
            EntityPosition {
                archetype_slot: addr.archetype_slot as u16,
                row: addr.row as u16,
            },
        );
        #[cfg(feature = "tracing")]
        debug!(entity = id.get(), archetype = dst_archetype, "migrated row");
        Ok(())
    }

    /// Migrate the entity's row to the difference archetype, or remove the
    /// entity entirely if the result has no components left. Removing
    /// component types the entity doesn't have is a no-op.
    pub fn del_components<S: ComponentSet>(&mut self, id: EntityId) -> Result<()> {
        let emi = self.entities.find(id).ok_or(crate::error::EcsError::NotFound)?;
        let position = self.entities.position(emi);
        let removal_mask = S::archetype_mask(&self.registry);
        let current_archetype = self.storage.chunk(position.archetype_slot as usize).archetype();
        let new_archetype = current_archetype & !removal_mask;

        if new_archetype == current_archetype {
            return Ok(());
        }

        if new_archetype != 0 {
            let (addr, relocated) = self.storage.transfer_row(
                new_archetype,
                &self.registry,
                position.archetype_slot as usize,
                position.row as usize,
            )?;
            if let Some((moved_emi, moved_row)) = relocated {
                self.entities.set_position(
                    moved_emi as usize,
                    EntityPosition {
                        archetype_slot: position.archetype_slot,
                        row: moved_row as u16,
                    },
                );
            }
            self.entities.set_position(
                emi,
                EntityPosition {
                    archetype_slot: addr.archetype_slot as u16,
                    row: addr.row as u16,
                },
            );
        } else {
            let relocated = self.storage.remove_row(position.archetype_slot as usize, position.row as usize, &self.registry);
            if let Some((moved_emi, moved_row)) = relocated {
                self.entities.set_position(
                    moved_emi as usize,
                    EntityPosition {
                        archetype_slot: position.archetype_slot,
                        row: moved_row as u16,
                    },
                );
            }
            self.entities.tombstone(emi);
        }
        #[cfg(feature = "tracing")]
        debug!(entity = id.get(), archetype = new_archetype, "removed components");
        Ok(())
    }

    /// A view iterating every chunk whose archetype is a superset of `S`'s
    /// component mask.
    pub fn select<S: ComponentSet>(&self) -> View<'_, S> {
        View::new(self, S::archetype_mask(&self.registry))
    }

    /// Write `bundle`'s members into `(slot, row)`. `drop_mask` is the set
    /// of the bundle's own component bits whose destination bytes already
    /// hold an initialized value at this row (and so must be dropped before
    /// the overwrite) — pass `0` when writing into a fresh, never-written
    /// row.
    fn write_bundle<B: Bundle>(&mut self, slot: usize, row: usize, bundle: B, drop_mask: archetype::Archetype) {
        let type_ids = B::type_ids();
        let mut ptrs: SmallVec<[*mut u8; MAX_BUNDLE_COMPONENTS]> = SmallVec::with_capacity(type_ids.len());
        for type_id in &type_ids {
            let idx = self
                .registry
                .index_of(*type_id)
                .unwrap_or_else(|| panic!("component type {type_id:?} was never registered"));
            if drop_mask & (1 << idx) != 0 {
                self.storage.drop_component_at(slot, row, idx);
            }
            let size = self.registry.info(idx).size;
            let ptr = self
                .storage
                .component_ptr_mut(slot, row, idx, size)
                .unwrap_or_else(|| panic!("component index {idx} is not present in the destination archetype"));
            ptrs.push(ptr);
        }
        unsafe { bundle.write_components(&ptrs) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EcsError;

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

    fn build_store() -> EntityStore {
        let mut builder = EntityStoreBuilder::new();
        builder.register::<Position>().unwrap();
        builder.register::<Velocity>().unwrap();
        builder
            .build(EntityStoreConfig {
                max_entities: 64,
                max_chunks: 16,
                chunk_size: 1024,
            })
            .unwrap()
    }

    #[test]
    fn create_then_destroy_without_components_is_a_no_op() {
        let mut store = build_store();
        let e = store.create_entity();
        assert!(store.destroy_entity(e).is_ok());
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn destroy_unissued_handle_is_not_found() {
        let mut store = build_store();
        let e = store.create_entity();
        let forged = crate::entity::EntityId::from_raw(e.get() + 1000);
        assert_eq!(store.destroy_entity(forged), Err(EcsError::NotFound));
    }

    #[test]
    fn add_components_creates_first_row() {
        let mut store = build_store();
        let e = store.create_entity();
        store.add_components(e, (Position { x: 1.0, y: 2.0, z: 3.0 },)).unwrap();
        assert_eq!(store.live_count(), 1);
    }

    #[test]
    fn re_adding_same_component_overwrites_in_place() {
        let mut store = build_store();
        let e = store.create_entity();
        store.add_components(e, (Position { x: 1.0, y: 2.0, z: 3.0 },)).unwrap();
        store.add_components(e, (Position { x: 9.0, y: 9.0, z: 9.0 },)).unwrap();

        let view = store.select::<(Position,)>();
        let mut seen = false;
        for sub in view.iter() {
            for p in sub.read::<Position>() {
                assert_eq!(*p, Position { x: 9.0, y: 9.0, z: 9.0 });
                seen = true;
            }
        }
        assert!(seen);
    }

    #[test]
    fn add_then_migrate_then_del_returns_to_original_archetype() {
        let mut store = build_store();
        let e = store.create_entity();
        store.add_components(e, (Position { x: 1.0, y: 2.0, z: 3.0 },)).unwrap();
        store
            .add_components(e, (Velocity { x: 1.0, y: 1.0, z: 1.0 },))
            .unwrap();
        store.del_components::<(Velocity,)>(e).unwrap();

        let view = store.select::<(Position,)>();
        let mut count = 0;
        for sub in view.iter() {
            count += sub.len();
        }
        assert_eq!(count, 1);

        let view = store.select::<(Velocity,)>();
        let mut count = 0;
        for sub in view.iter() {
            count += sub.len();
        }
        assert_eq!(count, 0);
    }

    #[test]
    fn del_components_to_empty_archetype_removes_entity() {
        let mut store = build_store();
        let e = store.create_entity();
        store.add_components(e, (Position { x: 1.0, y: 2.0, z: 3.0 },)).unwrap();
        store.del_components::<(Position,)>(e).unwrap();
        assert_eq!(store.live_count(), 0);
        assert_eq!(store.destroy_entity(e), Ok(()));
    }

    #[test]
    fn scenario_a_select_yields_expected_subsets() {
        let mut store = build_store();
        let e1 = store.create_entity();
        let e2 = store.create_entity();
        let e3 = store.create_entity();

        store.add_components(e1, (Position { x: 1.0, y: 2.0, z: 3.0 },)).unwrap();
        store
            .add_components(
                e2,
                (
                    Position {
                        x: 10.0,
                        y: 20.0,
                        z: 30.0,
                    },
                    Velocity { x: 10.0, y: 0.0, z: 1.0 },
                ),
            )
            .unwrap();
        store.add_components(e1, (Velocity { x: 1.0, y: 1.0, z: 1.0 },)).unwrap();
        store.add_components(e3, (Position { x: 1.0, y: 2.0, z: 3.0 },)).unwrap();
        store.del_components::<(Velocity,)>(e2).unwrap();

        let mut both_ids: Vec<u32> = Vec::new();
        for sub in store.select::<(Position, Velocity)>().iter() {
            both_ids.extend(sub.ids().iter().map(|id| id.get()));
        }
        assert_eq!(both_ids, vec![e1.get()]);

        let mut position_ids: Vec<u32> = Vec::new();
        for sub in store.select::<(Position,)>().iter() {
            position_ids.extend(sub.ids().iter().map(|id| id.get()));
        }
        position_ids.sort_unstable();
        let mut expected = vec![e1.get(), e2.get(), e3.get()];
        expected.sort_unstable();
        assert_eq!(position_ids, expected);
    }
}
