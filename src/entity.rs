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

//! Entity identifiers, position bookkeeping, and the open-addressed entity map.

use std::fmt;
use std::num::NonZeroU32;

use crate::error::{EcsError, Result};
use crate::prime::first_prime_greater_than;

/// Opaque entity identifier.
///
/// Handles are generated by a monotonically increasing counter starting at
/// 1; zero is reserved and never handed out. Handles are never reused, even
/// after the entity they named is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntityId(NonZeroU32);

impl EntityId {
    fn new(value: u32) -> Self {
        Self(NonZeroU32::new(value).expect("entity handle counter must never yield zero"))
    }

    /// Reconstruct a handle previously obtained from [`EntityId::get`].
    ///
    /// Only used internally to read back handles the store itself wrote
    /// into a chunk's id column, which are always non-zero.
    pub(crate) fn from_raw(value: u32) -> Self {
        Self::new(value)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity location: which archetype-map slot and which row within its chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityPosition {
    pub archetype_slot: u16,
    pub row: u16,
}

/// State of one entity-map slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntitySlot {
    Empty,
    Tombstone,
    Occupied(EntityId),
}

/// Fixed-capacity, open-addressed table mapping [`EntityId`] to
/// [`EntityPosition`], with linear probing and wraparound.
pub struct EntityMap {
    slots: Vec<EntitySlot>,
    positions: Vec<EntityPosition>,
    next_id: u32,
    live_count: usize,
}

impl EntityMap {
    /// `capacity` is the configured `MAX_ENTITIES`; the table itself is
    /// sized to the first prime greater than it, per the distilled spec.
    pub fn with_capacity(capacity: u16) -> Self {
        let table_capacity = first_prime_greater_than(capacity) as usize;
        Self {
            slots: vec![EntitySlot::Empty; table_capacity],
            positions: vec![EntityPosition { archetype_slot: 0, row: 0 }; table_capacity],
            next_id: 1,
            live_count: 0,
        }
    }

    pub fn table_capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// `createEntity`: hand out the next handle. Does not touch the table.
    pub fn create_entity(&mut self) -> EntityId {
        let id = EntityId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Whether `id` has ever been handed out by [`EntityMap::create_entity`],
    /// regardless of whether it currently has a row (or ever had one). A
    /// handle outside this range could only be forged by the caller.
    pub fn is_issued(&self, id: EntityId) -> bool {
        id.get() < self.next_id
    }

    /// `findEntityMapIndex`: lookup-only probe. Both `Empty` and
    /// `Tombstone` terminate the walk.
    pub fn find(&self, id: EntityId) -> Option<usize> {
        let capacity = self.slots.len();
        let start = (id.get() as usize) % capacity;
        for offset in 0..capacity {
            let i = (start + offset) % capacity;
            match self.slots[i] {
                EntitySlot::Occupied(slot_id) if slot_id == id => return Some(i),
                EntitySlot::Empty | EntitySlot::Tombstone => return None,
                EntitySlot::Occupied(_) => continue,
            }
        }
        None
    }

    /// `findAvailableEntityMapIndex`: insert-or-find probe. A tombstone is
    /// remembered as a fallback insertion point rather than terminating the
    /// walk; if the walk later reaches `Empty` having passed a tombstone,
    /// the remembered tombstone is returned instead (compaction).
    fn find_available(&self, id: EntityId) -> Result<usize> {
        let capacity = self.slots.len();
        let start = (id.get() as usize) % capacity;
        let mut remembered_tombstone: Option<usize> = None;

        for offset in 0..capacity {
            let i = (start + offset) % capacity;
            match self.slots[i] {
                EntitySlot::Occupied(slot_id) if slot_id == id => return Ok(i),
                EntitySlot::Empty => return Ok(remembered_tombstone.unwrap_or(i)),
                EntitySlot::Tombstone => {
                    if remembered_tombstone.is_none() {
                        remembered_tombstone = Some(i);
                    }
                }
                EntitySlot::Occupied(_) => {}
            }
        }

        remembered_tombstone.ok_or(EcsError::OutOfSpace)
    }

    /// Reserve (or find) a slot for `id`, marking it occupied. Returns the
    /// slot index and whether the entity already had a row (`true`) or this
    /// is its first insertion (`false`).
    pub fn reserve(&mut self, id: EntityId) -> Result<(usize, bool)> {
        let index = self.find_available(id)?;
        let had_row = matches!(self.slots[index], EntitySlot::Occupied(existing) if existing == id);
        if !had_row {
            self.live_count += 1;
        }
        self.slots[index] = EntitySlot::Occupied(id);
        Ok((index, had_row))
    }

    pub fn position(&self, index: usize) -> EntityPosition {
        self.positions[index]
    }

    pub fn set_position(&mut self, index: usize, position: EntityPosition) {
        self.positions[index] = position;
    }

    /// Tombstone a previously-occupied slot.
    pub fn tombstone(&mut self, index: usize) {
        self.slots[index] = EntitySlot::Tombstone;
        self.live_count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_entity_increments_monotonically() {
        let mut map = EntityMap::with_capacity(8);
        let a = map.create_entity();
        let b = map.create_entity();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
    }

    #[test]
    fn reserve_then_find_round_trips() {
        let mut map = EntityMap::with_capacity(8);
        let id = map.create_entity();
        let (index, had_row) = map.reserve(id).unwrap();
        assert!(!had_row);
        assert_eq!(map.find(id), Some(index));
    }

    #[test]
    fn tombstoned_slot_is_not_found_but_is_reused() {
        let mut map = EntityMap::with_capacity(8);
        let id = map.create_entity();
        let (index, _) = map.reserve(id).unwrap();
        map.tombstone(index);
        assert_eq!(map.find(id), None);

        // A colliding handle (same slot modulo table capacity) should be
        // able to reclaim the tombstoned slot via compaction.
        let table_capacity = map.table_capacity();
        let next = map.create_entity();
        let colliding = EntityId::new(next.get() + table_capacity as u32);
        let (reused_index, had_row) = map.reserve(colliding).unwrap();
        assert!(!had_row);
        assert_eq!(reused_index, index);
    }

    #[test]
    fn out_of_space_when_table_is_full_of_live_entries() {
        let mut map = EntityMap::with_capacity(2);
        let capacity = map.table_capacity();
        for _ in 0..capacity {
            let id = map.create_entity();
            map.reserve(id).unwrap();
        }
        let overflow = map.create_entity();
        assert_eq!(map.reserve(overflow), Err(EcsError::OutOfSpace));
    }
}
