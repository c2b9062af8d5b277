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

//! Archetype-chunked column storage: fixed-size byte chunks addressed by
//! offset rather than raw pointer, and the open-addressed archetype map.

use crate::bitset::BitSet;
use crate::component::{Component, ComponentRegistry, MAX_COMPONENTS};
use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::prime::first_prime_greater_than;

/// Bitmask over the component roster; bit `i` set means component `i` (by
/// registry index) is present.
pub type Archetype = u32;

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Byte-offset layout for one archetype's columns within a `CHUNK_SIZE`
/// buffer, computed once when a chunk is first claimed for that archetype.
struct ChunkLayout {
    capacity: u16,
    index_offset: usize,
    id_offset: usize,
    component_offsets: [Option<usize>; MAX_COMPONENTS],
}

fn compute_layout(archetype: Archetype, registry: &ComponentRegistry, chunk_size: u16) -> Result<ChunkLayout> {
    let members: Vec<(u8, usize, usize)> = (0..registry.len() as u8)
        .filter(|&i| archetype & (1 << i) != 0)
        .map(|i| {
            let info = registry.info(i);
            (i, info.size, info.align)
        })
        .collect();

    let row_stride_unaligned =
        std::mem::size_of::<u16>() + std::mem::size_of::<u32>() + members.iter().map(|(_, s, _)| s).sum::<usize>();

    let mut capacity = (chunk_size as usize / row_stride_unaligned.max(1)) as u16;

    loop {
        if capacity == 0 {
            return Err(EcsError::CapacityTooSmall(format!(
                "chunk_size {chunk_size} cannot hold one row (stride {row_stride_unaligned} bytes, before alignment padding) of archetype {archetype:#010x}"
            )));
        }
        let cap = capacity as usize;
        let mut offset = 0usize;

        offset = align_up(offset, std::mem::align_of::<u16>());
        let index_offset = offset;
        offset += cap * std::mem::size_of::<u16>();

        offset = align_up(offset, std::mem::align_of::<u32>());
        let id_offset = offset;
        offset += cap * std::mem::size_of::<u32>();

        let mut component_offsets = [None; MAX_COMPONENTS];
        for &(idx, size, align) in &members {
            offset = align_up(offset, align);
            component_offsets[idx as usize] = Some(offset);
            offset += cap * size;
        }

        if offset <= chunk_size as usize {
            return Ok(ChunkLayout {
                capacity,
                index_offset,
                id_offset,
                component_offsets,
            });
        }
        capacity -= 1;
    }
}

/// Check that `archetype` can be realized within `chunk_size` bytes,
/// without claiming a chunk. Used at store-construction time to reject an
/// unworkable `(chunk_size, roster)` combination up front.
pub(crate) fn validate_layout(archetype: Archetype, registry: &ComponentRegistry, chunk_size: u16) -> Result<()> {
    compute_layout(archetype, registry, chunk_size).map(|_| ())
}

/// Fixed-size, column-major storage for a contiguous run of rows of one
/// archetype. The payload lives in a word-aligned byte buffer addressed by
/// offset (see the module docs): an `index` column (row -> entity-map
/// index), an `id` column (row -> [`EntityId`]), then one column per
/// component present in the archetype.
pub struct Chunk {
    archetype: Archetype,
    size: u16,
    capacity: u16,
    index_offset: usize,
    id_offset: usize,
    component_offsets: [Option<usize>; MAX_COMPONENTS],
    component_sizes: [usize; MAX_COMPONENTS],
    drop_fns: [Option<unsafe fn(*mut u8)>; MAX_COMPONENTS],
    buffer: Box<[u64]>,
}

impl Chunk {
    fn setup(archetype: Archetype, registry: &ComponentRegistry, chunk_size: u16) -> Result<Self> {
        let layout = compute_layout(archetype, registry, chunk_size)?;
        let words = (chunk_size as usize).div_ceil(8);

        let mut component_sizes = [0usize; MAX_COMPONENTS];
        let mut drop_fns = [None; MAX_COMPONENTS];
        for idx in 0..registry.len() as u8 {
            if layout.component_offsets[idx as usize].is_some() {
                let info = registry.info(idx);
                component_sizes[idx as usize] = info.size;
                drop_fns[idx as usize] = info.drop_fn;
            }
        }

        Ok(Self {
            archetype,
            size: 0,
            capacity: layout.capacity,
            index_offset: layout.index_offset,
            id_offset: layout.id_offset,
            component_offsets: layout.component_offsets,
            component_sizes,
            drop_fns,
            buffer: vec![0u64; words].into_boxed_slice(),
        })
    }

    pub fn archetype(&self) -> Archetype {
        self.archetype
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    fn byte_ptr(&self) -> *const u8 {
        self.buffer.as_ptr() as *const u8
    }

    fn byte_ptr_mut(&mut self) -> *mut u8 {
        self.buffer.as_mut_ptr() as *mut u8
    }

    /// Entity-map indices of the rows currently in use.
    pub fn row_indices(&self) -> &[u16] {
        unsafe {
            let ptr = self.byte_ptr().add(self.index_offset) as *const u16;
            std::slice::from_raw_parts(ptr, self.size as usize)
        }
    }

    /// Entity handles of the rows currently in use.
    pub fn ids(&self) -> &[EntityId] {
        unsafe {
            let ptr = self.byte_ptr().add(self.id_offset) as *const EntityId;
            std::slice::from_raw_parts(ptr, self.size as usize)
        }
    }

    pub fn has_component(&self, idx: u8) -> bool {
        self.component_offsets[idx as usize].is_some()
    }

    /// Read a typed component column. Panics if `idx` is not present in
    /// this chunk's archetype — callers (the `select` view) only ever call
    /// this for components known to be in the selector mask, which is a
    /// subset of the archetype by construction.
    pub fn column<T: Component>(&self, idx: u8) -> &[T] {
        let offset = self.component_offsets[idx as usize]
            .unwrap_or_else(|| panic!("component index {idx} is not present in archetype {:#010x}", self.archetype));
        unsafe {
            let ptr = self.byte_ptr().add(offset) as *const T;
            std::slice::from_raw_parts(ptr, self.size as usize)
        }
    }

    pub fn column_mut<T: Component>(&mut self, idx: u8) -> &mut [T] {
        let offset = self.component_offsets[idx as usize]
            .unwrap_or_else(|| panic!("component index {idx} is not present in archetype {:#010x}", self.archetype));
        unsafe {
            let ptr = self.byte_ptr_mut().add(offset) as *mut T;
            std::slice::from_raw_parts_mut(ptr, self.size as usize)
        }
    }

    /// Like [`Chunk::column_mut`], but takes `&self`.
    ///
    /// # Safety (caller obligation, not enforced by the type system)
    /// The distilled view API lets a caller request a mutable column
    /// through a shared reference to the containing view, exactly like the
    /// original's raw interior pointers. The caller must not hold two
    /// overlapping mutable borrows of the same column at once (e.g. via two
    /// `SubView`s over the same chunk, or a `write::<T>()` alongside a
    /// `read::<T>()` of the same `T`).
    pub fn column_mut_unchecked<T: Component>(&self, idx: u8) -> &mut [T] {
        let offset = self.component_offsets[idx as usize]
            .unwrap_or_else(|| panic!("component index {idx} is not present in archetype {:#010x}", self.archetype));
        unsafe {
            let ptr = (self.byte_ptr() as *mut u8).add(offset) as *mut T;
            std::slice::from_raw_parts_mut(ptr, self.size as usize)
        }
    }

    /// Raw pointer to `row`'s storage for component `idx`, for writing a
    /// freshly-supplied value. `size` must be the component's byte size.
    pub(crate) fn component_row_ptr_mut(&mut self, idx: u8, row: usize, size: usize) -> Option<*mut u8> {
        self.component_offsets[idx as usize].map(|off| unsafe { self.byte_ptr_mut().add(off + row * size) })
    }

    /// Append a new row at `self.size`, writing its index/id columns and
    /// bumping `size`. Component bytes are the caller's responsibility
    /// (via [`Chunk::component_row_ptr_mut`] or [`Chunk::copy_components_from`]).
    fn append_header(&mut self, entity_map_index: u16, id: EntityId) -> usize {
        debug_assert!(self.size < self.capacity, "append into a full chunk");
        let row = self.size as usize;
        unsafe {
            *(self.byte_ptr_mut().add(self.index_offset + row * 2) as *mut u16) = entity_map_index;
            *(self.byte_ptr_mut().add(self.id_offset + row * 4) as *mut u32) = id.get();
        }
        self.size += 1;
        row
    }

    /// Copy every component present in *both* `self` and `src`'s archetype
    /// from `src`'s row into `self`'s row.
    fn copy_components_from(&mut self, dst_row: usize, src: &Chunk, src_row: usize, registry: &ComponentRegistry) {
        for idx in 0..registry.len() as u8 {
            if let (Some(dst_off), Some(src_off)) = (self.component_offsets[idx as usize], src.component_offsets[idx as usize]) {
                let size = registry.info(idx).size;
                unsafe {
                    let src_ptr = src.byte_ptr().add(src_off + src_row * size);
                    let dst_ptr = self.byte_ptr_mut().add(dst_off + dst_row * size);
                    std::ptr::copy_nonoverlapping(src_ptr, dst_ptr, size);
                }
            }
        }
    }

    /// Run each present component's `drop_fn` (if any) over `row`. Must only
    /// be called for a row that currently holds initialized component
    /// values — never a freshly-appended row whose component bytes haven't
    /// been written yet.
    fn drop_row_components(&mut self, row: usize) {
        unsafe {
            let base = self.byte_ptr_mut();
            for idx in 0..MAX_COMPONENTS {
                if let (Some(off), Some(drop_fn)) = (self.component_offsets[idx], self.drop_fns[idx]) {
                    drop_fn(base.add(off + row * self.component_sizes[idx]));
                }
            }
        }
    }

    /// Run one component's `drop_fn` (if any) over its existing value at
    /// `row`, if this archetype carries that component. Caller must only
    /// invoke this for an `(idx, row)` known to already hold an initialized
    /// value (e.g. about to be overwritten), never on unwritten bytes.
    fn drop_component(&mut self, idx: u8, row: usize) {
        if let (Some(off), Some(drop_fn)) = (self.component_offsets[idx as usize], self.drop_fns[idx as usize]) {
            unsafe { drop_fn(self.byte_ptr_mut().add(off + row * self.component_sizes[idx as usize])) };
        }
    }

    /// Swap-remove `row`: drop its outgoing component values, then, if it
    /// isn't the last row, move the last row's index/id/component bytes
    /// into it. Returns the entity-map index that was moved into `row`, if
    /// any, so the caller can fix up that entity's recorded position.
    fn swap_remove_row(&mut self, row: usize, registry: &ComponentRegistry) -> Option<u16> {
        debug_assert!(self.size > 0);
        let last = self.size as usize - 1;
        self.drop_row_components(row);
        self.size -= 1;
        if row == last {
            return None;
        }
        let moved = self.row_indices()[last];
        unsafe {
            let base = self.byte_ptr_mut();
            std::ptr::copy_nonoverlapping(base.add(self.index_offset + last * 2), base.add(self.index_offset + row * 2), 2);
            std::ptr::copy_nonoverlapping(base.add(self.id_offset + last * 4), base.add(self.id_offset + row * 4), 4);
            for idx in 0..registry.len() as u8 {
                if let Some(off) = self.component_offsets[idx as usize] {
                    let size = registry.info(idx).size;
                    std::ptr::copy_nonoverlapping(base.add(off + last * size), base.add(off + row * size), size);
                }
            }
        }
        Some(moved)
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        for row in 0..self.size as usize {
            self.drop_row_components(row);
        }
    }
}

/// One archetype-map slot: which archetype it holds and which chunk backs it.
#[derive(Debug, Clone, Copy)]
struct ArchetypeSlot {
    archetype: Archetype,
    chunk_index: u16,
}

/// Fixed-capacity pool of chunks, claimed lazily (one per archetype-map
/// slot) and never freed for the lifetime of the store.
pub struct ChunkPool {
    chunks: Vec<Option<Chunk>>,
    next_free: u16,
}

impl ChunkPool {
    pub fn with_capacity(max_chunks: u16) -> Self {
        Self {
            chunks: (0..max_chunks).map(|_| None).collect(),
            next_free: 0,
        }
    }

    fn claim(&mut self, archetype: Archetype, registry: &ComponentRegistry, chunk_size: u16) -> Result<u16> {
        if self.next_free as usize >= self.chunks.len() {
            return Err(EcsError::OutOfChunks);
        }
        let chunk = Chunk::setup(archetype, registry, chunk_size)?;
        let index = self.next_free;
        self.chunks[index as usize] = Some(chunk);
        self.next_free += 1;
        Ok(index)
    }

    pub fn get(&self, index: u16) -> &Chunk {
        self.chunks[index as usize].as_ref().expect("chunk index must refer to a claimed chunk")
    }

    pub fn get_mut(&mut self, index: u16) -> &mut Chunk {
        self.chunks[index as usize].as_mut().expect("chunk index must refer to a claimed chunk")
    }

    fn get_two_mut(&mut self, a: u16, b: u16) -> (&mut Chunk, &mut Chunk) {
        assert_ne!(a, b, "cannot borrow the same chunk twice");
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (left, right) = self.chunks.split_at_mut(hi as usize);
        let lo_ref = left[lo as usize].as_mut().expect("chunk index must refer to a claimed chunk");
        let hi_ref = right[0].as_mut().expect("chunk index must refer to a claimed chunk");
        if a < b {
            (lo_ref, hi_ref)
        } else {
            (hi_ref, lo_ref)
        }
    }
}

/// Open-addressed map from archetype bitmask to chunk index, plus the
/// `not_empty`/`full` bitsets the distilled spec keys iteration and
/// insertion decisions off of.
pub struct ArchetypeMap {
    slots: Vec<Option<ArchetypeSlot>>,
    not_empty: BitSet,
    full: BitSet,
}

impl ArchetypeMap {
    pub fn with_capacity(max_chunks: u16) -> Self {
        let table_capacity = first_prime_greater_than(max_chunks) as usize;
        Self {
            slots: vec![None; table_capacity],
            not_empty: BitSet::with_capacity(table_capacity),
            full: BitSet::with_capacity(table_capacity),
        }
    }

    pub fn table_capacity(&self) -> usize {
        self.slots.len()
    }

    /// `findAvailableArchetypeMapIndex`: probe from `archetype % capacity`,
    /// stopping at the first empty slot or first non-full slot already
    /// holding this archetype.
    pub fn find_slot_for_insert(&self, archetype: Archetype) -> usize {
        let capacity = self.slots.len();
        let mut i = (archetype as usize) % capacity;
        loop {
            match self.slots[i] {
                None => return i,
                Some(slot) if slot.archetype == archetype && !self.full.contains(i) => return i,
                _ => {}
            }
            i = (i + 1) % capacity;
        }
    }

    pub fn archetype_at(&self, slot: usize) -> Option<Archetype> {
        self.slots[slot].map(|s| s.archetype)
    }

    pub fn chunk_index_at(&self, slot: usize) -> u16 {
        self.slots[slot].expect("slot must be occupied").chunk_index
    }

    pub fn not_empty(&self, slot: usize) -> bool {
        self.not_empty.contains(slot)
    }

    pub fn is_full(&self, slot: usize) -> bool {
        self.full.contains(slot)
    }

    /// Iterate occupied, non-empty slots whose archetype is a superset of
    /// `selector`, in probe-table order.
    pub fn matching_slots(&self, selector: Archetype) -> impl Iterator<Item = usize> + '_ {
        (0..self.slots.len()).filter(move |&i| {
            self.not_empty.contains(i)
                && self.slots[i]
                    .map(|s| (s.archetype & selector) == selector)
                    .unwrap_or(false)
        })
    }
}

/// Owns both the chunk pool and the archetype map, and implements the
/// row-add / row-transfer / row-remove protocols from the distilled spec
/// in terms of them. `EntityStore` drives this; it has no knowledge of
/// entity-map bookkeeping.
pub struct ArchetypeStorage {
    pub map: ArchetypeMap,
    pub pool: ChunkPool,
    chunk_size: u16,
}

/// Where a row ended up, plus the (entity-map index, new row) of any row
/// that had to be relocated within its own chunk as a side effect.
pub struct RowAddress {
    pub archetype_slot: usize,
    pub row: usize,
}

impl ArchetypeStorage {
    pub fn new(max_chunks: u16, chunk_size: u16) -> Self {
        Self {
            map: ArchetypeMap::with_capacity(max_chunks),
            pool: ChunkPool::with_capacity(max_chunks),
            chunk_size,
        }
    }

    pub(crate) fn slot_for(&mut self, archetype: Archetype, registry: &ComponentRegistry) -> Result<usize> {
        let slot = self.map.find_slot_for_insert(archetype);
        if self.map.archetype_at(slot).is_none() {
            let chunk_index = self.pool.claim(archetype, registry, self.chunk_size)?;
            self.map.slots[slot] = Some(ArchetypeSlot { archetype, chunk_index });
        }
        Ok(slot)
    }

    /// Row-add protocol: append a brand-new row (the entity has no prior
    /// row) to the chunk for `archetype`, writing `entity_map_index`/`id`
    /// and leaving component bytes for the caller to fill via
    /// [`ArchetypeStorage::chunk_mut`].
    pub fn add_row(
        &mut self,
        archetype: Archetype,
        registry: &ComponentRegistry,
        entity_map_index: u16,
        id: EntityId,
    ) -> Result<RowAddress> {
        let slot = self.slot_for(archetype, registry)?;
        let chunk_index = self.map.chunk_index_at(slot);
        let chunk = self.pool.get_mut(chunk_index);
        let row = chunk.append_header(entity_map_index, id);
        self.map.not_empty.set(slot);
        if chunk.is_full() {
            self.map.full.set(slot);
        }
        Ok(RowAddress { archetype_slot: slot, row })
    }

    /// Row-transfer protocol: move the entity currently at
    /// `(src_slot, src_row)` into a row of the chunk for `dst_archetype`,
    /// carrying over every component the destination archetype shares with
    /// the source, then swap-removing the vacated source row. `dst_archetype`
    /// must differ from the source chunk's archetype (callers should take
    /// the in-place overwrite shortcut instead when they're equal).
    ///
    /// Returns the new `RowAddress` plus, if the source chunk's
    /// swap-remove moved another entity, that entity's entity-map index and
    /// its new row.
    pub fn transfer_row(
        &mut self,
        dst_archetype: Archetype,
        registry: &ComponentRegistry,
        src_slot: usize,
        src_row: usize,
    ) -> Result<(RowAddress, Option<(u16, usize)>)> {
        let dst_slot = self.slot_for(dst_archetype, registry)?;
        let src_chunk_index = self.map.chunk_index_at(src_slot);
        let dst_chunk_index = self.map.chunk_index_at(dst_slot);
        debug_assert_ne!(
            src_chunk_index, dst_chunk_index,
            "transfer_row called with an unchanged archetype; caller must take the in-place overwrite shortcut instead"
        );

        let new_row = {
            let (src_chunk, dst_chunk) = self.pool.get_two_mut(src_chunk_index, dst_chunk_index);
            let emi = src_chunk.row_indices()[src_row];
            let id = src_chunk.ids()[src_row];
            let row = dst_chunk.append_header(emi, id);
            dst_chunk.copy_components_from(row, src_chunk, src_row, registry);
            row
        };

        self.map.not_empty.set(dst_slot);
        if self.pool.get(dst_chunk_index).is_full() {
            self.map.full.set(dst_slot);
        }

        let moved = self.pool.get_mut(src_chunk_index).swap_remove_row(src_row, registry);
        let src_chunk = self.pool.get(src_chunk_index);
        if src_chunk.size() == 0 {
            self.map.not_empty.clear(src_slot);
        }
        if src_chunk.size() < src_chunk.capacity() {
            self.map.full.clear(src_slot);
        }

        let relocated = moved.map(|moved_emi| (moved_emi, src_row));
        Ok((
            RowAddress {
                archetype_slot: dst_slot,
                row: new_row,
            },
            relocated,
        ))
    }

    /// Row-remove protocol: swap-remove `(slot, row)` with no destination.
    /// Returns the (entity-map index, new row) of any entity relocated by
    /// the swap.
    pub fn remove_row(&mut self, slot: usize, row: usize, registry: &ComponentRegistry) -> Option<(u16, usize)> {
        let chunk_index = self.map.chunk_index_at(slot);
        let chunk = self.pool.get_mut(chunk_index);
        let moved = chunk.swap_remove_row(row, registry);
        if chunk.size() == 0 {
            self.map.not_empty.clear(slot);
        }
        if chunk.size() < chunk.capacity() {
            self.map.full.clear(slot);
        }
        moved.map(|moved_emi| (moved_emi, row))
    }

    pub fn chunk(&self, slot: usize) -> &Chunk {
        let chunk_index = self.map.chunk_index_at(slot);
        self.pool.get(chunk_index)
    }

    pub fn chunk_mut(&mut self, slot: usize) -> &mut Chunk {
        let chunk_index = self.map.chunk_index_at(slot);
        self.pool.get_mut(chunk_index)
    }

    /// Destination pointer for writing component `idx`'s value at `(slot,
    /// row)` directly, used by `Bundle::write_components`.
    pub(crate) fn component_ptr_mut(&mut self, slot: usize, row: usize, idx: u8, size: usize) -> Option<*mut u8> {
        self.chunk_mut(slot).component_row_ptr_mut(idx, row, size)
    }

    /// Drop component `idx`'s existing value at `(slot, row)` before it gets
    /// overwritten. Caller must only call this when that value is actually
    /// initialized.
    pub(crate) fn drop_component_at(&mut self, slot: usize, row: usize, idx: u8) {
        self.chunk_mut(slot).drop_component(idx, row);
    }
}
