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

//! Views: restartable iteration over archetype-map slots matching a
//! selector mask, yielding per-chunk sub-views.

use std::any::TypeId;
use std::marker::PhantomData;

use crate::archetype::{Archetype, Chunk};
use crate::component::{Component, ComponentRegistry, ComponentSet};
use crate::entity::EntityId;
use crate::world::EntityStore;

/// Borrows the store and fixes `S`'s archetype mask at construction.
/// Re-iterable: [`View::iter`] can be called any number of times and always
/// walks the archetype map's current state.
pub struct View<'a, S: ComponentSet> {
    store: &'a EntityStore,
    selector: Archetype,
    _marker: PhantomData<S>,
}

impl<'a, S: ComponentSet> View<'a, S> {
    pub(crate) fn new(store: &'a EntityStore, selector: Archetype) -> Self {
        Self {
            store,
            selector,
            _marker: PhantomData,
        }
    }

    /// Iterate sub-views for every archetype-map slot that is non-empty and
    /// whose archetype is a superset of `S`'s mask. Order is archetype-map
    /// probe order and is not meaningful to callers.
    pub fn iter(&self) -> ViewIter<'a, S> {
        let slots: Vec<usize> = self.store.storage().map.matching_slots(self.selector).collect();
        ViewIter {
            store: self.store,
            selector: self.selector,
            slots: slots.into_iter(),
            _marker: PhantomData,
        }
    }
}

impl<'a, S: ComponentSet> IntoIterator for View<'a, S> {
    type Item = SubView<'a, S>;
    type IntoIter = ViewIter<'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the chunks matched by a [`View`].
pub struct ViewIter<'a, S: ComponentSet> {
    store: &'a EntityStore,
    selector: Archetype,
    slots: std::vec::IntoIter<usize>,
    _marker: PhantomData<S>,
}

impl<'a, S: ComponentSet> Iterator for ViewIter<'a, S> {
    type Item = SubView<'a, S>;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.slots.next()?;
        Some(SubView {
            chunk: self.store.storage().chunk(slot),
            registry: self.store.registry(),
            selector: self.selector,
            _marker: PhantomData,
        })
    }
}

/// One chunk's worth of rows matching a [`View`]'s selector. Exposes
/// per-component read/write access without a separate `select_mut` —
/// mutability is chosen per call via [`SubView::read`] / [`SubView::write`].
pub struct SubView<'a, S: ComponentSet> {
    chunk: &'a Chunk,
    registry: &'a ComponentRegistry,
    selector: Archetype,
    _marker: PhantomData<S>,
}

impl<'a, S: ComponentSet> SubView<'a, S> {
    pub fn len(&self) -> usize {
        self.chunk.size()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk.size() == 0
    }

    pub fn ids(&self) -> &'a [EntityId] {
        self.chunk.ids()
    }

    /// Read component `T`'s column. Panics if `T` is not a member of the
    /// view's selector `S` — a programmer error, not a runtime condition
    /// (mirrors the original's compile-time constraint, which this crate
    /// cannot express the same way without an unbounded generic-arity
    /// explosion).
    pub fn read<T: Component>(&self) -> &'a [T] {
        let idx = self.member_index::<T>();
        self.chunk.column(idx)
    }

    /// Write component `T`'s column. Same panic contract as
    /// [`SubView::read`]. Safe in the Rust-borrow sense only so long as the
    /// caller does not alias this with another live borrow of the same
    /// column (see [`Chunk::column_mut_unchecked`]).
    pub fn write<T: Component>(&self) -> &'a mut [T] {
        let idx = self.member_index::<T>();
        self.chunk.column_mut_unchecked(idx)
    }

    fn member_index<T: Component>(&self) -> u8 {
        let idx = self
            .registry
            .index_of(TypeId::of::<T>())
            .unwrap_or_else(|| panic!("component type {:?} was never registered", TypeId::of::<T>()));
        assert!(
            self.selector & (1 << idx) != 0,
            "component index {idx} is not a member of this view's selector"
        );
        idx
    }
}
