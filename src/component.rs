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

//! Component roster, `Bundle` and `ComponentSet` traits.
//!
//! Components are data attached to entities. A `ComponentRegistry` assigns
//! each distinct component type a 0-based index (at most 32 of them, one
//! per bit of an [`Archetype`](crate::archetype::Archetype) mask). `Bundle`
//! turns a tuple of component *values* into an archetype mask plus bytes to
//! write; `ComponentSet` turns a tuple of component *types* into just a
//! mask, for `del_components`/`select`.

use std::any::TypeId;

use ahash::AHashMap;
use smallvec::{smallvec, SmallVec};

use crate::error::{EcsError, Result};

/// Maximum number of distinct component types a single store can hold.
pub const MAX_COMPONENTS: usize = 32;

/// Maximum number of components supported by a single `Bundle`/`ComponentSet`.
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// Marker trait for components.
///
/// Components must be `'static` (no borrowed data) and `Send + Sync` so
/// rows can be migrated across chunks and read from job-system worker
/// threads.
pub trait Component: 'static + Send + Sync {}

/// Blanket-implement `Component` for every eligible type.
impl<T: 'static + Send + Sync> Component for T {}

/// Per-component bookkeeping the registry needs to size and drop chunk columns.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    pub size: usize,
    pub align: usize,
    pub drop_fn: Option<unsafe fn(*mut u8)>,
}

impl ComponentInfo {
    fn of<T: Component>() -> Self {
        Self {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(|ptr| unsafe { std::ptr::drop_in_place(ptr as *mut T) })
            } else {
                None
            },
        }
    }
}

/// Maps component types to a dense 0-based roster index.
///
/// Registration only happens while building an `EntityStore`
/// (`EntityStoreBuilder::register`); the roster is immutable once the store
/// is built, matching the "statically known, fixed roster" of component
/// types this crate is built around.
#[derive(Default)]
pub struct ComponentRegistry {
    indices: AHashMap<TypeId, u8>,
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            indices: AHashMap::default(),
            infos: Vec::new(),
        }
    }

    /// Assign (or look up) `T`'s roster index.
    pub fn register<T: Component>(&mut self) -> Result<u8> {
        let type_id = TypeId::of::<T>();
        if let Some(&idx) = self.indices.get(&type_id) {
            return Ok(idx);
        }
        if self.infos.len() >= MAX_COMPONENTS {
            return Err(EcsError::CapacityTooSmall(format!(
                "component roster already holds {MAX_COMPONENTS} types, cannot register {}",
                std::any::type_name::<T>()
            )));
        }
        let idx = self.infos.len() as u8;
        self.infos.push(ComponentInfo::of::<T>());
        self.indices.insert(type_id, idx);
        Ok(idx)
    }

    pub fn index_of(&self, type_id: TypeId) -> Option<u8> {
        self.indices.get(&type_id).copied()
    }

    pub fn info(&self, index: u8) -> &ComponentInfo {
        &self.infos[index as usize]
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

/// A tuple of component *values*, used by `add_components`.
pub trait Bundle: Send + Sync + 'static {
    /// Type IDs of every member, in tuple order.
    fn type_ids() -> SmallVec<[TypeId; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// OR together `1 << index` for every member, using indices already
    /// assigned by `registry`. Panics if a member type was never
    /// registered — a programmer error, not a recoverable condition.
    fn archetype_mask(registry: &ComponentRegistry) -> u32
    where
        Self: Sized,
    {
        let mut mask = 0u32;
        for type_id in Self::type_ids() {
            let idx = registry
                .index_of(type_id)
                .unwrap_or_else(|| panic!("component type {type_id:?} was never registered"));
            mask |= 1 << idx;
        }
        mask
    }

    /// Write every member to its destination pointer.
    ///
    /// # Safety
    /// `ptrs[i]` must be valid, properly aligned for the i-th member type,
    /// and not aliased by any other live reference.
    unsafe fn write_components(self, ptrs: &[*mut u8]);
}

/// A tuple of component *types* (no values), used by `del_components` and
/// `select`.
pub trait ComponentSet: 'static {
    fn type_ids() -> SmallVec<[TypeId; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    fn archetype_mask(registry: &ComponentRegistry) -> u32
    where
        Self: Sized,
    {
        let mut mask = 0u32;
        for type_id in Self::type_ids() {
            let idx = registry
                .index_of(type_id)
                .unwrap_or_else(|| panic!("component type {type_id:?} was never registered"));
            mask |= 1 << idx;
        }
        mask
    }
}

macro_rules! impl_bundle {
    ($($T:ident),*) => {
        impl<$($T: Component),*> Bundle for ($($T,)*) {
            fn type_ids() -> SmallVec<[TypeId; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(TypeId::of::<$T>()),*]
            }

            #[allow(non_snake_case)]
            unsafe fn write_components(self, ptrs: &[*mut u8]) {
                let ($($T,)*) = self;
                let mut i = 0;
                $(
                    std::ptr::write(ptrs[i] as *mut $T, $T);
                    i += 1;
                )*
                let _ = i;
            }
        }

        impl<$($T: Component),*> ComponentSet for ($($T,)*) {
            fn type_ids() -> SmallVec<[TypeId; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(TypeId::of::<$T>()),*]
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    #![allow(dead_code)]
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy)]
    struct Velocity {
        x: f32,
    }

    #[test]
    fn single_component_type_ids() {
        let type_ids = <(Position,)>::type_ids();
        assert_eq!(type_ids.len(), 1);
        assert_eq!(type_ids[0], TypeId::of::<Position>());
    }

    #[test]
    fn multiple_component_type_ids() {
        let type_ids = <(Position, Velocity)>::type_ids();
        assert_eq!(type_ids.len(), 2);
    }

    #[test]
    fn registry_assigns_dense_indices() {
        let mut registry = ComponentRegistry::new();
        let a = registry.register::<Position>().unwrap();
        let b = registry.register::<Velocity>().unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        // Re-registering returns the same index rather than consuming a new bit.
        assert_eq!(registry.register::<Position>().unwrap(), a);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn bundle_archetype_mask_ors_registered_indices() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Position>().unwrap();
        registry.register::<Velocity>().unwrap();
        let mask = <(Position, Velocity)>::archetype_mask(&registry);
        assert_eq!(mask, 0b11);
    }

    #[test]
    fn registry_rejects_33rd_component() {
        macro_rules! distinct_unit_structs {
            ($($name:ident),*) => {
                $(struct $name;)*
                let mut registry = ComponentRegistry::new();
                $(registry.register::<$name>().unwrap();)*
                registry
            };
        }
        let registry = distinct_unit_structs!(
            C0, C1, C2, C3, C4, C5, C6, C7, C8, C9, C10, C11, C12, C13, C14, C15, C16, C17, C18,
            C19, C20, C21, C22, C23, C24, C25, C26, C27, C28, C29, C30, C31
        );
        assert_eq!(registry.len(), 32);
        struct OneTooMany;
        let mut registry = registry;
        assert!(registry.register::<OneTooMany>().is_err());
    }
}
