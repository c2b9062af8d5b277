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

//! `dots_ecs` - archetype-chunked entity store with a companion
//! barrier-synchronized job system.
//!
//! Two independent halves, usable together or alone:
//! - [`world::EntityStore`]: maps entity handles to archetype-partitioned,
//!   column-major chunks and exposes [`query::View`] for iteration.
//! - [`job`]: a bounded job queue and worker pool with a sync-point barrier
//!   primitive for serializing selected work against the parallel pool.

pub mod archetype;
pub mod bitset;
pub mod component;
pub mod entity;
pub mod error;
pub mod job;
pub mod prelude;
mod prime;
pub mod query;
pub mod world;

pub use archetype::Archetype;
pub use component::{Bundle, Component, ComponentRegistry, ComponentSet};
pub use entity::EntityId;
pub use error::{EcsError, Result};
pub use job::{JobSystem, JobSystemConfig};
pub use query::{SubView, View, ViewIter};
pub use world::{EntityStore, EntityStoreBuilder, EntityStoreConfig};
