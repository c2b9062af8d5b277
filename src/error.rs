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

/// Entity store error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Entity handle not present in the entity map
    NotFound,

    /// The entity map has no empty or tombstoned slot left to admit a new handle
    OutOfSpace,

    /// The chunk pool is exhausted and a new archetype-map slot needs a chunk
    OutOfChunks,

    /// A fixed, construction-time capacity was insufficient: either
    /// `chunk_size` cannot hold one row of some archetype, or the component
    /// roster has no bit left to assign (more than 32 distinct types).
    CapacityTooSmall(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::NotFound => write!(f, "entity not found"),
            EcsError::OutOfSpace => write!(f, "entity map is full"),
            EcsError::OutOfChunks => write!(f, "chunk pool is exhausted"),
            EcsError::CapacityTooSmall(reason) => write!(f, "capacity too small: {reason}"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
