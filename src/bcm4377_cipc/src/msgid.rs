/*
Copyright 2026  The bcm4377-cipc Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Message-id allocation and generation tagging.
//!
//! Each transfer ring hands out small integer ids, one per outstanding
//! entry. The id travels to the device tagged with the ring's generation
//! (`generation << 8 | id`) so completions that refer to an earlier
//! incarnation of the ring can be recognised and dropped.

use fixedbitset::FixedBitSet;

use crate::error::{CipcError, Result};

const ID_MASK: u16 = 0x00ff;
const GENERATION_SHIFT: u16 = 8;

/// Pack an id and a generation into the on-wire message id.
#[inline]
pub const fn tag(id: u8, generation: u8) -> u16 {
    ((generation as u16) << GENERATION_SHIFT) | id as u16
}

/// Unpack an on-wire message id, checking it against the ring's current
/// generation and entry count.
pub fn untag(raw: u16, generation: u8, n_entries: u16) -> Result<u8> {
    let id = (raw & ID_MASK) as u8;
    let raw_generation = (raw >> GENERATION_SHIFT) as u8;

    if raw_generation != generation || u16::from(id) >= n_entries {
        return Err(CipcError::Stale { raw, generation });
    }

    Ok(id)
}

/// Bitmap allocator over `[0, n_entries)`.
#[derive(Debug, Clone)]
pub struct MsgIdAllocator {
    used: FixedBitSet,
}

impl MsgIdAllocator {
    pub fn new(n_entries: u16) -> Self {
        Self {
            used: FixedBitSet::with_capacity(n_entries as usize),
        }
    }

    /// Lowest free id, marked used. `None` once every id is taken.
    pub fn allocate(&mut self) -> Option<u8> {
        let id = self.used.zeroes().next()?;
        self.used.insert(id);
        Some(id as u8)
    }

    /// Return `id` to the pool. Returns `false` if it was not allocated.
    pub fn release(&mut self, id: u8) -> bool {
        let id = id as usize;
        if id >= self.used.len() || !self.used.contains(id) {
            return false;
        }
        self.used.set(id, false);
        true
    }

    pub fn is_allocated(&self, id: u8) -> bool {
        self.used.contains(id as usize)
    }

    pub fn in_use(&self) -> usize {
        self.used.count_ones(..)
    }

    /// Forget every allocation.
    pub fn reset(&mut self) {
        self.used.clear();
    }
}
