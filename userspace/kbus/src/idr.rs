// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Small-integer id allocator (minor-number registry).
//!
//! Hands out the smallest positive id not currently in use. Not synchronised;
//! owners wrap it in their own lock.

use std::collections::{BTreeMap, BTreeSet};

use crate::{Error, Result};

/// Maps small positive integers to live objects.
#[derive(Debug)]
pub struct IdAllocator<T> {
    live: BTreeMap<u32, T>,
    // Released ids below `next`, reused smallest-first.
    free: BTreeSet<u32>,
    // Widened so `max == u32::MAX` cannot overflow the high-water mark.
    next: u64,
    max: u32,
}

impl<T> IdAllocator<T> {
    /// Creates an allocator handing out ids in `1..=max`.
    pub fn new(max: u32) -> Self {
        Self { live: BTreeMap::new(), free: BTreeSet::new(), next: 1, max }
    }

    /// Associates `object` with the smallest unused id.
    pub fn allocate(&mut self, object: T) -> Result<u32> {
        let id = match self.free.pop_first() {
            Some(id) => id,
            None if self.next <= u64::from(self.max) => {
                let id = self.next as u32;
                self.next += 1;
                id
            }
            None => return Err(Error::ResourceExhausted),
        };
        self.live.insert(id, object);
        Ok(id)
    }

    /// Removes the association for `id` and returns its object.
    ///
    /// # Panics
    ///
    /// Releasing an id that is not live (double release) is a programming error.
    pub fn release(&mut self, id: u32) -> T {
        let Some(object) = self.live.remove(&id) else {
            panic!("idr: release of unallocated id {id}");
        };
        if u64::from(id) + 1 == self.next {
            self.next = u64::from(id);
            // Fold trailing free ids back into the high-water mark.
            while self.next > 1 && self.free.remove(&((self.next - 1) as u32)) {
                self.next -= 1;
            }
        } else {
            self.free.insert(id);
        }
        object
    }

    /// Returns the object registered under `id`.
    pub fn get(&self, id: u32) -> Option<&T> {
        self.live.get(&id)
    }

    /// Number of live ids.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns `true` when no id is live.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
