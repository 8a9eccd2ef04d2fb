// SPDX-License-Identifier: Apache-2.0

//! Shared memory registered with a [`Context`](crate::host::Context).
//!
//! A registered region is referenced by id from a marshaled block instead of being copied into it.
//! The peer resolves the id through the context's registry for the duration of a single call.

use bitflags::bitflags;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

bitflags! {
    /// Directions a registered region may be used in.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ShmFlags: u32 {
        /// The region may back input memory references.
        const INPUT = 1 << 0;
        /// The region may back output memory references.
        const OUTPUT = 1 << 1;
    }
}

pub(crate) type Region = Arc<Mutex<Vec<u8>>>;

// Ids are unique across contexts and start at 1; the block uses `NULL` for "not registered".
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a registered region. The registration ends when the last handle is dropped.
#[derive(Clone, Debug)]
pub struct SharedMemory {
    id: u64,
    flags: ShmFlags,
    region: Region,
}

impl SharedMemory {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn flags(&self) -> ShmFlags {
        self.flags
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the region for direct access.
    pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        lock(&self.region)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().clone()
    }
}

/// Regions registered with a context, by id.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    regions: Mutex<HashMap<u64, Weak<Mutex<Vec<u8>>>>>,
}

impl Registry {
    pub(crate) fn register(&self, buffer: Vec<u8>, flags: ShmFlags) -> SharedMemory {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let region = Arc::new(Mutex::new(buffer));

        let mut regions = lock(&self.regions);
        regions.retain(|_, weak| weak.strong_count() > 0);
        regions.insert(id, Arc::downgrade(&region));

        SharedMemory { id, flags, region }
    }

    /// Looks up a live region.
    pub(crate) fn resolve(&self, id: u64) -> Option<Region> {
        lock(&self.regions).get(&id)?.upgrade()
    }
}
