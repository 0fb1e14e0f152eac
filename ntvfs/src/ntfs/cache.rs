// SPDX-License-Identifier: MIT

use alloc::boxed::Box;
use core::num::NonZeroUsize;

use lru::LruCache;

/// Directory-listing cache owned by a volume.
///
/// Keys are directory record numbers; values are opaque blocks produced by
/// the layer that lists directories.
pub struct DirCache {
    entries: LruCache<u64, Box<[u8]>>,
}

impl DirCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { entries: LruCache::new(capacity) }
    }

    pub fn get(&mut self, dir: u64) -> Option<&[u8]> {
        self.entries.get(&dir).map(|b| &**b)
    }

    /// Stores a block, evicting the least recently used one when full.
    pub fn put(&mut self, dir: u64, block: Box<[u8]>) {
        self.entries.put(dir, block);
    }

    pub fn invalidate(&mut self, dir: u64) {
        self.entries.pop(&dir);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

impl core::fmt::Debug for DirCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DirCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
