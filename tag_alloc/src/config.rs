//! Heap configuration.

use crate::block::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::units::{Bytes, PAGE_SIZE};

/// Default arena capacity, set at build time through the
/// `TAG_ALLOC_MAX_HEAP_BYTES` environment variable (20 MiB if unset).
pub const DEFAULT_MAX_HEAP: Bytes =
    Bytes(include!(concat!(env!("OUT_DIR"), "/tag_alloc_max_heap_bytes.txt")));

/// Tunables for a `TagAlloc` heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    max_heap: Bytes,
    chunk_size: Bytes,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_heap: DEFAULT_MAX_HEAP,
            chunk_size: PAGE_SIZE,
        }
    }
}

impl Config {
    /// Limit the heap to `max_heap` bytes. Clamped to what a boundary tag
    /// can describe.
    pub fn with_max_heap(mut self, max_heap: Bytes) -> Config {
        self.max_heap = if max_heap > MAX_BLOCK_SIZE {
            MAX_BLOCK_SIZE
        } else {
            max_heap
        };
        self
    }

    /// Grow the heap by at least `chunk_size` bytes whenever it runs out of
    /// free blocks. Rounded up to a double word, and never smaller than the
    /// minimum block.
    pub fn with_chunk_size(mut self, chunk_size: Bytes) -> Config {
        let chunk_size = chunk_size.align_up().unwrap_or(MAX_BLOCK_SIZE);
        self.chunk_size = if chunk_size < MIN_BLOCK_SIZE {
            MIN_BLOCK_SIZE
        } else {
            chunk_size
        };
        self
    }

    /// The arena capacity.
    #[inline]
    pub fn max_heap(&self) -> Bytes {
        self.max_heap
    }

    /// The default heap growth.
    #[inline]
    pub fn chunk_size(&self) -> Bytes {
        self.chunk_size
    }
}
