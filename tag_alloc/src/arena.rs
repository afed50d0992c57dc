//! The heap arena: a fixed-capacity byte region with a movable break.
//!
//! This plays the role of `sbrk`. Memory below the break belongs to the heap,
//! memory above it does not exist yet. The break only ever moves up, except
//! when the whole arena is reset.

use core::ops::Range;
use crate::units::{Bytes, Words, WORD};
use crate::OutOfMemory;

/// A contiguous, append-only byte region.
pub struct HeapArena {
    bytes: Box<[u8]>,
    brk: usize,
}

impl HeapArena {
    /// Create an empty arena that can grow up to `capacity` bytes.
    pub fn with_capacity(capacity: Bytes) -> HeapArena {
        HeapArena {
            bytes: vec![0; capacity.0].into_boxed_slice(),
            brk: 0,
        }
    }

    /// The maximum size this arena can grow to.
    pub fn capacity(&self) -> Bytes {
        Bytes(self.bytes.len())
    }

    /// Move the break back to the start of the arena.
    pub fn reset(&mut self) {
        self.brk = 0;
    }

    /// Grow the heap by exactly `size` bytes and return the offset of the
    /// first new byte (the old break).
    pub fn grow(&mut self, size: Bytes) -> Result<usize, OutOfMemory> {
        let old_brk = self.brk;
        match old_brk.checked_add(size.0) {
            Some(new_brk) if new_brk <= self.bytes.len() => {
                self.brk = new_brk;
                Ok(old_brk)
            }
            _ => {
                warn!(
                    "heap arena exhausted: cannot grow {} by {}",
                    Bytes(old_brk),
                    size
                );
                Err(OutOfMemory)
            }
        }
    }

    /// Grow the heap by `words` rounded up to an even count, so the heap
    /// stays a whole number of double words.
    pub fn extend(&mut self, words: Words) -> Result<usize, OutOfMemory> {
        self.grow(words.round_up_even().into())
    }

    /// Offset of the first heap byte.
    #[inline]
    pub fn low(&self) -> usize {
        0
    }

    /// Offset of the last heap byte, mirroring `mem_heap_hi`. On an empty
    /// heap this is `low()`.
    #[inline]
    pub fn high(&self) -> usize {
        self.brk.saturating_sub(1)
    }

    /// Current size of the heap, which is also the high-water mark.
    #[inline]
    pub fn size(&self) -> Bytes {
        Bytes(self.brk)
    }

    /// Whether `range` lies entirely inside the current heap.
    #[inline]
    pub fn contains(&self, range: Range<usize>) -> bool {
        range.start <= range.end && range.end <= self.brk
    }

    /// Read the boundary-tag word at `offset`.
    #[inline]
    pub fn read_word(&self, offset: usize) -> u32 {
        extra_assert!(offset + WORD.0 <= self.brk, "word read past the break");
        let mut word = [0; 4];
        word.copy_from_slice(&self.bytes[offset..offset + WORD.0]);
        u32::from_le_bytes(word)
    }

    /// Write the boundary-tag word at `offset`.
    #[inline]
    pub fn write_word(&mut self, offset: usize, value: u32) {
        extra_assert!(offset + WORD.0 <= self.brk, "word write past the break");
        self.bytes[offset..offset + WORD.0].copy_from_slice(&value.to_le_bytes());
    }

    /// Borrow a range of heap bytes.
    #[inline]
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        extra_assert!(range.end <= self.brk, "slice past the break");
        &self.bytes[range]
    }

    /// Mutably borrow a range of heap bytes.
    #[inline]
    pub fn slice_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        extra_assert!(range.end <= self.brk, "slice past the break");
        &mut self.bytes[range]
    }

    /// Copy `len` bytes from `src` to `dest`. The ranges may overlap.
    #[inline]
    pub fn copy_within(&mut self, src: usize, dest: usize, len: usize) {
        self.bytes.copy_within(src..src + len, dest);
    }
}
