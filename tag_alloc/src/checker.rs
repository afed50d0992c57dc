//! The heap consistency checker.
//!
//! Walks the heap block by block and the free list link by link, and
//! cross-validates the two. Purely diagnostic: it never changes the heap and
//! is never run implicitly (except under "extra_assertions").

use crate::block::{BoundaryTag, HeapPtr, MIN_BLOCK_SIZE, TAG_OVERHEAD};
use crate::units::{Bytes, DWORD, WORD};
use crate::TagAlloc;
use core::fmt;
use std::collections::HashSet;

/// One of the structural properties verified by `check_consistency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    /// Every block in the free list is marked free in header and footer.
    FreeListMarkedFree,
    /// No two physically adjacent blocks are both free.
    FullyCoalesced,
    /// Every free block found by walking the heap is in the free list.
    FreeBlocksListed,
    /// Every free-list entry is a well-formed block inside the heap.
    FreeListInBounds,
    /// No allocated block runs into the block after it.
    NoOverlap,
    /// Every allocated block is a well-formed block inside the heap.
    AllocatedInBounds,
}

impl Check {
    /// All checks, in bit order.
    pub const ALL: [Check; 6] = [
        Check::FreeListMarkedFree,
        Check::FullyCoalesced,
        Check::FreeBlocksListed,
        Check::FreeListInBounds,
        Check::NoOverlap,
        Check::AllocatedInBounds,
    ];

    /// The status bit this check sets when it passes.
    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// A question this check answers with "yes" when it passes.
    pub fn description(self) -> &'static str {
        match self {
            Check::FreeListMarkedFree => "Is every block in the free list marked as free?",
            Check::FullyCoalesced => "Did every pair of contiguous free blocks get coalesced?",
            Check::FreeBlocksListed => "Is every free block actually in the free list?",
            Check::FreeListInBounds => "Do the free list entries point to valid free blocks?",
            Check::NoOverlap => "Are all allocated blocks free of overlap?",
            Check::AllocatedInBounds => "Do all allocated blocks lie at valid heap addresses?",
        }
    }
}

/// The result of `check_consistency`: one bit per passed `Check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStatus(u8);

impl HeapStatus {
    /// The status of a heap that passes every check.
    pub const CONSISTENT: HeapStatus = HeapStatus(0x3f);

    /// The raw status bits. `0x3f` means every check passed.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether every check passed.
    pub fn is_consistent(self) -> bool {
        self == HeapStatus::CONSISTENT
    }

    /// Whether `check` passed.
    pub fn passed(self, check: Check) -> bool {
        self.0 & check.bit() != 0
    }

    /// The checks that failed.
    pub fn failures(self) -> impl Iterator<Item = Check> {
        let all: &'static [Check; 6] = &Check::ALL;
        all.iter()
            .cloned()
            .filter(move |check| !self.passed(*check))
    }
}

impl fmt::Display for HeapStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "heap check status: {:#04x}", self.0)?;
        for check in Check::ALL.iter() {
            let verdict = if self.passed(*check) { "yes" } else { "NO" };
            writeln!(f, "{} {}", check.description(), verdict)?;
        }
        Ok(())
    }
}

/// Block and byte counts from a walk over the heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Total heap size, sentinels included.
    pub heap_size: Bytes,
    /// Number of allocated blocks, sentinels excluded.
    pub allocated_blocks: usize,
    /// Usable payload bytes in allocated blocks.
    pub allocated_payload: Bytes,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Total size of the free blocks, tags included.
    pub free_bytes: Bytes,
    /// Size of the largest free block, tags included.
    pub largest_free: Bytes,
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "heap size:          {}", self.heap_size)?;
        writeln!(
            f,
            "allocated:          {} blocks, {} of payload",
            self.allocated_blocks, self.allocated_payload
        )?;
        writeln!(
            f,
            "free:               {} blocks, {}",
            self.free_blocks, self.free_bytes
        )?;
        writeln!(f, "largest free block: {}", self.largest_free)
    }
}

/// Linear walk over the real blocks between prologue and epilogue.
///
/// Stops early, with `reached_epilogue` unset, at the first block whose
/// header lies outside the heap.
struct Blocks<'a> {
    heap: &'a TagAlloc,
    current: HeapPtr,
    reached_epilogue: bool,
    done: bool,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = HeapPtr;

    fn next(&mut self) -> Option<HeapPtr> {
        if self.done {
            return None;
        }

        let block = self.current;
        if !self.heap.header_in_bounds(block) {
            self.done = true;
            return None;
        }

        let size = block.size(&self.heap.arena);
        if size == Bytes(0) {
            self.done = true;
            self.reached_epilogue = block.header() + WORD.0 == self.heap.arena.size().0;
            return None;
        }

        self.current = HeapPtr(block.0 + size.0);
        Some(block)
    }
}

impl TagAlloc {
    /// Verify the six structural properties of `Check` and report which hold.
    ///
    /// Side-effect free. The cost is linear in the number of blocks.
    pub fn check_consistency(&self) -> HeapStatus {
        let listed = self.listed_blocks();
        let mut status = 0;
        for check in Check::ALL.iter() {
            let passed = match *check {
                Check::FreeListMarkedFree => self.free_list_marked_free(),
                Check::FullyCoalesced => self.fully_coalesced(),
                Check::FreeBlocksListed => self.free_blocks_listed(&listed),
                Check::FreeListInBounds => self.free_list_in_bounds(&listed),
                Check::NoOverlap => self.no_overlap(),
                Check::AllocatedInBounds => self.allocated_in_bounds(),
            };
            if passed {
                status |= check.bit();
            } else {
                debug!("heap check failed: {:?}", check);
            }
        }
        HeapStatus(status)
    }

    /// Count blocks and bytes by walking the heap.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            heap_size: self.arena.size(),
            ..HeapStats::default()
        };
        for block in self.blocks() {
            let tag = block.tag(&self.arena);
            if tag.allocated {
                stats.allocated_blocks += 1;
                stats.allocated_payload = stats.allocated_payload + tag.size - TAG_OVERHEAD;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes = stats.free_bytes + tag.size;
                if tag.size > stats.largest_free {
                    stats.largest_free = tag.size;
                }
            }
        }
        stats
    }

    fn blocks(&self) -> Blocks<'_> {
        Blocks {
            heap: self,
            current: HeapPtr(self.heap_root.0 + DWORD.0),
            reached_epilogue: false,
            done: false,
        }
    }

    fn listed_blocks(&self) -> HashSet<HeapPtr> {
        self.free_list.iter().collect()
    }

    fn word_in_bounds(&self, offset: usize) -> bool {
        match offset.checked_add(WORD.0) {
            Some(end) => self.arena.contains(offset..end),
            None => false,
        }
    }

    fn header_in_bounds(&self, block: HeapPtr) -> bool {
        block.0 >= WORD.0 && self.word_in_bounds(block.header())
    }

    /// Whether the footer lies in the heap, given a readable header.
    fn footer_in_bounds(&self, block: HeapPtr) -> bool {
        let size = block.size(&self.arena);
        size >= TAG_OVERHEAD && self.word_in_bounds(block.0 + size.0 - DWORD.0)
    }

    /// Whether `block` has a sane size and both of its tags lie in the heap.
    fn is_well_formed(&self, block: HeapPtr) -> bool {
        if block.0 % DWORD.0 != 0 || !self.header_in_bounds(block) {
            return false;
        }
        if BoundaryTag::has_stray_bits(self.arena.read_word(block.header())) {
            return false;
        }
        let size = block.size(&self.arena);
        if size < MIN_BLOCK_SIZE || !size.is_aligned() {
            return false;
        }
        self.footer_in_bounds(block) && block.tag(&self.arena) == block.footer_tag(&self.arena)
    }

    fn free_list_marked_free(&self) -> bool {
        self.free_list.iter().all(|block| {
            self.header_in_bounds(block)
                && !block.tag(&self.arena).allocated
                && self.footer_in_bounds(block)
                && !block.footer_tag(&self.arena).allocated
        })
    }

    fn fully_coalesced(&self) -> bool {
        let mut prev_free = false;
        for block in self.blocks() {
            let free = !block.is_allocated(&self.arena);
            if free && prev_free {
                return false;
            }
            prev_free = free;
        }
        true
    }

    fn free_blocks_listed(&self, listed: &HashSet<HeapPtr>) -> bool {
        self.blocks()
            .filter(|block| !block.is_allocated(&self.arena))
            .all(|block| listed.contains(&block))
    }

    fn free_list_in_bounds(&self, listed: &HashSet<HeapPtr>) -> bool {
        // A cycle or a dangling entry leaves part of the table unreachable.
        listed.len() == self.free_list.len()
            && listed.iter().all(|block| self.is_well_formed(*block))
    }

    fn no_overlap(&self) -> bool {
        let mut blocks = self.blocks();
        let mut prev: Option<(HeapPtr, bool)> = None;
        for block in blocks.by_ref() {
            let allocated = block.is_allocated(&self.arena);
            if let Some((prev, true)) = prev {
                // The previous allocated block must end before this header.
                if allocated && prev.footer(&self.arena) >= block.header() {
                    return false;
                }
            }
            prev = Some((block, allocated));
        }
        // Any block that overruns its neighbor throws the walk off the
        // epilogue.
        blocks.reached_epilogue
    }

    fn allocated_in_bounds(&self) -> bool {
        self.blocks()
            .filter(|block| block.is_allocated(&self.arena))
            .all(|block| self.is_well_formed(block))
    }
}
