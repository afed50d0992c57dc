//! Merging a free block with its free physical neighbors.

use crate::block::{BoundaryTag, HeapPtr};
use crate::extra_assert;
use crate::TagAlloc;

impl TagAlloc {
    /// Merge the free, unlisted `block` with whichever of its neighbors are
    /// free, and push the result onto the free list.
    ///
    /// The merged block keeps the lowest header and the highest footer, so
    /// when the previous neighbor is free the result is that neighbor, not
    /// `block`. Callers must continue with the returned `HeapPtr` and drop
    /// the one they passed in.
    pub(crate) fn coalesce(&mut self, block: HeapPtr) -> HeapPtr {
        extra_assert!(!block.is_allocated(&self.arena));
        extra_assert!(!self.free_list.contains(block));

        let size = block.size(&self.arena);
        let prev_tag = block.prev_tag(&self.arena);
        let prev = block.prev_block(&self.arena);
        let next = block.next_block(&self.arena);
        let next_tag = next.tag(&self.arena);

        let merged = match (prev_tag.allocated, next_tag.allocated) {
            (true, true) => block,
            (true, false) => {
                self.free_list.remove(next);
                block.write_tags(&mut self.arena, BoundaryTag::free(size + next_tag.size));
                block
            }
            (false, true) => {
                self.free_list.remove(prev);
                prev.write_tags(&mut self.arena, BoundaryTag::free(prev_tag.size + size));
                prev
            }
            (false, false) => {
                self.free_list.remove(prev);
                self.free_list.remove(next);
                let total = prev_tag.size + size + next_tag.size;
                prev.write_tags(&mut self.arena, BoundaryTag::free(total));
                prev
            }
        };

        self.free_list.insert(merged);
        if cfg!(feature = "extra_assertions") {
            let len = merged.payload_size(&self.arena).0;
            extra_assert::write_free_pattern(self.arena.slice_mut(merged.0..merged.0 + len));
        }

        trace!("coalesce({:?}) -> {:?}", block, merged);
        merged
    }
}
