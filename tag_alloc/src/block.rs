//! Block encoding: boundary tags and the address arithmetic between a
//! payload, its tags and its physical neighbors.
//!
//! ```text
//!          header                                   footer
//!        +--------+------------------------------+--------+
//!  ...   | size|a |  payload (size - 8 bytes)    | size|a |  next header ...
//!        +--------+------------------------------+--------+
//!                 ^
//!                 HeapPtr
//! ```
//!
//! Header and footer always hold the same tag. Every write goes through
//! `HeapPtr::write_tags`, which writes both.

use crate::arena::HeapArena;
use crate::units::{Bytes, DWORD, WORD};

/// The allocation bit in an encoded tag word.
const ALLOCATED_BIT: u32 = 0b1;

/// The low three bits of a tag word never hold size information.
const SIZE_MASK: u32 = !0b111;

/// The largest block size a 32-bit tag can encode.
pub const MAX_BLOCK_SIZE: Bytes = Bytes(SIZE_MASK as usize);

/// Header plus footer.
pub const TAG_OVERHEAD: Bytes = Bytes(2 * WORD.0);

/// The smallest block that can sit in the free list: header, two link
/// words and footer.
pub const MIN_BLOCK_SIZE: Bytes = Bytes(4 * WORD.0);

/// A block's size and allocation state, as stored in its header and footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryTag {
    /// Total block size, including header and footer.
    pub size: Bytes,
    /// Whether the block is handed out to a caller.
    pub allocated: bool,
}

impl BoundaryTag {
    /// A tag for a free block of `size` bytes.
    #[inline]
    pub fn free(size: Bytes) -> BoundaryTag {
        BoundaryTag {
            size,
            allocated: false,
        }
    }

    /// A tag for an allocated block of `size` bytes.
    #[inline]
    pub fn allocated(size: Bytes) -> BoundaryTag {
        BoundaryTag {
            size,
            allocated: true,
        }
    }

    #[inline]
    pub(crate) fn encode(self) -> u32 {
        extra_assert!(self.size.is_aligned(), "unaligned block size {:?}", self.size);
        extra_assert!(self.size <= MAX_BLOCK_SIZE);
        let bit = if self.allocated { ALLOCATED_BIT } else { 0 };
        self.size.0 as u32 | bit
    }

    #[inline]
    fn decode(word: u32) -> BoundaryTag {
        BoundaryTag {
            size: Bytes((word & SIZE_MASK) as usize),
            allocated: word & ALLOCATED_BIT != 0,
        }
    }

    /// Whether the raw word this tag was read from had any bits set that are
    /// neither size nor allocation bit.
    #[inline]
    pub(crate) fn has_stray_bits(word: u32) -> bool {
        word & !SIZE_MASK & !ALLOCATED_BIT != 0
    }
}

/// A payload offset into the heap arena. This is the allocator's pointer
/// type: callers get one from `allocate` and hand it back to `deallocate`
/// or `reallocate`.
///
/// A block's identity is its payload offset. Coalescing can fold a block
/// into its lower neighbor, after which the old `HeapPtr` no longer names a
/// block at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapPtr(pub(crate) usize);

impl HeapPtr {
    /// The payload's byte offset from the start of the arena.
    #[inline]
    pub fn offset(self) -> usize {
        self.0
    }

    /// Offset of this block's header word.
    #[inline]
    pub(crate) fn header(self) -> usize {
        self.0 - WORD.0
    }

    /// Offset of this block's footer word. Depends on the size stored in the
    /// header, so the header must be valid before calling this.
    #[inline]
    pub(crate) fn footer(self, arena: &HeapArena) -> usize {
        self.0 + self.size(arena).0 - DWORD.0
    }

    /// The tag stored in the header.
    #[inline]
    pub(crate) fn tag(self, arena: &HeapArena) -> BoundaryTag {
        BoundaryTag::decode(arena.read_word(self.header()))
    }

    /// The tag stored in the footer.
    #[inline]
    pub(crate) fn footer_tag(self, arena: &HeapArena) -> BoundaryTag {
        BoundaryTag::decode(arena.read_word(self.footer(arena)))
    }

    #[inline]
    pub(crate) fn size(self, arena: &HeapArena) -> Bytes {
        self.tag(arena).size
    }

    #[inline]
    pub(crate) fn is_allocated(self, arena: &HeapArena) -> bool {
        self.tag(arena).allocated
    }

    /// Usable bytes between header and footer.
    #[inline]
    pub(crate) fn payload_size(self, arena: &HeapArena) -> Bytes {
        self.size(arena) - TAG_OVERHEAD
    }

    /// The physically following block.
    #[inline]
    pub(crate) fn next_block(self, arena: &HeapArena) -> HeapPtr {
        HeapPtr(self.0 + self.size(arena).0)
    }

    /// The tag of the physically preceding block, read from its footer which
    /// sits directly before our header.
    #[inline]
    pub(crate) fn prev_tag(self, arena: &HeapArena) -> BoundaryTag {
        BoundaryTag::decode(arena.read_word(self.0 - DWORD.0))
    }

    /// The physically preceding block.
    #[inline]
    pub(crate) fn prev_block(self, arena: &HeapArena) -> HeapPtr {
        HeapPtr(self.0 - self.prev_tag(arena).size.0)
    }

    /// Write `tag` to both header and footer. The footer lands where the
    /// *new* size puts it.
    #[inline]
    pub(crate) fn write_tags(self, arena: &mut HeapArena, tag: BoundaryTag) {
        let word = tag.encode();
        arena.write_word(self.header(), word);
        arena.write_word(self.0 + tag.size.0 - DWORD.0, word);
        extra_assert_eq!(self.tag(arena), self.footer_tag(arena));
    }

    /// Write the zero-sized, allocated epilogue header. The epilogue has no
    /// footer: its header is the last word of the heap.
    #[inline]
    pub(crate) fn write_epilogue(self, arena: &mut HeapArena) {
        arena.write_word(self.header(), BoundaryTag::allocated(Bytes(0)).encode());
    }
}
