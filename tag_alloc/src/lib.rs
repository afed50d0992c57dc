/*!

`tag_alloc`: an explicit free list allocator with boundary tags.

`tag_alloc` manages a single heap that lives in a growable byte arena. It
hands out payloads with `allocate`, takes them back with `deallocate`, and
resizes them with `reallocate`, without ever calling into the host
allocator after the arena is created.

- **Boundary tags:** every block carries its size and allocation bit in a
  header word *and* a footer word, so both physical neighbors of a block are
  found in *O(1)*.

- **Explicit free list:** free blocks are kept in an unordered, doubly linked
  list. Freed and split-off blocks are pushed at the head (LIFO).

- **Immediate coalescing:** a block that becomes free is merged with any free
  neighbor right away, so no two adjacent blocks are ever both free.

- **First fit:** allocation takes the first block in list order that is
  large enough, splitting off the surplus when it is big enough to be useful.

- **Checkable:** `TagAlloc::check_consistency` walks the heap and the free
  list independently and reports six structural properties.

`tag_alloc` is single threaded. Wrap it in an [`Exclusive`] to share one heap
between threads.

- [Using `tag_alloc`](#using-tag_alloc)
- [`cargo` Features](#cargo-features)
- [Configuration](#configuration)
- [Implementation Notes](#implementation-notes)

## Using `tag_alloc`

```
extern crate tag_alloc;

use tag_alloc::TagAlloc;

let mut heap = TagAlloc::init().expect("the default arena is large enough");

let p = heap.allocate(24).expect("heap has room for 24 bytes");
heap.payload_mut(p)[..5].copy_from_slice(b"hello");

let p = heap.reallocate(Some(p), 100).expect("heap has room for 100 bytes");
assert_eq!(&heap.payload(p)[..5], b"hello");

heap.deallocate(p);
assert!(heap.check_consistency().is_consistent());
```

Pointers are [`HeapPtr`]s: opaque payload offsets into the arena. The payload
is reached through `payload` / `payload_mut`, which are bounds checked.

## `cargo` Features

- **extra_assertions**: Enable various extra, expensive integrity assertions
  and defensive mechanisms, such as poisoning freed memory and running the
  full consistency check after every operation. This incurs a large runtime
  overhead. It is useful when debugging a use-after-free or `tag_alloc`
  itself.

## Configuration

The arena capacity defaults to 20 MiB. Set the `TAG_ALLOC_MAX_HEAP_BYTES`
environment variable at build time to change the default, or pass a
[`Config`] to `TagAlloc::with_config`.

## Implementation Notes

The heap starts with an unused padding word, a *prologue* block (an
allocated block with no payload) and ends with an *epilogue* header (an
allocated block of size zero). The sentinels mean that every real block has
two neighbors with valid tags, so coalescing never needs a bounds check.

```text
  0    4        8       12 16
  +----+--------+--------+---------------------------+-----+ +------+
  |pad | 8 | a  | 8 | a  |  blocks ...               | ... | | 0|a  |
  +----+--------+--------+---------------------------+-----+ +------+
       prologue header/footer                          epilogue header
```

Sizes are multiples of eight bytes and include the header and footer. A
payload therefore always starts at an offset that is a multiple of eight.

When no free block fits a request, the heap grows by the larger of the
request and `Config::chunk_size` (one 4 KiB page by default). The new space
becomes a free block that is immediately coalesced with a free block
trailing the old heap.

Growing a block with `reallocate` first tries to absorb a free successor in
place, growing the heap under it if it is the last block. Otherwise the
payload moves to a fresh block. Shrinking never moves or splits a block.

 */

#![deny(missing_docs)]

#[macro_use]
extern crate log;
extern crate spin;

#[macro_use]
mod extra_assert;

mod arena;
mod block;
mod checker;
mod coalesce;
mod config;
mod exclusive;
mod free_list;
pub mod units;

pub use block::HeapPtr;
pub use checker::{Check, HeapStats, HeapStatus};
pub use config::{Config, DEFAULT_MAX_HEAP};
pub use exclusive::{Exclusive, SharedTagAlloc};

use arena::HeapArena;
use block::{BoundaryTag, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, TAG_OVERHEAD};
use core::cmp;
use core::fmt;
use free_list::FreeList;
use units::{Bytes, RoundUpTo, Words, DWORD};

/// The heap arena could not grow far enough to satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("the heap arena is exhausted")
    }
}

impl std::error::Error for OutOfMemory {}

// A free block is only split when the leftover exceeds this, so the leftover
// can always hold a header, two link words and a footer with room to spare.
const SPLIT_THRESHOLD: Bytes = Bytes(4 * DWORD.0);

// Header and footer of the prologue block, plus the padding word before it
// and the epilogue header after it.
const SENTINEL_WORDS: Words = Words(4);

/// The total block size needed for a payload of `size` bytes, or `None` if
/// no boundary tag could describe it.
fn block_size_for(size: usize) -> Option<Bytes> {
    let size = Bytes(size).align_up()?.checked_add(TAG_OVERHEAD)?;
    if size > MAX_BLOCK_SIZE {
        None
    } else {
        Some(size)
    }
}

/// A boundary-tag heap.
///
/// All operations run to completion synchronously. `TagAlloc` owns its arena,
/// so independent heaps can live side by side.
pub struct TagAlloc {
    arena: HeapArena,
    free_list: FreeList,
    // The prologue's payload. The first real block follows it.
    heap_root: HeapPtr,
    config: Config,
}

impl TagAlloc {
    /// Create a heap with the default configuration, write the sentinels and
    /// seed the free list with one chunk.
    pub fn init() -> Result<TagAlloc, OutOfMemory> {
        TagAlloc::with_config(Config::default())
    }

    /// Create a heap with the given configuration.
    pub fn with_config(config: Config) -> Result<TagAlloc, OutOfMemory> {
        let mut heap = TagAlloc {
            arena: HeapArena::with_capacity(config.max_heap()),
            free_list: FreeList::new(),
            heap_root: HeapPtr(DWORD.0),
            config,
        };
        heap.reset()?;
        Ok(heap)
    }

    /// Throw away every block and start over with a fresh heap in the same
    /// arena. All outstanding `HeapPtr`s become invalid.
    pub fn reset(&mut self) -> Result<(), OutOfMemory> {
        self.arena.reset();
        self.free_list.clear();

        let start = self.arena.extend(SENTINEL_WORDS)?;
        self.arena.write_word(start, 0);

        let prologue = HeapPtr(start + DWORD.0);
        prologue.write_tags(&mut self.arena, BoundaryTag::allocated(DWORD));
        prologue.next_block(&self.arena).write_epilogue(&mut self.arena);
        self.heap_root = prologue;

        let chunk: Words = self.config.chunk_size().round_up_to();
        self.extend_heap(chunk)?;

        debug!(
            "initialized heap: {} of {} in use",
            self.arena.size(),
            self.arena.capacity()
        );
        self.assert_consistent();
        Ok(())
    }

    /// Allocate a payload of at least `size` bytes, aligned to eight bytes.
    ///
    /// Returns `None` for a zero-sized request, and when the heap cannot grow
    /// far enough.
    pub fn allocate(&mut self, size: usize) -> Option<HeapPtr> {
        if size == 0 {
            return None;
        }

        let block_size = match block_size_for(size) {
            Some(block_size) => block_size,
            None => {
                warn!("allocate({}): request too large", size);
                return None;
            }
        };

        let block = match self.free_list.find_fit(&self.arena, block_size) {
            Some(block) => block,
            None => {
                // The extension is the fit: after coalescing it is at least
                // `block_size` bytes, so there is no need to search again.
                let growth = cmp::max(block_size, self.config.chunk_size());
                match self.extend_heap(growth.round_up_to()) {
                    Ok(block) => block,
                    Err(OutOfMemory) => {
                        warn!("allocate({}): out of memory", size);
                        return None;
                    }
                }
            }
        };

        self.place(block, block_size);
        trace!("allocate({}) -> {:?}", size, block);
        self.assert_consistent();
        Some(block)
    }

    /// Free a payload.
    ///
    /// `ptr` must have come from `allocate` or `reallocate` on this heap and
    /// must not have been freed since. Violations are not detected (except
    /// with the "extra_assertions" feature): they corrupt the heap, which
    /// `check_consistency` will usually report, and may panic later.
    pub fn deallocate(&mut self, ptr: HeapPtr) {
        extra_assert!(ptr.is_allocated(&self.arena), "{:?} is not allocated", ptr);

        let size = ptr.size(&self.arena);
        ptr.write_tags(&mut self.arena, BoundaryTag::free(size));
        let merged = self.coalesce(ptr);

        trace!("deallocate({:?}) -> free block {:?}", ptr, merged);
        self.assert_consistent();
    }

    /// Resize a payload to `size` bytes.
    ///
    /// - `None` behaves like `allocate(size)`.
    /// - A `size` of zero frees the payload and returns `None`.
    /// - Shrinking returns `ptr` unchanged.
    /// - Growing keeps the payload in place when the following block is free
    ///   and can make up the difference, otherwise it moves the payload to a
    ///   new block, preserving its contents.
    ///
    /// When growing fails the original payload is left untouched and `None`
    /// is returned.
    pub fn reallocate(&mut self, ptr: Option<HeapPtr>, size: usize) -> Option<HeapPtr> {
        let ptr = match ptr {
            Some(ptr) => ptr,
            None => return self.allocate(size),
        };

        if size == 0 {
            self.deallocate(ptr);
            return None;
        }

        let new_size = match block_size_for(size) {
            Some(new_size) => new_size,
            None => {
                warn!("reallocate({:?}, {}): request too large", ptr, size);
                return None;
            }
        };

        let old_size = ptr.size(&self.arena);
        if new_size <= old_size {
            trace!("reallocate({:?}, {}) -> fits in place", ptr, size);
            return Some(ptr);
        }

        if self.grow_in_place(ptr, old_size, new_size) {
            trace!("reallocate({:?}, {}) -> grown in place", ptr, size);
            self.assert_consistent();
            return Some(ptr);
        }

        let new_ptr = self.allocate(size)?;
        let len = cmp::min(ptr.payload_size(&self.arena).0, size);
        self.arena.copy_within(ptr.0, new_ptr.0, len);
        self.deallocate(ptr);

        trace!("reallocate({:?}, {}) -> moved to {:?}", ptr, size, new_ptr);
        Some(new_ptr)
    }

    /// Try to grow `ptr` to `new_size` by absorbing its free successor, and
    /// the heap beyond it if the successor is the last block.
    fn grow_in_place(&mut self, ptr: HeapPtr, old_size: Bytes, new_size: Bytes) -> bool {
        let next = ptr.next_block(&self.arena);
        if next.is_allocated(&self.arena) {
            return false;
        }

        let mut neighbor = next;
        let mut available = old_size + next.size(&self.arena);
        if available < new_size {
            let is_last = next.next_block(&self.arena).size(&self.arena) == Bytes(0);
            if !is_last {
                return false;
            }

            let shortfall = cmp::max(new_size - available, MIN_BLOCK_SIZE);
            neighbor = match self.extend_heap(shortfall.round_up_to()) {
                Ok(neighbor) => neighbor,
                Err(OutOfMemory) => return false,
            };
            extra_assert_eq!(neighbor, next, "extension must merge into the successor");
            available = old_size + neighbor.size(&self.arena);
        }

        extra_assert::assert_is_poisoned_with_free_pattern(self.payload(neighbor));
        self.free_list.remove(neighbor);
        self.carve(ptr, available, new_size);
        true
    }

    /// Grow the heap by `words` (rounded up to an even count), turn the new
    /// space into a free block and coalesce it with a trailing free block.
    ///
    /// Returns the block now covering the new space, which starts below the
    /// new space when coalescing merged it into its predecessor.
    fn extend_heap(&mut self, words: Words) -> Result<HeapPtr, OutOfMemory> {
        let start = self.arena.extend(words)?;
        let size = self.arena.size() - Bytes(start);

        // The old epilogue header becomes the new block's header.
        let block = HeapPtr(start);
        block.write_tags(&mut self.arena, BoundaryTag::free(size));
        block.next_block(&self.arena).write_epilogue(&mut self.arena);

        debug!("extended heap by {} to {}", size, self.arena.size());
        Ok(self.coalesce(block))
    }

    /// Hand out the free `block` for a `size`-byte allocation.
    fn place(&mut self, block: HeapPtr, size: Bytes) {
        extra_assert!(!self.free_list.is_empty());
        extra_assert::assert_is_poisoned_with_free_pattern(self.payload(block));

        let available = block.size(&self.arena);
        self.free_list.remove(block);
        self.carve(block, available, size);
    }

    /// Mark `block`, which spans `available` bytes and is in no list, as
    /// allocated with `size` bytes. A surplus above the split threshold
    /// becomes a new free block; a smaller one stays part of the allocation.
    fn carve(&mut self, block: HeapPtr, available: Bytes, size: Bytes) {
        extra_assert!(available >= size);
        let surplus = available - size;
        if surplus <= SPLIT_THRESHOLD {
            block.write_tags(&mut self.arena, BoundaryTag::allocated(available));
            return;
        }

        block.write_tags(&mut self.arena, BoundaryTag::allocated(size));
        let rest = block.next_block(&self.arena);
        rest.write_tags(&mut self.arena, BoundaryTag::free(surplus));
        trace!("split {} off {:?} into {:?}", surplus, block, rest);
        self.coalesce(rest);
    }

    /// The payload of an allocated block.
    pub fn payload(&self, ptr: HeapPtr) -> &[u8] {
        let len = ptr.payload_size(&self.arena).0;
        self.arena.slice(ptr.0..ptr.0 + len)
    }

    /// The payload of an allocated block, for writing.
    pub fn payload_mut(&mut self, ptr: HeapPtr) -> &mut [u8] {
        let len = ptr.payload_size(&self.arena).0;
        self.arena.slice_mut(ptr.0..ptr.0 + len)
    }

    /// Usable size of a payload. At least the size it was requested with.
    pub fn payload_size(&self, ptr: HeapPtr) -> usize {
        ptr.payload_size(&self.arena).0
    }

    /// Offset of the first heap byte.
    pub fn heap_lo(&self) -> usize {
        self.arena.low()
    }

    /// Offset of the last heap byte.
    pub fn heap_hi(&self) -> usize {
        self.arena.high()
    }

    /// Current heap size. The heap never shrinks, so this is also its
    /// high-water mark.
    pub fn heap_size(&self) -> Bytes {
        self.arena.size()
    }

    /// The configuration this heap was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Share this heap between threads behind a single lock.
    pub fn into_shared(self) -> SharedTagAlloc {
        Exclusive::new(self)
    }

    #[inline]
    fn assert_consistent(&self) {
        if cfg!(feature = "extra_assertions") {
            let status = self.check_consistency();
            assert!(status.is_consistent(), "heap is inconsistent\n{}", status);
        }
    }
}

impl fmt::Debug for TagAlloc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TagAlloc")
            .field("heap_size", &self.arena.size())
            .field("free_blocks", &self.free_list.len())
            .field("config", &self.config)
            .finish()
    }
}
