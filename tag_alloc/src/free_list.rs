//! The explicit free list.
//!
//! An unordered, doubly linked list of the free blocks. New blocks are
//! pushed at the head. The `next`/`prev` links live in a side table keyed by
//! the block's `HeapPtr` instead of inside the free payload, so a free block's
//! bytes are never reinterpreted as metadata. A block is in the list exactly
//! when it has an entry in that table.

use crate::arena::HeapArena;
use crate::block::HeapPtr;
use crate::units::Bytes;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Links {
    next: Option<HeapPtr>,
    prev: Option<HeapPtr>,
}

/// The set of free blocks, with LIFO insertion and *O(1)* removal.
#[derive(Debug, Default)]
pub struct FreeList {
    head: Option<HeapPtr>,
    links: HashMap<HeapPtr, Links>,
}

impl FreeList {
    /// An empty free list.
    pub fn new() -> FreeList {
        FreeList::default()
    }

    /// Forget every block.
    pub fn clear(&mut self) {
        self.head = None;
        self.links.clear();
    }

    /// Number of blocks in the list.
    #[inline]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the list is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Whether `block` is linked into the list.
    #[inline]
    pub fn contains(&self, block: HeapPtr) -> bool {
        self.links.contains_key(&block)
    }

    /// The block after `block` in list order.
    #[inline]
    pub fn next(&self, block: HeapPtr) -> Option<HeapPtr> {
        self.links.get(&block).and_then(|links| links.next)
    }

    /// Make `block` the new head.
    pub fn insert(&mut self, block: HeapPtr) {
        extra_assert!(!self.contains(block), "{:?} is already free", block);

        let old_head = self.head;
        if let Some(old_head) = old_head {
            if let Some(links) = self.links.get_mut(&old_head) {
                links.prev = Some(block);
            }
        }
        self.links.insert(
            block,
            Links {
                next: old_head,
                prev: None,
            },
        );
        self.head = Some(block);
    }

    /// Splice `block` out of the list and drop its links.
    pub fn remove(&mut self, block: HeapPtr) {
        let links = match self.links.remove(&block) {
            Some(links) => links,
            None => {
                extra_assert!(false, "{:?} is not in the free list", block);
                debug!("remove({:?}): block is not in the free list", block);
                return;
            }
        };

        match (links.prev, links.next) {
            (Some(prev), Some(next)) => {
                self.set_next(prev, Some(next));
                self.set_prev(next, Some(prev));
            }
            (Some(prev), None) => {
                self.set_next(prev, None);
            }
            (None, Some(next)) => {
                self.set_prev(next, None);
                self.head = Some(next);
            }
            (None, None) => {
                self.head = None;
            }
        }
    }

    fn set_next(&mut self, block: HeapPtr, next: Option<HeapPtr>) {
        if let Some(links) = self.links.get_mut(&block) {
            links.next = next;
        }
    }

    fn set_prev(&mut self, block: HeapPtr, prev: Option<HeapPtr>) {
        if let Some(links) = self.links.get_mut(&block) {
            links.prev = prev;
        }
    }

    /// First-fit search from the head: the first block whose total size is at
    /// least `size`.
    pub fn find_fit(&self, arena: &HeapArena, size: Bytes) -> Option<HeapPtr> {
        self.iter().find(|block| block.size(arena) >= size)
    }

    /// Walk the list from the head.
    ///
    /// The walk stops after visiting as many blocks as the list holds, so a
    /// corrupted, cyclic list still terminates.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            current: self.head,
            remaining: self.links.len(),
        }
    }
}

/// Iterator over the free list in list order.
pub struct Iter<'a> {
    list: &'a FreeList,
    current: Option<HeapPtr>,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = HeapPtr;

    fn next(&mut self) -> Option<HeapPtr> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.current?;
        self.remaining -= 1;
        self.current = self.list.next(current);
        Some(current)
    }
}
