use std::ptr::NonNull;

use log::trace;

use crate::{
    block::{BLOCK_HEADER_SIZE, Block},
    list::{Link, List, Node},
};

/// Snapshot of one block, as reported by [`crate::MemAlloc::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Payload address (what [`crate::MemAlloc::allocate`] returns for this block).
    pub addr: NonNull<u8>,
    /// Payload size in bytes, header excluded.
    pub size: usize,
    pub is_free: bool,
}

/// List of every [`Block`] the allocator manages, free or not.
///
/// Blocks are linked in the order they were carved: a block created by a split
/// is linked right after the block it came from, and a block created for a fresh
/// region is linked at the head. Inside one region the list order is therefore
/// the address order:
///
/// ```text
///          region B (newer)                         region A (initial)
/// +--------------------------------+      +-------------------------------------------+
/// |        | +-------+    +------+ |      |        | +-------+    +------+    +------+ |
/// | Region | | Block | -> | Free | | ---> | Region | | Block | -> | Free | -> | Free | |
/// |        | +-------+    +------+ |      |        | +-------+    +------+    +------+ |
/// +--------------------------------+      +-------------------------------------------+
/// ```
///
/// Two list neighbours are only physically adjacent when the second one starts
/// exactly where the payload of the first one ends, which is never the case
/// across regions because every region starts with its own header.
pub(crate) struct BlockDirectory {
    blocks: List<Block>,
}

impl BlockDirectory {
    pub const fn new() -> Self {
        Self {
            blocks: List::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Writes a new block header at `addr` and links it as the head of the list.
    ///
    /// **SAFETY**: `addr` must be word aligned, writable for `BLOCK_HEADER_SIZE +
    /// block.size` bytes and not overlap any block already in the directory.
    pub unsafe fn push_front(&mut self, block: Block, addr: NonNull<u8>) -> NonNull<Node<Block>> {
        unsafe { self.blocks.push_front(block, addr) }
    }

    /// Returns the first block in list order that is free and can hold `size` bytes.
    ///
    /// This is first-fit: the scan is linear in the number of blocks and among
    /// several candidates the one closer to the head always wins.
    pub fn find_free_block(&self, size: usize) -> Link<Node<Block>> {
        self.blocks.nodes().find(|node| {
            let block = unsafe { &node.as_ref().data };
            block.is_free && block.size >= size
        })
    }

    /// Whether splitting a block of `block_size` to keep `size` bytes leaves room
    /// for a new header plus at least one byte.
    #[inline]
    pub fn can_split(block_size: usize, size: usize) -> bool {
        size.checked_add(BLOCK_HEADER_SIZE)
            .is_some_and(|needed| block_size > needed)
    }

    /// Truncates `node` to `size` bytes and turns the tail into a new free block
    /// linked right after it. Nothing happens if the tail could not hold a header
    /// plus one byte; the block is then handed out oversized.
    ///
    /// Returns the new free block, if any.
    ///
    /// **SAFETY**: `node` must belong to this directory and `size` must be a
    /// multiple of the machine word.
    pub unsafe fn split(&mut self, mut node: NonNull<Node<Block>>, size: usize) -> Link<Node<Block>> {
        unsafe {
            let block_size = node.as_ref().data.size;

            if !Self::can_split(block_size, size) {
                return None;
            }

            let remainder = block_size - size - BLOCK_HEADER_SIZE;
            let addr = Block::payload(node).add(size);

            node.as_mut().data.size = size;
            let free = self.blocks.insert_after(node, Block::new(remainder, true), addr);

            trace!("split {node:?}: kept {size} bytes, {remainder} bytes free at {free:?}");

            Some(free)
        }
    }

    /// Merges every run of physically adjacent free blocks into its first block.
    ///
    /// Runs to a fixed point in one pass: after a merge the same block is checked
    /// against its new neighbour. Calling it again right away changes nothing.
    /// Returns how many headers were absorbed.
    pub fn coalesce(&mut self) -> usize {
        let mut merged = 0;
        let mut current = self.blocks.first();

        while let Some(mut node) = current {
            unsafe {
                let Some(next) = node.as_ref().next else {
                    break;
                };

                if Self::mergeable(node, next) {
                    let absorbed = next.as_ref().data.size;
                    node.as_mut().data.size += BLOCK_HEADER_SIZE + absorbed;
                    self.blocks.remove(next);
                    merged += 1;

                    trace!("merged {next:?} ({absorbed} bytes) into {node:?}");
                } else {
                    current = Some(next);
                }
            }
        }

        merged
    }

    fn mergeable(node: NonNull<Node<Block>>, next: NonNull<Node<Block>>) -> bool {
        unsafe {
            node.as_ref().data.is_free
                && next.as_ref().data.is_free
                && Block::end_addr(node) == next.as_ptr() as usize
        }
    }

    /// Snapshot of every block, in list order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.blocks.nodes().map(|node| {
            let block = unsafe { &node.as_ref().data };

            BlockInfo {
                addr: Block::payload(node),
                size: block.size,
                is_free: block.is_free,
            }
        })
    }

    /// Iterates over the block headers, in list order.
    pub fn iter(&self) -> impl Iterator<Item = &Block> + '_ {
        self.blocks.iter()
    }
}
