use std::{mem, ptr::NonNull};

use crate::list::Node;

/// Header size of a block. We need to add the overhead introduced by our
/// [`Node`] structure since we always use our `Block` as a node of our linked list.
pub(crate) const BLOCK_HEADER_SIZE: usize = mem::size_of::<Node<Block>>();

/// Magic word written in every header when the `debug-canary` feature is on.
#[cfg(feature = "debug-canary")]
pub(crate) const BLOCK_CANARY: usize = 0x4649_5253_5446_4954_u64 as usize; // "FIRSTFIT"

/// This is the structure of a block. The fields of the block are its metadata,
/// content is placed after this header.
///
/// The following diagram represents this structure ignoring that the block will be
/// wrapped inside a [`Node`]
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        | -> Header
/// |    is_free (1b)     |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Addressable content (`size` bytes)
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// `size` never counts the header. Sizes are always a multiple of the machine
/// word, which keeps every header written right after a payload aligned.
pub(crate) struct Block {
    /// Size of the payload.
    pub size: usize,
    /// Flag to tell whether the block is free or not.
    pub is_free: bool,
    #[cfg(feature = "debug-canary")]
    pub canary: usize,
}

impl Block {
    #[inline]
    pub fn new(size: usize, is_free: bool) -> Self {
        Self {
            size,
            is_free,
            #[cfg(feature = "debug-canary")]
            canary: BLOCK_CANARY,
        }
    }

    /// Pointer handed to the user for the block at `node`.
    #[inline]
    pub fn payload(node: NonNull<Node<Block>>) -> NonNull<u8> {
        unsafe { node.cast::<u8>().add(BLOCK_HEADER_SIZE) }
    }

    /// Recovers the header that precedes a payload pointer.
    ///
    /// **SAFETY**: `payload` must have been returned by [`Block::payload`] for a block
    /// that is still part of the directory.
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<Node<Block>> {
        unsafe { payload.sub(BLOCK_HEADER_SIZE).cast() }
    }

    /// Address of the first byte past the payload of the block at `node`.
    #[inline]
    pub fn end_addr(node: NonNull<Node<Block>>) -> usize {
        unsafe { node.as_ptr() as usize + BLOCK_HEADER_SIZE + node.as_ref().data.size }
    }

    /// Whether the header looks like one this allocator wrote.
    #[cfg(feature = "debug-canary")]
    #[inline]
    pub fn is_intact(&self) -> bool {
        self.canary == BLOCK_CANARY
    }

    /// Whether the header looks like one this allocator wrote. Without the
    /// canary there is nothing to compare against.
    #[cfg(not(feature = "debug-canary"))]
    #[inline]
    pub fn is_intact(&self) -> bool {
        true
    }
}
