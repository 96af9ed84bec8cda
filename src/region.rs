use std::{mem, ptr::NonNull};

use log::debug;

use crate::{error::AllocError, kernel, list::Node, utils::align};

/// This is the overhead size introduced by the [`Region`] header in bytes.
/// The header is represented as a [`Node`]. See [`crate::list::List`] for more detail.
pub(crate) const REGION_HEADER_SIZE: usize = mem::size_of::<Node<Region>>();

/// A contiguous span of memory handed out by a [`RegionProvider`].
#[derive(Debug, PartialEq, Eq)]
pub struct RawRegion {
    addr: NonNull<u8>,
    len: usize,
}

impl RawRegion {
    /// Wraps `len` bytes starting at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must be valid for reads and writes of `len` bytes, aligned to at
    /// least the machine word and not used by anyone else while the region lives.
    pub unsafe fn from_raw_parts(addr: NonNull<u8>, len: usize) -> Self {
        Self { addr, len }
    }

    #[inline]
    pub fn addr(&self) -> NonNull<u8> {
        self.addr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Source of raw memory for the allocator.
///
/// # Safety
///
/// Implementations must hand out regions that are zero-filled, readable and
/// writable, aligned to at least `size_of::<usize>()`, at least `min_bytes`
/// long and disjoint from every other region they have handed out and not yet
/// taken back.
pub unsafe trait RegionProvider {
    /// Acquires a region of at least `min_bytes`. Either the whole region is
    /// returned or nothing is.
    fn acquire_region(&mut self, min_bytes: usize) -> Result<RawRegion, AllocError>;

    /// Takes back a region previously returned by [`RegionProvider::acquire_region`].
    ///
    /// # Safety
    ///
    /// `region` must come from this provider and nothing may reference its
    /// memory afterwards.
    unsafe fn release_region(&mut self, region: RawRegion);
}

/// Default provider: anonymous private mappings from the kernel, rounded up
/// to the page size.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageProvider;

impl PageProvider {
    pub const fn new() -> Self {
        Self
    }
}

unsafe impl RegionProvider for PageProvider {
    fn acquire_region(&mut self, min_bytes: usize) -> Result<RawRegion, AllocError> {
        let len = align(min_bytes.max(1), kernel::page_size())
            .ok_or(AllocError::ResourceExhaustion { requested: min_bytes })?;

        let addr = unsafe { kernel::request_memory(len) }
            .ok_or(AllocError::ResourceExhaustion { requested: len })?;

        debug!("mapped region of {len} bytes at {addr:?}");

        Ok(RawRegion { addr, len })
    }

    unsafe fn release_region(&mut self, region: RawRegion) {
        debug!("unmapping region of {} bytes at {:?}", region.len, region.addr);

        unsafe { kernel::return_memory(region.addr, region.len) }
    }
}

/// Header written at the start of every region the allocator owns.
///
/// Regions are not adjacent to each other, so the allocator keeps them in a
/// list of their own just to be able to give them back when it is dropped:
///
/// ```text
/// +-----------------------------------------------+      +-----------------------------------------------+
/// |        | +-------+    +-------+    +-------+  |      |        | +-------+    +-------+    +-------+  |
/// | Region | | Block | -> | Block | -> | Block |  | ---> | Region | | Block | -> | Block | -> | Block |  |
/// |        | +-------+    +-------+    +-------+  |      |        | +-------+    +-------+    +-------+  |
/// +-----------------------------------------------+      +-----------------------------------------------+
/// ```
///
/// The blocks themselves are threaded through a single list that spans all
/// regions, see [`crate::directory::BlockDirectory`].
pub(crate) struct Region {
    /// Total size of the mapping, header included.
    pub size: usize,
}

impl Region {
    /// Address of the first block header inside the region.
    #[inline]
    pub fn first_block_addr(node: NonNull<Node<Region>>) -> NonNull<u8> {
        unsafe { node.cast::<u8>().add(REGION_HEADER_SIZE) }
    }

    /// Bytes left for blocks once the region header is accounted for.
    #[inline]
    pub fn block_space(&self) -> usize {
        self.size - REGION_HEADER_SIZE
    }

    /// Rebuilds the [`RawRegion`] this header was written into.
    #[inline]
    pub fn raw(node: NonNull<Node<Region>>) -> RawRegion {
        unsafe {
            let size = node.as_ref().data.size;
            RawRegion::from_raw_parts(node.cast(), size)
        }
    }
}
