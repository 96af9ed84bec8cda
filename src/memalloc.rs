use std::ptr::{self, NonNull};

use log::debug;

use crate::{
    block::{BLOCK_HEADER_SIZE, Block},
    config::Config,
    directory::{BlockDirectory, BlockInfo},
    error::AllocError,
    list::{List, Node},
    region::{PageProvider, REGION_HEADER_SIZE, Region, RegionProvider},
    utils::{WORD_SIZE, align, align_down},
};

/// Aggregated view of the allocator state, see [`MemAlloc::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Regions obtained from the provider.
    pub regions: usize,
    /// Blocks in the directory, free or not.
    pub blocks: usize,
    pub free_blocks: usize,
    /// Payload bytes of free blocks.
    pub free_bytes: usize,
    /// Payload bytes of blocks in use.
    pub used_bytes: usize,
}

/// First-fit free-list allocator over memory regions obtained from a
/// [`RegionProvider`].
///
/// Every block, free or in use, starts with a header and lives in a single
/// [`BlockDirectory`]. Allocation scans it for the first free block that fits,
/// splits off whatever is left over, and falls back to mapping a new region.
/// Freeing marks the block free and merges it with its free neighbours.
///
/// The allocator is single threaded: every operation takes `&mut self`. Wrap it
/// in [`crate::Locked`] to share it between threads.
///
/// Pointers returned by this type are aligned to the machine word and stay
/// valid until they are passed to [`MemAlloc::free`] or [`MemAlloc::resize`],
/// or the allocator is dropped.
pub struct MemAlloc<P: RegionProvider = PageProvider> {
    config: Config,
    provider: P,
    /// Every region we own. Only walked to give them back on drop.
    regions: List<Region>,
    directory: BlockDirectory,
}

// The allocator owns all the memory its raw pointers refer to.
unsafe impl<P: RegionProvider + Send> Send for MemAlloc<P> {}

impl MemAlloc<PageProvider> {
    /// Allocator with the default [`Config`] over kernel pages. Nothing is
    /// mapped until the first allocation or [`MemAlloc::initialize`].
    pub const fn new() -> Self {
        Self::with_config(Config::DEFAULT, PageProvider::new())
    }
}

impl Default for MemAlloc<PageProvider> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: RegionProvider> MemAlloc<P> {
    pub const fn with_config(config: Config, provider: P) -> Self {
        Self {
            config,
            provider,
            regions: List::new(),
            directory: BlockDirectory::new(),
        }
    }

    pub const fn with_provider(provider: P) -> Self {
        Self::with_config(Config::DEFAULT, provider)
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.regions.is_empty()
    }

    /// Maps the initial region and turns it into one free block.
    ///
    /// Does nothing if the allocator is already initialised. On failure the
    /// allocator stays uninitialised and the next call tries again.
    pub fn initialize(&mut self) -> Result<(), AllocError> {
        if self.is_initialized() {
            return Ok(());
        }

        let min_bytes = self
            .config
            .initial_region_size
            .max(REGION_HEADER_SIZE + BLOCK_HEADER_SIZE);

        self.add_region(min_bytes)?;

        debug!(
            "initialised with a region of {} bytes",
            self.regions.last().map_or(0, |node| unsafe { node.as_ref().data.size })
        );

        Ok(())
    }

    /// Allocates `size` bytes. Returns a null pointer if no region could be
    /// obtained for the request.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        match self.try_allocate(size) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    /// Same as [`MemAlloc::allocate`] but tells why it failed.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.initialize()?;

        let size = Self::block_size(size)?;

        let mut node = match self.directory.find_free_block(size) {
            Some(node) => node,
            None => self.grow(size)?,
        };

        unsafe {
            self.directory.split(node, size);
            node.as_mut().data.is_free = false;
        }

        Ok(Block::payload(node))
    }

    /// Releases the block behind `ptr`. Null pointers are ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this allocator. Freeing
    /// the same pointer twice, or a pointer from anywhere else, is undefined
    /// behaviour and is not detected.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        unsafe {
            let mut node = Block::from_payload(ptr);
            Self::check_live(node);
            node.as_mut().data.is_free = true;
        }

        self.directory.coalesce();
    }

    /// Allocates room for `count` elements of `elem_size` bytes each, all set
    /// to zero.
    ///
    /// `count * elem_size` must fit in a `usize`; if it does not, a null
    /// pointer is returned.
    pub fn zero_allocate(&mut self, count: usize, elem_size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(elem_size) else {
            return ptr::null_mut();
        };

        match self.try_allocate(total) {
            Ok(ptr) => {
                // Reused blocks still hold whatever their previous owner wrote.
                unsafe { ptr.as_ptr().write_bytes(0, total) };
                ptr.as_ptr()
            }
            Err(_) => ptr::null_mut(),
        }
    }

    /// Changes the size of the block behind `ptr` to `new_size` bytes.
    ///
    /// - A null `ptr` behaves like [`MemAlloc::allocate`].
    /// - A `new_size` of zero behaves like [`MemAlloc::free`] and returns null.
    /// - Shrinking happens in place; the tail is released if it can hold a
    ///   block of its own.
    /// - Growing moves the data to a new block and releases the old one. If the
    ///   new block cannot be obtained, null is returned and `ptr` stays valid.
    ///
    /// # Safety
    ///
    /// Same contract as [`MemAlloc::free`].
    pub unsafe fn resize(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        let Some(old) = NonNull::new(ptr) else {
            return self.allocate(new_size);
        };

        if new_size == 0 {
            unsafe { self.free(ptr) };
            return ptr::null_mut();
        }

        let Ok(size) = Self::block_size(new_size) else {
            return ptr::null_mut();
        };

        let node = unsafe { Block::from_payload(old) };
        Self::check_live(node);
        let current = unsafe { node.as_ref().data.size };

        if size <= current {
            // The tail comes out free and may touch a free neighbour.
            if unsafe { self.directory.split(node, size) }.is_some() {
                self.directory.coalesce();
            }

            return ptr;
        }

        let Ok(new) = self.try_allocate(new_size) else {
            return ptr::null_mut();
        };

        unsafe {
            ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), current);
            self.free(ptr);
        }

        new.as_ptr()
    }

    /// Payload bytes available behind `ptr`, which may be more than what was
    /// requested. Zero for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this allocator.
    pub unsafe fn usable_size(&self, ptr: *const u8) -> usize {
        match NonNull::new(ptr.cast_mut()) {
            Some(ptr) => unsafe { Block::from_payload(ptr).as_ref().data.size },
            None => 0,
        }
    }

    /// Merges adjacent free blocks. [`MemAlloc::free`] already does this, so
    /// calling it by hand always returns 0.
    pub fn coalesce(&mut self) -> usize {
        self.directory.coalesce()
    }

    /// Snapshot of every block in list order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.directory.blocks()
    }

    pub fn stats(&self) -> Stats {
        let mut stats = Stats {
            regions: self.regions.len(),
            blocks: self.directory.len(),
            ..Stats::default()
        };

        for block in self.directory.iter() {
            if block.is_free {
                stats.free_blocks += 1;
                stats.free_bytes += block.size;
            } else {
                stats.used_bytes += block.size;
            }
        }

        stats
    }

    /// Rounds a request up to the machine word so headers written after the
    /// payload are aligned.
    #[inline]
    fn block_size(size: usize) -> Result<usize, AllocError> {
        align(size, WORD_SIZE).ok_or(AllocError::ResourceExhaustion { requested: size })
    }

    /// Maps a region big enough for a `size` byte block and links that block,
    /// still free, at the head of the directory.
    fn grow(&mut self, size: usize) -> Result<NonNull<Node<Block>>, AllocError> {
        let min_bytes = size
            .checked_add(REGION_HEADER_SIZE + BLOCK_HEADER_SIZE)
            .ok_or(AllocError::ResourceExhaustion { requested: size })?;

        let node = self.add_region(min_bytes)?;

        debug!("grew for a {size} byte request, {} regions", self.regions.len());

        Ok(node)
    }

    /// Acquires a region of at least `min_bytes`, records it and writes one
    /// free block covering the rest of it.
    fn add_region(&mut self, min_bytes: usize) -> Result<NonNull<Node<Block>>, AllocError> {
        let raw = self.provider.acquire_region(min_bytes)?;

        unsafe {
            let addr = raw.addr();
            let region = self.regions.append(Region { size: raw.len() }, addr);

            let block_size = align_down(
                region.as_ref().data.block_space() - BLOCK_HEADER_SIZE,
                WORD_SIZE,
            );

            Ok(self.directory.push_front(
                Block::new(block_size, true),
                Region::first_block_addr(region),
            ))
        }
    }

    /// Sanity checks on a header about to be freed or resized. Only the
    /// `debug-canary` feature makes them catch anything.
    #[inline]
    fn check_live(node: NonNull<Node<Block>>) {
        let block = unsafe { &node.as_ref().data };

        debug_assert!(block.is_intact(), "pointer {node:?} has no block header");
        #[cfg(feature = "debug-canary")]
        debug_assert!(!block.is_free, "block {node:?} is already free");
    }
}

impl<P: RegionProvider> Drop for MemAlloc<P> {
    fn drop(&mut self) {
        let mut current = self.regions.first();

        while let Some(node) = current {
            unsafe {
                current = node.as_ref().next;
                self.provider.release_region(Region::raw(node));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kernel::page_size, region::tests::BudgetProvider};
    use std::rc::Rc;

    fn small() -> MemAlloc {
        MemAlloc::with_config(
            Config::default().with_initial_region_size(64 * 1024),
            PageProvider::new(),
        )
    }

    fn info(alloc: &MemAlloc<impl RegionProvider>, ptr: *mut u8) -> BlockInfo {
        alloc
            .blocks()
            .find(|info| info.addr.as_ptr() == ptr)
            .expect("pointer has a block")
    }

    #[test]
    fn initialization_is_lazy() {
        let mut alloc = small();
        assert!(!alloc.is_initialized());
        assert_eq!(alloc.stats(), Stats::default());

        let ptr = alloc.allocate(100);

        assert!(!ptr.is_null());
        assert!(alloc.is_initialized());
        let stats = alloc.stats();
        assert_eq!((stats.regions, stats.blocks, stats.free_blocks), (1, 2, 1));
        assert_eq!(Some(stats.used_bytes), align(100, WORD_SIZE));
    }

    #[test]
    fn initialize_twice_is_a_noop() {
        let mut alloc = small();

        alloc.initialize().unwrap();
        let before = alloc.blocks().collect::<Vec<_>>();
        alloc.initialize().unwrap();

        assert_eq!(alloc.blocks().collect::<Vec<_>>(), before);
        assert_eq!(alloc.stats().regions, 1);
        assert_eq!(
            before[0].size,
            64 * 1024 - REGION_HEADER_SIZE - BLOCK_HEADER_SIZE
        );
    }

    #[test]
    fn allocations_do_not_overlap() {
        let mut alloc = small();
        let sizes = [1, 7, 8, 24, 100, 333, 4096];

        let ptrs: Vec<_> = sizes.iter().map(|size| alloc.allocate(*size)).collect();

        for (i, (ptr, size)) in ptrs.iter().zip(sizes).enumerate() {
            assert_eq!(*ptr as usize % WORD_SIZE, 0);
            unsafe { ptr.write_bytes(i as u8 + 1, size) };
        }

        for (i, (ptr, size)) in ptrs.iter().zip(sizes).enumerate() {
            let bytes = unsafe { std::slice::from_raw_parts(*ptr, size) };
            assert!(bytes.iter().all(|byte| *byte == i as u8 + 1));
        }
    }

    #[test]
    fn freed_block_is_reused_first() {
        let mut alloc = small();

        let a = alloc.allocate(64);
        let _b = alloc.allocate(64);
        unsafe { alloc.free(a) };

        assert_eq!(alloc.allocate(32), a);
    }

    #[test]
    fn free_null_is_a_noop() {
        let mut alloc = small();
        alloc.allocate(8);
        let before = alloc.stats();

        unsafe { alloc.free(ptr::null_mut()) };

        assert_eq!(alloc.stats(), before);
    }

    #[test]
    fn freeing_everything_restores_one_block() {
        let mut alloc = small();
        alloc.initialize().unwrap();
        let whole = alloc.blocks().next().unwrap();

        let ptrs: Vec<_> = (0..8).map(|i| alloc.allocate(16 * (i + 1))).collect();
        for ptr in ptrs.into_iter().rev().step_by(2) {
            unsafe { alloc.free(ptr) };
        }
        let remaining: Vec<_> = alloc
            .blocks()
            .filter(|info| !info.is_free)
            .map(|info| info.addr.as_ptr())
            .collect();
        for ptr in remaining {
            unsafe { alloc.free(ptr) };
        }

        assert_eq!(alloc.blocks().collect::<Vec<_>>(), vec![whole]);
    }

    #[test]
    fn zero_size_allocations_are_distinct() {
        let mut alloc = small();

        let a = alloc.allocate(0);
        let b = alloc.allocate(0);

        assert!(!a.is_null() && !b.is_null());
        assert_ne!(a, b);
        assert_eq!(unsafe { alloc.usable_size(a) }, 0);
    }

    #[test]
    fn miss_maps_a_region_at_the_head() {
        let mut alloc = small();
        alloc.allocate(16);

        let big = 128 * 1024;
        let ptr = alloc.allocate(big);

        assert!(!ptr.is_null());
        assert_eq!(alloc.stats().regions, 2);

        let head = alloc.blocks().next().unwrap();
        assert_eq!(head.addr.as_ptr(), ptr);
        assert!(!head.is_free);
        assert_eq!(head.size, big);

        // Growth asks for exactly what the request needs, rounded to pages.
        let mapped = align(big + REGION_HEADER_SIZE + BLOCK_HEADER_SIZE, page_size()).unwrap();
        let slack = mapped - REGION_HEADER_SIZE - BLOCK_HEADER_SIZE - big;
        if slack > BLOCK_HEADER_SIZE {
            let next = alloc.blocks().nth(1).unwrap();
            assert!(next.is_free);
            assert_eq!(next.size, slack - BLOCK_HEADER_SIZE);
        }

        unsafe { ptr.write_bytes(0xEE, big) };
        unsafe { alloc.free(ptr) };
        assert_eq!(alloc.stats().regions, 2);
    }

    #[test]
    fn exhaustion_returns_null() {
        let initial = page_size();
        let mut alloc = MemAlloc::with_config(
            Config::default().with_initial_region_size(initial),
            BudgetProvider::new(initial),
        );

        let small = alloc.allocate(64);
        assert!(!small.is_null());

        let before = alloc.blocks().collect::<Vec<_>>();
        assert!(alloc.allocate(initial * 4).is_null());
        assert!(matches!(
            alloc.try_allocate(initial * 4),
            Err(AllocError::ResourceExhaustion { .. })
        ));
        assert_eq!(alloc.blocks().collect::<Vec<_>>(), before);
    }

    #[test]
    fn failed_initialization_can_be_retried() {
        let mut alloc = MemAlloc::with_config(Config::default(), BudgetProvider::new(0));

        assert!(alloc.allocate(8).is_null());
        assert!(!alloc.is_initialized());

        alloc.provider.remaining = usize::MAX;
        assert!(!alloc.allocate(8).is_null());
        assert!(alloc.is_initialized());
    }

    #[test]
    fn impossible_request_fails_cleanly() {
        let mut alloc = small();

        assert!(alloc.allocate(usize::MAX).is_null());
        assert!(alloc.allocate(usize::MAX - BLOCK_HEADER_SIZE).is_null());
        assert_eq!(alloc.stats().regions, 1);
    }

    #[test]
    fn zero_allocate_clears_reused_memory() {
        let mut alloc = small();

        let dirty = alloc.allocate(64);
        unsafe {
            dirty.write_bytes(0xFF, 64);
            alloc.free(dirty);
        }

        let clean = alloc.zero_allocate(8, 8);
        assert_eq!(clean, dirty);

        let bytes = unsafe { std::slice::from_raw_parts(clean, 64) };
        assert!(bytes.iter().all(|byte| *byte == 0));
    }

    #[test]
    fn zero_allocate_overflow_is_null() {
        let mut alloc = small();

        assert!(alloc.zero_allocate(usize::MAX, 2).is_null());
        assert!(!alloc.is_initialized());
    }

    #[test]
    fn resize_null_allocates() {
        let mut alloc = small();

        let ptr = unsafe { alloc.resize(ptr::null_mut(), 40) };

        assert!(!ptr.is_null());
        assert_eq!(unsafe { alloc.usable_size(ptr) }, 40);
    }

    #[test]
    fn resize_to_zero_frees() {
        let mut alloc = small();
        let ptr = alloc.allocate(40);

        assert!(unsafe { alloc.resize(ptr, 0) }.is_null());
        assert_eq!(alloc.stats().free_blocks, 1);
        assert_eq!(alloc.stats().used_bytes, 0);
    }

    #[test]
    fn resize_shrink_releases_tail() {
        let mut alloc = small();
        let ptr = alloc.allocate(256);
        let _guard = alloc.allocate(8);

        let same = unsafe { alloc.resize(ptr, 64) };
        assert_eq!(same, ptr);
        assert_eq!(unsafe { alloc.usable_size(ptr) }, 64);

        let tail = unsafe { ptr.add(64 + BLOCK_HEADER_SIZE) };
        let freed = info(&alloc, tail);
        assert!(freed.is_free);
        assert_eq!(freed.size, 256 - 64 - BLOCK_HEADER_SIZE);

        assert_eq!(alloc.allocate(freed.size), tail);
        assert_eq!(alloc.stats().regions, 1);
    }

    #[test]
    fn resize_shrink_merges_tail_with_free_neighbour() {
        let mut alloc = small();
        let ptr = alloc.allocate(256);

        unsafe { alloc.resize(ptr, 64) };

        // Allocated block plus a single free block covering the rest.
        let stats = alloc.stats();
        assert_eq!((stats.blocks, stats.free_blocks), (2, 1));
    }

    #[test]
    fn resize_shrink_keeps_small_tail() {
        let mut alloc = small();
        let ptr = alloc.allocate(64);
        let _guard = alloc.allocate(8);

        let same = unsafe { alloc.resize(ptr, 64 - BLOCK_HEADER_SIZE) };

        assert_eq!(same, ptr);
        assert_eq!(unsafe { alloc.usable_size(ptr) }, 64);
    }

    #[test]
    fn resize_grow_moves_data() {
        let mut alloc = small();
        let ptr = alloc.allocate(16);
        let _guard = alloc.allocate(8);

        unsafe {
            for i in 0..16 {
                ptr.add(i).write(i as u8);
            }

            let grown = alloc.resize(ptr, 64);
            assert_ne!(grown, ptr);
            assert!(alloc.usable_size(grown) >= 64);

            let bytes = std::slice::from_raw_parts(grown, 16);
            assert_eq!(bytes, (0..16).collect::<Vec<u8>>().as_slice());
            assert!(info(&alloc, ptr).is_free);
        }
    }

    #[test]
    fn resize_grow_failure_keeps_old_block() {
        let initial = page_size();
        let mut alloc = MemAlloc::with_config(
            Config::default().with_initial_region_size(initial),
            BudgetProvider::new(initial),
        );

        let ptr = alloc.allocate(32);
        unsafe {
            ptr.write_bytes(0x5A, 32);

            assert!(alloc.resize(ptr, initial * 8).is_null());

            assert!(!info(&alloc, ptr).is_free);
            assert_eq!(alloc.usable_size(ptr), 32);
            let bytes = std::slice::from_raw_parts(ptr, 32);
            assert!(bytes.iter().all(|byte| *byte == 0x5A));
        }
    }

    #[test]
    fn manual_coalesce_finds_nothing_after_free() {
        let mut alloc = small();
        let ptrs: Vec<_> = (0..6).map(|_| alloc.allocate(48)).collect();

        for ptr in &ptrs[1..4] {
            unsafe { alloc.free(*ptr) };
        }

        let once = alloc.blocks().collect::<Vec<_>>();
        assert_eq!(alloc.coalesce(), 0);
        assert_eq!(alloc.blocks().collect::<Vec<_>>(), once);
    }

    #[test]
    fn drop_returns_every_region() {
        let mut alloc = MemAlloc::with_config(
            Config::default().with_initial_region_size(page_size()),
            BudgetProvider::new(usize::MAX),
        );

        alloc.allocate(page_size() * 2);
        alloc.allocate(page_size() * 3);

        assert_eq!(alloc.provider.acquired, 3);
        assert_eq!(alloc.stats().regions, 3);

        let released = Rc::clone(&alloc.provider.released);
        assert_eq!(released.get(), 0);

        drop(alloc);
        assert_eq!(released.get(), 3);
    }

    #[test]
    fn drop_before_first_use_releases_nothing() {
        let alloc = MemAlloc::with_provider(BudgetProvider::new(usize::MAX));
        let released = Rc::clone(&alloc.provider.released);

        drop(alloc);
        assert_eq!(released.get(), 0);
    }

    #[cfg(all(feature = "debug-canary", debug_assertions))]
    #[test]
    #[should_panic(expected = "already free")]
    fn canary_catches_double_free() {
        let mut alloc = small();
        let ptr = alloc.allocate(32);

        unsafe {
            alloc.free(ptr);
            alloc.free(ptr);
        }
    }
}
