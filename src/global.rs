use std::{
    alloc::{GlobalAlloc, Layout},
    ptr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    memalloc::MemAlloc,
    region::{PageProvider, RegionProvider},
    utils::WORD_SIZE,
};

/// [`MemAlloc`] behind one mutex, so it can be shared between threads and
/// installed with `#[global_allocator]`.
///
/// Every call takes the lock for its whole duration. Layouts that need more
/// than word alignment are refused with a null pointer.
///
/// When this is the global allocator, a logger installed through the `log`
/// facade must not allocate while handling the allocator's own records, or the
/// lock is taken twice.
pub struct Locked<P: RegionProvider = PageProvider> {
    inner: Mutex<MemAlloc<P>>,
}

impl Locked<PageProvider> {
    pub const fn new() -> Self {
        Self::with_allocator(MemAlloc::new())
    }
}

impl Default for Locked<PageProvider> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: RegionProvider> Locked<P> {
    pub const fn with_allocator(allocator: MemAlloc<P>) -> Self {
        Self {
            inner: Mutex::new(allocator),
        }
    }

    /// Grants exclusive access to the wrapped allocator. A poisoned lock is
    /// still handed out: the block directory is never left half updated by a
    /// panic in caller code.
    pub fn lock(&self) -> MutexGuard<'_, MemAlloc<P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn fits(layout: Layout) -> bool {
        layout.align() <= WORD_SIZE
    }
}

unsafe impl<P: RegionProvider + Send> GlobalAlloc for Locked<P> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !Self::fits(layout) {
            return ptr::null_mut();
        }

        self.lock().allocate(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.lock().free(ptr) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if !Self::fits(layout) {
            return ptr::null_mut();
        }

        self.lock().zero_allocate(1, layout.size())
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if !Self::fits(layout) {
            return ptr::null_mut();
        }

        unsafe { self.lock().resize(ptr, new_size) }
    }
}
