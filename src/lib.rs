//! # firstfit
//!
//! A single threaded, first-fit free-list allocator built directly on top of
//! memory regions mapped from the kernel.
//!
//! ```text
//! +--------+-------------+---------+-------------+--------------------+
//! | Region | Block (use) | payload | Block (free)|      payload       |
//! +--------+-------------+---------+-------------+--------------------+
//!                        ^
//!                        +-- pointer returned to the user
//! ```
//!
//! - [`MemAlloc::allocate`] takes the first free block big enough for the
//!   request, splits off the rest when it can hold another block, and maps a
//!   new region when nothing fits.
//! - [`MemAlloc::free`] marks the block free and merges every run of adjacent
//!   free blocks right away.
//! - [`MemAlloc::zero_allocate`] and [`MemAlloc::resize`] are built on those two.
//!
//! Regions are only given back to the kernel when the allocator is dropped.
//!
//! ```rust
//! use firstfit::MemAlloc;
//!
//! let mut allocator = MemAlloc::new();
//!
//! let ptr = allocator.allocate(5 * size_of::<u32>()).cast::<u32>();
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     for i in 0..5 {
//!         ptr.add(i).write(i as u32 + 1);
//!     }
//!
//!     let ptr = allocator.resize(ptr.cast(), 10 * size_of::<u32>()).cast::<u32>();
//!     assert_eq!(std::slice::from_raw_parts(ptr, 5), &[1, 2, 3, 4, 5]);
//!
//!     allocator.free(ptr.cast());
//! }
//! ```

mod block;
mod config;
mod directory;
mod error;
mod global;
mod kernel;
mod list;
mod memalloc;
mod region;
mod utils;

pub use config::{Config, INITIAL_REGION_SIZE};
pub use directory::BlockInfo;
pub use error::AllocError;
pub use global::Locked;
pub use memalloc::{MemAlloc, Stats};
pub use region::{PageProvider, RawRegion, RegionProvider};

/// Bytes taken by every block header in front of its payload.
pub const BLOCK_OVERHEAD: usize = block::BLOCK_HEADER_SIZE;

/// Bytes taken by the header at the start of every region.
pub const REGION_OVERHEAD: usize = region::REGION_HEADER_SIZE;
