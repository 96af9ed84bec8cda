//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

use std::mem;

/// Machine word size. Every block size handed out is a multiple of this.
pub(crate) const WORD_SIZE: usize = mem::size_of::<usize>();

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This method is used to align region sizes to be a multiple of [`crate::kernel::page_size`]
/// and block sizes to be a multiple of the computer's word size, so every header we write
/// after a payload lands on an aligned address.
///
/// Returns `None` if rounding up overflows `usize`.
pub fn align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    debug_assert!(aligment.is_power_of_two());

    to_be_aligned
        .checked_add(aligment - 1)
        .map(|value| value & !(aligment - 1))
}

/// Rounds `value` down to a multiple of `aligment`, which must be a power of two.
#[inline]
pub fn align_down(value: usize, aligment: usize) -> usize {
    debug_assert!(aligment.is_power_of_two());

    value & !(aligment - 1)
}
