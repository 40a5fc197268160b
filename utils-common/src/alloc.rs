// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC

//! Fallible memory allocation helpers.
//!
//! The plain [`Box::new()`] aborts on allocation failure, which is not an
//! option for code meant to run in constrained execution environments. The
//! helpers here report such failures back to the caller instead.

extern crate alloc;
use alloc::boxed::Box;

use core::{alloc::Layout, ptr};

/// Error returned by [`box_try_new()`].
#[derive(Clone, Copy, Debug)]
pub enum TryNewError {
    /// The memory allocation has failed.
    MemoryAllocationFailure,
}

/// Fallible variant of [`Box::new()`].
///
/// Allocates memory for a `T` and moves `value` into it. Returns
/// [`TryNewError::MemoryAllocationFailure`] if the allocator fails.
pub fn box_try_new<T>(value: T) -> Result<Box<T>, TryNewError> {
    let layout = Layout::new::<T>();
    if layout.size() == 0 {
        // Zero-sized types never hit the allocator.
        return Ok(Box::new(value));
    }

    // Safety: the layout has a non-zero size.
    let p = unsafe { alloc::alloc::alloc(layout) } as *mut T;
    if p.is_null() {
        return Err(TryNewError::MemoryAllocationFailure);
    }

    // Safety: p is non-null, properly aligned and sized for a T, and it's been
    // obtained from the global allocator with T's layout, as required by
    // Box::from_raw().
    unsafe {
        ptr::write(p, value);
        Ok(Box::from_raw(p))
    }
}

#[test]
fn test_box_try_new() {
    let b = box_try_new(42u64).unwrap();
    assert_eq!(*b, 42);

    assert!(box_try_new(()).is_ok());

    #[repr(align(64))]
    struct Aligned([u8; 3]);
    let b = box_try_new(Aligned([1, 2, 3])).unwrap();
    assert_eq!((&*b as *const Aligned as usize) % 64, 0);
    assert_eq!(b.0, [1, 2, 3]);
}
