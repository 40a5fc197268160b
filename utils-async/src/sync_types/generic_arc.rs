// SPDX-License-Identifier: Apache-2.0
// Copyright The Rust Project Developers (see https://thanks.rust-lang.org)
// Copyright 2025 SUSE LLC
//
// Implementation is based heavily on Rust's core Arc. Copyrights and licenses
// apply accordingly.
//
// Simplifications made relative to the original Arc implementation from the
// Rust project:
// - only support Sized T (otherwise implementation is not possible with stable
//   Rust)
// - no weak references at all, hence a single reference count and the
//   allocation is freed together with the data,
// - fallible allocation only, via try_new().

//! Implementaion of [`GenericArc`].
//!
//! Based heavily on a trimmed version of Rust's core [`Arc`](alloc::sync::Arc).

extern crate alloc;
use alloc::boxed::Box;

use super::{SyncRcPtr, SyncRcPtrFactory, SyncRcPtrTryNewError};
use crate::utils_common::alloc::{TryNewError, box_try_new};
use core::{
    marker::{self, PhantomData},
    mem::ManuallyDrop,
    ops::Deref,
    ptr::{self, NonNull},
    sync::atomic,
};

const MAX_REFCOUNT: usize = (isize::MAX) as usize;

/// The error in case the counter reaches above `MAX_REFCOUNT`, and we can
/// `panic` safely.
const INTERNAL_OVERFLOW_ERROR: &str = "Arc counter overflow";

/// Trimmed reimplementation of Rust's core [`Arc`](alloc::sync::Arc), without
/// weak references.
struct Arc<T> {
    ptr: NonNull<ArcInner<T>>,
    phantom: PhantomData<ArcInner<T>>,
}

unsafe impl<T: Sync + Send> Send for Arc<T> {}
unsafe impl<T: Sync + Send> Sync for Arc<T> {}

// This is repr(C) so that the offset of data is stable and into_raw()/from_raw()
// can translate between the two pointers.
#[repr(C)]
struct ArcInner<T> {
    strong: atomic::AtomicUsize,
    data: T,
}

impl<T> Arc<T> {
    unsafe fn from_inner(ptr: NonNull<ArcInner<T>>) -> Self {
        Self {
            ptr,
            phantom: PhantomData,
        }
    }

    #[inline]
    fn try_new(data: T) -> Result<Arc<T>, TryNewError> {
        let x: Box<_> = box_try_new(ArcInner {
            strong: atomic::AtomicUsize::new(1),
            data,
        })?;
        unsafe { Ok(Self::from_inner(Box::leak(x).into())) }
    }

    /// Constructs an `Arc<T>` from a raw pointer obtained from
    /// [`into_raw()`](Self::into_raw).
    #[inline]
    unsafe fn from_raw(ptr: *const T) -> Self {
        unsafe {
            let offset = data_offset::<T>();

            // Reverse the offset to find the original ArcInner.
            let arc_ptr = ptr.byte_sub(offset) as *mut ArcInner<T>;

            Self::from_inner(NonNull::new_unchecked(arc_ptr))
        }
    }

    /// Consumes the `Arc`, returning the wrapped pointer.
    #[inline]
    fn into_raw(this: Self) -> *const T {
        let this = ManuallyDrop::new(this);
        let ptr: *mut ArcInner<T> = NonNull::as_ptr(this.ptr);
        unsafe { ptr::addr_of!((*ptr).data) }
    }

    #[inline]
    fn inner(&self) -> &ArcInner<T> {
        // This unsafety is ok because while this arc is alive we're guaranteed
        // that the inner pointer is valid.
        unsafe { self.ptr.as_ref() }
    }

    fn strong_count(this: &Self) -> usize {
        this.inner().strong.load(atomic::Ordering::Relaxed)
    }
}

impl<T> Clone for Arc<T> {
    /// Makes a clone of the `Arc` pointer.
    #[inline]
    fn clone(&self) -> Arc<T> {
        // Using a relaxed ordering is alright here, as knowledge of the
        // original reference prevents other threads from erroneously deleting
        // the object.
        let old_size = self.inner().strong.fetch_add(1, atomic::Ordering::Relaxed);

        // Guard against massive refcounts in case someone is mem::forget()ing
        // Arcs. The check happens after the increment, which is good enough as
        // reaching usize::MAX from isize::MAX in between is not realistic.
        assert!(old_size <= MAX_REFCOUNT, "{}", INTERNAL_OVERFLOW_ERROR);

        unsafe { Self::from_inner(self.ptr) }
    }
}

impl<T> Deref for Arc<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner().data
    }
}

impl<T> Drop for Arc<T> {
    #[inline]
    fn drop(&mut self) {
        // Because `fetch_sub` is already atomic, we do not need to synchronize
        // with other threads unless we are going to delete the object.
        if self.inner().strong.fetch_sub(1, atomic::Ordering::Release) != 1 {
            return;
        }

        // Any access to the data through another reference must happen before
        // the deletion below. The Release decrements above synchronize with
        // this Acquire fence.
        atomic::fence(atomic::Ordering::Acquire);

        // The last reference is gone, the ArcInner had been leaked from a Box in
        // try_new().
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }
}

impl<T> Unpin for Arc<T> {}

/// Gets the offset within an `ArcInner` for the payload.
const fn data_offset<T>() -> usize {
    core::mem::offset_of!(ArcInner<T>, data)
}

/// Generic [`SyncRcPtr`] implementation based on Rust's core
/// [`Arc`](alloc::sync::Arc).
///
/// # See also:
/// * [`GenericArcFactory`]
pub struct GenericArc<T> {
    ptr: Arc<T>,
}

impl<T> GenericArc<T> {
    /// Get the number of strong references to the shared value.
    ///
    /// Racy if other threads hold references, meant for testing.
    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.ptr)
    }
}

impl<T> Deref for GenericArc<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.ptr
    }
}

impl<T> Clone for GenericArc<T> {
    fn clone(&self) -> Self {
        Self { ptr: self.ptr.clone() }
    }
}

impl<T: marker::Send + marker::Sync> SyncRcPtr<T> for GenericArc<T> {
    fn into_raw(this: Self) -> *const T {
        Arc::into_raw(this.ptr)
    }

    unsafe fn from_raw(ptr: *const T) -> Self {
        Self {
            ptr: unsafe { Arc::from_raw(ptr) },
        }
    }
}

/// [`SyncRcPtrFactory`] implementation for [`GenericArc`].
pub struct GenericArcFactory;

impl SyncRcPtrFactory for GenericArcFactory {
    type SyncRcPtr<T>
        = GenericArc<T>
    where
        T: Sized + marker::Send + marker::Sync;

    fn try_new<T>(value: T) -> Result<Self::SyncRcPtr<T>, SyncRcPtrTryNewError>
    where
        T: marker::Send + marker::Sync,
    {
        Ok(GenericArc {
            ptr: Arc::try_new(value).map_err(|e| match e {
                TryNewError::MemoryAllocationFailure => SyncRcPtrTryNewError::AllocationFailure,
            })?,
        })
    }
}

#[test]
fn test_generic_arc_raw_roundtrip() {
    let a = GenericArcFactory::try_new(42u32).unwrap();
    let b = a.clone();
    assert_eq!(GenericArc::strong_count(&a), 2);

    let raw = SyncRcPtr::into_raw(b);
    assert!(ptr::eq(raw, &*a));
    assert_eq!(GenericArc::strong_count(&a), 2);

    let b = unsafe { <GenericArc<u32> as SyncRcPtr<u32>>::from_raw(raw) };
    assert_eq!(*b, 42);
    assert!(SyncRcPtr::ptr_eq(&a, &b));
    drop(b);
    assert_eq!(GenericArc::strong_count(&a), 1);
}

#[test]
fn test_generic_arc_drops_value() {
    struct SetOnDrop<'a>(&'a atomic::AtomicBool);

    impl<'a> Drop for SetOnDrop<'a> {
        fn drop(&mut self) {
            self.0.store(true, atomic::Ordering::Relaxed);
        }
    }

    static DROPPED: atomic::AtomicBool = atomic::AtomicBool::new(false);
    let a = GenericArcFactory::try_new(SetOnDrop(&DROPPED)).unwrap();
    let b = a.clone();
    drop(a);
    assert!(!DROPPED.load(atomic::Ordering::Relaxed));
    drop(b);
    assert!(DROPPED.load(atomic::Ordering::Relaxed));
}
