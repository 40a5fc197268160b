// SPDX-License-Identifier: Apache-2.0
// Copyright 2023-2025 SUSE LLC

//! Lock and `Arc` abstraction traits.
//!
//! # Execution environment agnostic sync type abstractions
//!
//! In `[no_std]` environments, `std::sync::Mutex` is unavailable and the
//! exact semantics of a provided lock implementation depend heavily on the
//! target execution environment -- it could be anything ranging from a simple
//! spinlock up to a full blown mutex with scheduling semantics. In order to
//! facilitate integrations into any possible environment, define abstraction
//! traits for locks and `Arc`s that the rest of the code can be made generic
//! over: [`ConstructibleLock`] and [`SyncRcPtr`]/[`SyncRcPtrFactory`]. For
//! limiting the amount of generic parameters to get specified all over the
//! place, group them together as associated types of the [`SyncTypes`] trait
//! expected to get implemented for a target execution environment. Execution
//! environments might want to consider using the provided
//! [`GenericArcFactory`] for their [`SyncRcPtrFactory`].

extern crate alloc;
use core::{convert, marker, ops};

/// Execution environment agnostic lock abstraction.
///
/// Users of the `Lock` must assume that the implementation is of the spinlock
/// type and **must not** block while holding the lock or execute otherwise
/// long-running work. This includes polling [`Future`](core::future::Future)s
/// or waking [`Waker`](core::task::Waker)s in particular, but also memory
/// allocations.
pub trait Lock<T: ?Sized>: marker::Send + marker::Sync {
    /// Lock guard type returned by [`lock()`](Self::lock).
    type Guard<'a>: ops::Deref<Target = T> + ops::DerefMut
    where
        Self: 'a;

    /// Lock the lock.
    ///
    /// Users of the `Lock` **must not** block or execute otherwise long-running
    /// work while holding the lock.
    fn lock(&self) -> Self::Guard<'_>;
}

/// Constructible [`Lock`].
///
/// The [`ConstructibleLock`] trait is implemented by [`Lock`] types which are
/// constructible by wrapping a value.
pub trait ConstructibleLock<T>: Lock<T> + convert::From<T> {
    /// Access the wrapped value.
    ///
    /// Access the wrapped value through a mutable reference on `Self` without
    /// going through a locking operation. Note that the existence of the
    /// `mut` reference on `Self` implies that it cannot have been locked
    /// concurrently and that access is exclusive.
    fn get_mut(&mut self) -> &mut T;
}

/// Execution environment agnostic [`sync::Arc`](alloc::sync::Arc) abstraction.
///
/// Just as `sync::Arc`, a SyncRcPtr is a [`Sync`]-safe reference counting
/// pointer to a shared, wrapped value. The wrapped value will only get dropped
/// once the last cloning spawn of the original [`SyncRcPtr`] goes out of life.
///
/// Besides the usual [`Clone`] and [`Deref`](ops::Deref), a `SyncRcPtr` can
/// get converted [into](Self::into_raw) and back [from](Self::from_raw) a raw
/// pointer, which is what enables storing one in an
/// [`AtomicPtr`](core::sync::atomic::AtomicPtr).
pub trait SyncRcPtr<T: ?Sized>: Clone + ops::Deref<Target = T> + marker::Send + marker::Sync + marker::Unpin {
    /// Convert a `SyncRcPtr` into a raw pointer.
    ///
    /// Convert into a raw pointer without releasing the owned reference count
    /// lease. The raw pointer may eventually get converted back into a
    /// `SyncRcPtr` by means of [`from_raw()`](Self::from_raw). If that does
    /// not happen, the owned lease will be leaked.
    ///
    /// The returned pointer equals the address of the wrapped value as
    /// obtained through [`Deref`](ops::Deref).
    fn into_raw(this: Self) -> *const T;

    /// Convert a raw pointer previously obtained from
    /// [`into_raw()`](Self::into_raw) back into a `SyncRcPtr`.
    ///
    /// # Safety
    ///
    /// The raw `ptr` *must* have previously been obtained from
    /// [`SyncRcPtr::into_raw()`](Self::into_raw) of the same `SyncRcPtr`
    /// implementation and every such raw pointer may get converted back at
    /// most once.
    unsafe fn from_raw(ptr: *const T) -> Self;

    /// Test whether two `SyncRcPtr`s point to the same allocation.
    fn ptr_eq(this: &Self, other: &Self) -> bool {
        core::ptr::eq(ops::Deref::deref(this), ops::Deref::deref(other))
    }
}

/// Error type returned by
/// [`SyncRcPtrFactory::try_new()`](SyncRcPtrFactory::try_new).
#[derive(Clone, Copy, Debug)]
pub enum SyncRcPtrTryNewError {
    /// Memory alocation failure.
    AllocationFailure,
}

/// Factory for the creation of [`SyncRcPtr`] instances.
pub trait SyncRcPtrFactory {
    type SyncRcPtr<T>: SyncRcPtr<T>
    where
        T: marker::Send + marker::Sync;

    /// Try to allocate a new [`SyncRcPtr`] instance.
    ///
    /// # Arguments:
    ///
    /// * `value` - The initialization value.
    fn try_new<T>(value: T) -> Result<Self::SyncRcPtr<T>, SyncRcPtrTryNewError>
    where
        T: marker::Send + marker::Sync;
}

/// Convenience grouping of an execution environment's synchronization related
/// trait implementations.
///
/// For limiting the amount of generic parameters to get specified all over the
/// place, group them together as associated types of the [`SyncTypes`] trait
/// expected to get implemented for a target execution environment.
pub trait SyncTypes: marker::Unpin + 'static {
    /// The execution environment's implementation of the [`ConstructibleLock`]
    /// trait.
    type Lock<T: marker::Send>: ConstructibleLock<T>;
    /// The execution environment's implementation of the [`SyncRcPtrFactory`]
    /// trait. Execution environments might want to consider using the
    /// provided [`GenericArcFactory`] for their [`SyncRcPtrFactory`].
    type SyncRcPtrFactory: SyncRcPtrFactory;
}

mod generic_arc;
pub use generic_arc::{GenericArc, GenericArcFactory};
