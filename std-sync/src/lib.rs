// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC

//! Implementation of [`sync_types::SyncTypes`] for the locking types provided
//! by Rust `std`, and the [`AsyncLock`](utils_async::asynchronous::AsyncLock)
//! instantiated for it.

use fifolock_utils_async as utils_async;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::{convert, marker};
use utils_async::{asynchronous, sync_types};

pub use asynchronous::AsyncLockError;

/// [`Lock`](sync_types::Lock) trait implementation built on Rust `std`
/// [`Mutex`](std::sync::Mutex).
///
/// Poisoning is ignored: a [`StdLock`] is never held across user code.
pub struct StdLock<T: marker::Send> {
    mtx: Mutex<T>,
}

impl<T: marker::Send> sync_types::Lock<T> for StdLock<T> {
    type Guard<'a>
        = MutexGuard<'a, T>
    where
        T: 'a;

    fn lock(&self) -> Self::Guard<'_> {
        self.mtx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: marker::Send> sync_types::ConstructibleLock<T> for StdLock<T> {
    fn get_mut(&mut self) -> &mut T {
        self.mtx.get_mut().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: marker::Send> convert::From<T> for StdLock<T> {
    fn from(value: T) -> Self {
        Self { mtx: Mutex::new(value) }
    }
}

/// [`SyncTypes`](sync_types::SyncTypes) trait implementation based on Rust
/// [`std::sync`].
pub struct StdSyncTypes {}

impl sync_types::SyncTypes for StdSyncTypes {
    type Lock<T: marker::Send> = StdLock<T>;
    type SyncRcPtrFactory = sync_types::GenericArcFactory;
}

/// [`AsyncLock`](asynchronous::AsyncLock) for use with Rust `std` threads.
pub type StdAsyncLock = asynchronous::AsyncLock<StdSyncTypes>;

/// [`AsyncLockFuture`](asynchronous::AsyncLockFuture) of a [`StdAsyncLock`].
pub type StdAsyncLockFuture<'a> = asynchronous::AsyncLockFuture<'a, StdSyncTypes>;

/// [`AsyncLockGuard`](asynchronous::AsyncLockGuard) of a [`StdAsyncLock`].
pub type StdAsyncLockGuard<'a> = asynchronous::AsyncLockGuard<'a, StdSyncTypes>;

#[test]
fn test_std_lock_poison_ignored() {
    use sync_types::Lock as _;

    let lock = StdLock::from(0u32);
    let r = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let mut guard = lock.lock();
        *guard = 1;
        panic!("poisoning StdLock");
    }));
    assert!(r.is_err());
    assert_eq!(*lock.lock(), 1);
}
