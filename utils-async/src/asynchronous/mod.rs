// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC

//! Rust `async` related synchronization primitives.

mod lock;
pub use lock::{AsyncLock, AsyncLockError, AsyncLockFuture, AsyncLockGuard};
mod ticket;
