// SPDX-License-Identifier: Apache-2.0
// Copyright 2023-2025 SUSE LLC

//! Testing [`TestNopSyncTypes`] and a [`Future`](future::Future) [test
//! exector](TestAsyncExecutor) implementations.

extern crate alloc;
use alloc::{boxed::Box, collections::VecDeque, sync};

use crate::sync_types::{self, Lock as _};
use core::{cell, convert, future, marker, ops, pin, sync::atomic, task};

/// Dummy [`Lock`](sync_types::Lock) for testing purposes.
///
/// Any attempt to lock an already locked `TestNopLock` will panic.
pub struct TestNopLock<T: marker::Send> {
    locked: atomic::AtomicBool,
    v: cell::UnsafeCell<T>,
}

impl<T: marker::Send> convert::From<T> for TestNopLock<T> {
    fn from(value: T) -> Self {
        Self {
            locked: atomic::AtomicBool::new(false),
            v: cell::UnsafeCell::new(value),
        }
    }
}

unsafe impl<T: marker::Send> marker::Send for TestNopLock<T> {}
unsafe impl<T: marker::Send> marker::Sync for TestNopLock<T> {}

impl<T: marker::Send> sync_types::Lock<T> for TestNopLock<T> {
    type Guard<'a>
        = TestNopLockGuard<'a, T>
    where
        Self: 'a;

    fn lock(&self) -> Self::Guard<'_> {
        let was_locked = self.locked.swap(true, atomic::Ordering::Acquire);
        assert!(!was_locked, "TestNopLock contended.");
        TestNopLockGuard { lock: self }
    }
}

impl<T: marker::Send> sync_types::ConstructibleLock<T> for TestNopLock<T> {
    fn get_mut(&mut self) -> &mut T {
        self.v.get_mut()
    }
}

/// The [locking guard](sync_types::Lock::Guard) associated with
/// [`TestNopLock`].
pub struct TestNopLockGuard<'a, T: marker::Send> {
    lock: &'a TestNopLock<T>,
}

impl<'a, T: marker::Send> Drop for TestNopLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, atomic::Ordering::Release);
    }
}

impl<'a, T: marker::Send> ops::Deref for TestNopLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: the guard's existence implies exclusive access.
        unsafe { &*self.lock.v.get() }
    }
}

impl<'a, T: marker::Send> ops::DerefMut for TestNopLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: the guard's existence implies exclusive access.
        unsafe { &mut *self.lock.v.get() }
    }
}

/// [`SyncTypes`](sync_types::SyncTypes) implementation for single-threaded
/// testing.
pub struct TestNopSyncTypes;

impl sync_types::SyncTypes for TestNopSyncTypes {
    type Lock<T: marker::Send> = TestNopLock<T>;
    type SyncRcPtrFactory = sync_types::GenericArcFactory;
}

/// [`Future`](future::Future) returning [`Pending`](task::Poll::Pending)
/// exactly once, after requesting to get polled again.
pub struct TestYield {
    yielded: bool,
}

impl TestYield {
    pub fn new() -> Self {
        Self { yielded: false }
    }
}

impl Default for TestYield {
    fn default() -> Self {
        Self::new()
    }
}

impl future::Future for TestYield {
    type Output = ();

    fn poll(self: pin::Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Self::Output> {
        let this = pin::Pin::into_inner(self);
        if this.yielded {
            task::Poll::Ready(())
        } else {
            this.yielded = true;
            cx.waker().wake_by_ref();
            task::Poll::Pending
        }
    }
}

/// Handle for retrieving the output of a task [spawned](TestAsyncExecutor::spawn)
/// at a [`TestAsyncExecutor`].
pub struct TestAsyncExecutorTaskOutput<T: marker::Send> {
    result: sync_types::GenericArc<TestNopLock<Option<T>>>,
}

impl<T: marker::Send> TestAsyncExecutorTaskOutput<T> {
    /// Take the task's output.
    ///
    /// Returns `None` if the task has not completed (yet).
    pub fn take(self) -> Option<T> {
        self.result.lock().take()
    }
}

struct TestTaskWaker {
    runnable: atomic::AtomicBool,
}

impl alloc::task::Wake for TestTaskWaker {
    fn wake(self: sync::Arc<Self>) {
        alloc::task::Wake::wake_by_ref(&self);
    }

    fn wake_by_ref(self: &sync::Arc<Self>) {
        self.runnable.store(true, atomic::Ordering::Release);
    }
}

struct TestTask {
    waker: sync::Arc<TestTaskWaker>,
    f: pin::Pin<Box<dyn future::Future<Output = ()> + marker::Send>>,
}

/// Single-threaded [`Future`](future::Future) task executor for testing
/// purposes.
///
/// Enqueue top-level [`Future`](future::Future)s via [`spawn()`](Self::spawn)
/// and poll all currently enqueued ones to completion via
/// [`run_to_completion()`](Self::run_to_completion).
pub struct TestAsyncExecutor {
    tasks: TestNopLock<VecDeque<TestTask>>,
}

impl TestAsyncExecutor {
    /// Create a new [`TestAsyncExecutor`] instance.
    pub fn new() -> sync_types::GenericArc<Self> {
        <sync_types::GenericArcFactory as sync_types::SyncRcPtrFactory>::try_new(Self {
            tasks: TestNopLock::from(VecDeque::new()),
        })
        .unwrap()
    }

    /// Enqueue a top-level [`Future`](future::Future) for polling from a
    /// subsequent [`run_to_completion()`](Self::run_to_completion) invocation.
    pub fn spawn<F: future::Future + marker::Send + 'static>(
        this: &sync_types::GenericArc<Self>,
        f: F,
    ) -> TestAsyncExecutorTaskOutput<F::Output>
    where
        F::Output: marker::Send + 'static,
    {
        let result =
            <sync_types::GenericArcFactory as sync_types::SyncRcPtrFactory>::try_new(TestNopLock::from(None)).unwrap();
        let task_result = result.clone();
        let f = Box::pin(async move {
            let output = f.await;
            *task_result.lock() = Some(output);
        });
        this.tasks.lock().push_back(TestTask {
            waker: sync::Arc::new(TestTaskWaker {
                runnable: atomic::AtomicBool::new(true),
            }),
            f,
        });

        TestAsyncExecutorTaskOutput { result }
    }

    /// Poll all currently [enqueued](Self::spawn) [`Future`](future::Future)s
    /// to completion.
    ///
    /// A task is runnable right after it has been [enqueued](Self::spawn) and
    /// ceases to be once it returns [`Pending`](task::Poll::Pending), until
    /// [woken](task::Waker::wake). The runnable tasks get polled in a
    /// round-robin fashion, in the order of their enqueueing. There must always
    /// be at least one runnable task left, or the executor will become stuck
    /// and report the fact via a panic.
    pub fn run_to_completion(this: &sync_types::GenericArc<Self>) {
        let mut skipped_in_a_row = 0usize;
        loop {
            let mut tasks = this.tasks.lock();
            let remaining = tasks.len();
            let mut task = match tasks.pop_front() {
                Some(task) => task,
                None => break,
            };
            // Polling might spawn more tasks.
            drop(tasks);

            if !task.waker.runnable.swap(false, atomic::Ordering::Acquire) {
                skipped_in_a_row += 1;
                assert!(
                    skipped_in_a_row <= remaining,
                    "TestAsyncExecutor stuck with no runnable task."
                );
                this.tasks.lock().push_back(task);
                continue;
            }
            skipped_in_a_row = 0;

            let waker = task::Waker::from(task.waker.clone());
            let mut cx = task::Context::from_waker(&waker);
            if task.f.as_mut().poll(&mut cx).is_pending() {
                this.tasks.lock().push_back(task);
            }
        }
    }
}

#[test]
fn test_executor_round_robin() {
    let executor = TestAsyncExecutor::new();
    let log = <sync_types::GenericArcFactory as sync_types::SyncRcPtrFactory>::try_new(TestNopLock::from(
        alloc::vec::Vec::new(),
    ))
    .unwrap();

    let mut outputs = alloc::vec::Vec::new();
    for i in 0..3u32 {
        let log = log.clone();
        outputs.push(TestAsyncExecutor::spawn(&executor, async move {
            log.lock().push((i, 0));
            TestYield::new().await;
            log.lock().push((i, 1));
            i
        }));
    }
    TestAsyncExecutor::run_to_completion(&executor);

    assert_eq!(*log.lock(), [(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]);
    for (i, output) in outputs.into_iter().enumerate() {
        assert_eq!(output.take(), Some(i as u32));
    }
}

#[test]
#[should_panic(expected = "TestAsyncExecutor stuck with no runnable task.")]
fn test_executor_detects_stuck() {
    let executor = TestAsyncExecutor::new();
    TestAsyncExecutor::spawn(&executor, future::pending::<()>());
    TestAsyncExecutor::run_to_completion(&executor);
}
