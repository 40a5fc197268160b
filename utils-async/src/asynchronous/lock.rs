// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC

//! Implementation of [`AsyncLock`].

use super::ticket::{LockTicket, LockTicketPtr};
use crate::sync_types;
use core::{convert, future, mem, pin, ptr, sync::atomic, task};

/// Error information returned by the [`AsyncLock`] API.
#[derive(Clone, Copy, Debug)]
pub enum AsyncLockError {
    /// No work to run under the lock has been specified.
    InvalidArgument,

    /// Memory allocation failure.
    MemoryAllocationFailure,
}

impl convert::From<sync_types::SyncRcPtrTryNewError> for AsyncLockError {
    fn from(value: sync_types::SyncRcPtrTryNewError) -> Self {
        match value {
            sync_types::SyncRcPtrTryNewError::AllocationFailure => Self::MemoryAllocationFailure,
        }
    }
}

/// FIFO-fair mutual exclusion lock which can be waited asynchronously for.
///
/// Acquisitions are granted strictly in the order of the calls to
/// [`lock()`](Self::lock), [`lock_with()`](Self::lock_with) or
/// [`lock_with_optional()`](Self::lock_with_optional), which enqueue the
/// caller right away, even before the returned [`Future`](future::Future)
/// gets polled for the first time.
///
/// Internally, each acquisition queues up a one-shot hand-off ticket by
/// atomically exchanging it with the one at the chain's tail, and waits for
/// that predecessor ticket to get resolved. Releasing the lock resolves the
/// own ticket, unless nobody has queued up behind in the meanwhile, in which
/// case the still fresh ticket gets recycled into a single-slot cache. An
/// uncontended acquire-release cycle thereby completes without any memory
/// allocation.
///
/// The lock is not reentrant: acquiring it again while holding it waits
/// forever.
pub struct AsyncLock<ST: sync_types::SyncTypes> {
    /// The most recently enqueued ticket, holding a reference on it. Null is
    /// equivalent to a resolved ticket.
    chain: atomic::AtomicPtr<LockTicket<ST>>,
    /// A fresh ticket available for reuse, if non-null. Holds a reference.
    cached_ticket: atomic::AtomicPtr<LockTicket<ST>>,
    #[cfg(any(test, feature = "ticket-alloc-stats"))]
    ticket_allocations: atomic::AtomicUsize,
}

impl<ST: sync_types::SyncTypes> AsyncLock<ST> {
    /// Instantiate a new, unlocked [`AsyncLock`].
    ///
    /// No ticket is allocated upfront, the first acquisition will allocate one.
    pub const fn new() -> Self {
        Self {
            chain: atomic::AtomicPtr::new(ptr::null_mut()),
            cached_ticket: atomic::AtomicPtr::new(ptr::null_mut()),
            #[cfg(any(test, feature = "ticket-alloc-stats"))]
            ticket_allocations: atomic::AtomicUsize::new(0),
        }
    }

    /// Instantiate a new, unlocked [`AsyncLock`] with a ticket readily cached.
    ///
    /// Unlike with [`new()`](Self::new), the first acquisition won't need to
    /// allocate.
    ///
    /// # Errors:
    ///
    /// * [`AsyncLockError::MemoryAllocationFailure`] - Memory allocation
    ///   failure.
    pub fn try_new_prewarmed() -> Result<Self, AsyncLockError> {
        let this = Self::new();
        let ticket = this.alloc_ticket()?;
        this.cached_ticket
            .store(LockTicket::<ST>::into_raw(ticket), atomic::Ordering::Relaxed);
        Ok(this)
    }

    /// Asynchronous locking.
    ///
    /// Enqueue for the lock and return a [`AsyncLockFuture`] to wait for the
    /// lock to get granted. The position in the queue is determined at the
    /// time of the call.
    ///
    /// Note that the mere existence of a [`AsyncLockFuture`] returned from
    /// this function may block other waiters -- it **must** always get either
    /// polled to completion or dropped again.
    ///
    /// # Errors:
    ///
    /// * [`AsyncLockError::MemoryAllocationFailure`] - Memory allocation
    ///   failure.
    pub fn lock(&self) -> Result<AsyncLockFuture<'_, ST>, AsyncLockError> {
        let ticket = self.take_ticket()?;
        let predecessor = self.chain.swap(
            LockTicket::<ST>::into_raw(ticket.clone()),
            atomic::Ordering::AcqRel,
        );
        // The exchange transferred the chain's reference on the predecessor.
        let predecessor =
            unsafe { LockTicket::<ST>::from_raw(predecessor) }.filter(|predecessor| !predecessor.is_resolved());
        Ok(AsyncLockFuture {
            lock: self,
            ticket: Some(ticket),
            predecessor,
        })
    }

    /// Run `work` under the lock.
    ///
    /// Enqueue for the lock right away and return a
    /// [`Future`](future::Future) which, once the lock has been granted,
    /// invokes `work` and polls the resulting [`Future`](future::Future) to
    /// completion before releasing the lock again. The `work`'s output is
    /// passed through unmodified. The lock gets released also if the returned
    /// [`Future`](future::Future) is dropped or `work` panics.
    ///
    /// # Arguments:
    ///
    /// * `work` - Producer of the [`Future`](future::Future) to run while
    ///   holding the lock.
    ///
    /// # Errors:
    ///
    /// * [`AsyncLockError::MemoryAllocationFailure`] - Memory allocation
    ///   failure.
    pub fn lock_with<W, F>(&self, work: W) -> Result<impl future::Future<Output = F::Output>, AsyncLockError>
    where
        W: FnOnce() -> F,
        F: future::Future,
    {
        self.lock_with_optional(Some(work))
    }

    /// Run `work` under the lock, if specified.
    ///
    /// Like [`lock_with()`](Self::lock_with), but for callers which might not
    /// have a `work` at hand.
    ///
    /// # Arguments:
    ///
    /// * `work` - Producer of the [`Future`](future::Future) to run while
    ///   holding the lock.
    ///
    /// # Errors:
    ///
    /// * [`AsyncLockError::InvalidArgument`] - `work` is `None`. The lock's
    ///   state is left untouched.
    /// * [`AsyncLockError::MemoryAllocationFailure`] - Memory allocation
    ///   failure.
    pub fn lock_with_optional<W, F>(
        &self,
        work: Option<W>,
    ) -> Result<impl future::Future<Output = F::Output>, AsyncLockError>
    where
        W: FnOnce() -> F,
        F: future::Future,
    {
        let work = work.ok_or(AsyncLockError::InvalidArgument)?;
        let lock_fut = self.lock()?;
        Ok(async move {
            let guard = lock_fut.await;
            let result = work().await;
            guard.unlock();
            result
        })
    }

    /// Number of tickets freshly allocated over the lock's lifetime.
    #[cfg(any(test, feature = "ticket-alloc-stats"))]
    pub fn ticket_allocations(&self) -> usize {
        self.ticket_allocations.load(atomic::Ordering::Relaxed)
    }

    fn take_ticket(&self) -> Result<LockTicketPtr<ST>, AsyncLockError> {
        let cached_ticket = self.cached_ticket.swap(ptr::null_mut(), atomic::Ordering::Acquire);
        match unsafe { LockTicket::<ST>::from_raw(cached_ticket) } {
            Some(ticket) => Ok(ticket),
            None => self.alloc_ticket(),
        }
    }

    fn alloc_ticket(&self) -> Result<LockTicketPtr<ST>, AsyncLockError> {
        let ticket = LockTicket::<ST>::try_new().map_err(|e| {
            log::warn!("AsyncLock: ticket allocation failed");
            AsyncLockError::from(e)
        })?;
        #[cfg(any(test, feature = "ticket-alloc-stats"))]
        self.ticket_allocations.fetch_add(1, atomic::Ordering::Relaxed);
        log::trace!("AsyncLock: allocated fresh ticket");
        Ok(ticket)
    }

    fn release(&self, ticket: LockTicketPtr<ST>) {
        let own = LockTicket::<ST>::as_ptr(&ticket);
        match self.chain.compare_exchange(
            own,
            ptr::null_mut(),
            atomic::Ordering::AcqRel,
            atomic::Ordering::Acquire,
        ) {
            Ok(_) => {
                // Nobody queued up behind, so the ticket is still fresh. Drop the
                // chain's reference taken over by the exchange and recycle.
                drop(unsafe { LockTicket::<ST>::from_raw(own) });
                self.recycle_ticket(ticket);
            }
            Err(_) => LockTicket::<ST>::resolve(ticket),
        }
    }

    fn recycle_ticket(&self, ticket: LockTicketPtr<ST>) {
        let ticket = LockTicket::<ST>::into_raw(ticket);
        if self
            .cached_ticket
            .compare_exchange(
                ptr::null_mut(),
                ticket,
                atomic::Ordering::Release,
                atomic::Ordering::Relaxed,
            )
            .is_err()
        {
            // Cache slot occupied, let the ticket go.
            drop(unsafe { LockTicket::<ST>::from_raw(ticket) });
        }
    }
}

impl<ST: sync_types::SyncTypes> Default for AsyncLock<ST> {
    fn default() -> Self {
        Self::new()
    }
}

impl<ST: sync_types::SyncTypes> Drop for AsyncLock<ST> {
    fn drop(&mut self) {
        for p in [self.chain.get_mut(), self.cached_ticket.get_mut()] {
            let p = mem::replace(p, ptr::null_mut());
            drop(unsafe { LockTicket::<ST>::from_raw(p) });
        }
    }
}

/// Wait for an [`AsyncLock`] to get granted.
///
/// Returned by [`AsyncLock::lock()`]. Dropping it before completion gives up
/// on the enqueued acquisition without stalling any subsequent waiters.
pub struct AsyncLockFuture<'a, ST: sync_types::SyncTypes> {
    lock: &'a AsyncLock<ST>,
    /// `None` once completed.
    ticket: Option<LockTicketPtr<ST>>,
    /// `None` if known to have been resolved.
    predecessor: Option<LockTicketPtr<ST>>,
}

impl<'a, ST: sync_types::SyncTypes> Unpin for AsyncLockFuture<'a, ST> {}

impl<'a, ST: sync_types::SyncTypes> future::Future for AsyncLockFuture<'a, ST> {
    type Output = AsyncLockGuard<'a, ST>;

    fn poll(self: pin::Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(predecessor) = &this.predecessor {
            if predecessor.poll_resolved(cx).is_pending() {
                return task::Poll::Pending;
            }
            this.predecessor = None;
        }

        match this.ticket.take() {
            Some(ticket) => task::Poll::Ready(AsyncLockGuard {
                lock: this.lock,
                ticket: Some(ticket),
            }),
            None => unreachable!(),
        }
    }
}

impl<'a, ST: sync_types::SyncTypes> Drop for AsyncLockFuture<'a, ST> {
    fn drop(&mut self) {
        let ticket = match self.ticket.take() {
            Some(ticket) => ticket,
            None => return,
        };

        // If still waiting, have the predecessor's resolution pass the lock on
        // right away.
        let ticket = match self.predecessor.take() {
            Some(predecessor) => match predecessor.forward_on_resolve(ticket) {
                Ok(()) => return,
                Err(ticket) => ticket,
            },
            None => ticket,
        };
        self.lock.release(ticket);
    }
}

/// Lock guard for [`AsyncLock`].
///
/// The lock is held until the guard gets dropped or
/// [`unlock()`](Self::unlock)ed.
pub struct AsyncLockGuard<'a, ST: sync_types::SyncTypes> {
    lock: &'a AsyncLock<ST>,
    ticket: Option<LockTicketPtr<ST>>,
}

impl<'a, ST: sync_types::SyncTypes> AsyncLockGuard<'a, ST> {
    /// Release the lock.
    pub fn unlock(self) {
        drop(self)
    }

    /// Get the [`AsyncLock`] held by the guard.
    pub fn get_lock(&self) -> &'a AsyncLock<ST> {
        self.lock
    }
}

impl<'a, ST: sync_types::SyncTypes> Drop for AsyncLockGuard<'a, ST> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.lock.release(ticket);
        }
    }
}
