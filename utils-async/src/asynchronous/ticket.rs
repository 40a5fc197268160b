// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC

//! Implementation of [`LockTicket`].

use crate::sync_types::{self, Lock as _};
use core::{marker, mem, ptr, sync::atomic, task};

/// The [`SyncRcPtr`](sync_types::SyncRcPtr) type a [`LockTicket`] is shared
/// through.
pub(super) type LockTicketPtr<ST> = <<ST as sync_types::SyncTypes>::SyncRcPtrFactory as sync_types::SyncRcPtrFactory>::SyncRcPtr<
    LockTicket<ST>,
>;

/// The party to notify once a [`LockTicket`] gets resolved.
enum LockTicketWaiter<ST: sync_types::SyncTypes> {
    /// Nobody is waiting (yet).
    None,
    /// A task is polling on the ticket, wake it.
    Task(task::Waker),
    /// The successor holding the ticket as its predecessor has lost interest.
    /// Resolve its own ticket in turn, handing the lock on to whoever is
    /// queued after it.
    Forward(LockTicketPtr<ST>),
}

/// One-shot lock hand-off signal.
///
/// A `LockTicket` is queued up at an [`AsyncLock`](super::AsyncLock)'s chain
/// by every acquisition. The acquisition queued right after it waits for the
/// ticket to get [resolved](Self::resolve), which happens at most once, when
/// the ticket's owner releases the lock.
///
/// A ticket that has never been waited on nor resolved is "fresh" and may get
/// recycled for a subsequent acquisition. Once resolved, a ticket stays
/// resolved for the rest of its life.
pub(super) struct LockTicket<ST: sync_types::SyncTypes> {
    /// Set once the ticket got resolved. Written only with `waiter` locked, but
    /// read locklessly on the fast path.
    resolved: atomic::AtomicBool,
    waiter: ST::Lock<LockTicketWaiter<ST>>,
}

// The members are all Send + Sync, implement the traits explicitly to not
// have the compiler chase the recursion through LockTicketWaiter::Forward.
unsafe impl<ST: sync_types::SyncTypes> marker::Send for LockTicket<ST> {}
unsafe impl<ST: sync_types::SyncTypes> marker::Sync for LockTicket<ST> {}

impl<ST: sync_types::SyncTypes> LockTicket<ST> {
    /// Allocate a fresh `LockTicket`.
    pub(super) fn try_new() -> Result<LockTicketPtr<ST>, sync_types::SyncRcPtrTryNewError> {
        <ST::SyncRcPtrFactory as sync_types::SyncRcPtrFactory>::try_new(Self {
            resolved: atomic::AtomicBool::new(false),
            waiter: ST::Lock::from(LockTicketWaiter::None),
        })
    }

    /// Convert into a raw pointer suitable for storing in an
    /// [`AtomicPtr`](atomic::AtomicPtr).
    ///
    /// The reference held by `this` is transferred to the returned pointer.
    pub(super) fn into_raw(this: LockTicketPtr<ST>) -> *mut Self {
        <LockTicketPtr<ST> as sync_types::SyncRcPtr<Self>>::into_raw(this).cast_mut()
    }

    /// Convert a pointer obtained from [`into_raw()`](Self::into_raw) back.
    ///
    /// Returns `None` for a null `p`.
    ///
    /// # Safety
    ///
    /// A non-null `p` must have been obtained from
    /// [`into_raw()`](Self::into_raw) and the reference it represents must not
    /// have been reclaimed already.
    pub(super) unsafe fn from_raw(p: *mut Self) -> Option<LockTicketPtr<ST>> {
        if p.is_null() {
            None
        } else {
            Some(unsafe { <LockTicketPtr<ST> as sync_types::SyncRcPtr<Self>>::from_raw(p.cast_const()) })
        }
    }

    /// Get the address of the ticket, as [`into_raw()`](Self::into_raw) would
    /// return it, without transferring a reference.
    pub(super) fn as_ptr(this: &LockTicketPtr<ST>) -> *mut Self {
        ptr::from_ref::<Self>(this).cast_mut()
    }

    /// Whether the ticket has been resolved already.
    pub(super) fn is_resolved(&self) -> bool {
        self.resolved.load(atomic::Ordering::Acquire)
    }

    /// Poll for the ticket to get resolved.
    ///
    /// Returns [`Ready`](task::Poll::Ready) if resolved. Otherwise the task
    /// associated with `cx` is registered for a wake-up upon resolution and
    /// [`Pending`](task::Poll::Pending) gets returned.
    ///
    /// Only a single task may poll on a given ticket.
    pub(super) fn poll_resolved(&self, cx: &mut task::Context<'_>) -> task::Poll<()> {
        if self.is_resolved() {
            return task::Poll::Ready(());
        }

        let mut waiter = self.waiter.lock();
        // Resolution happens under the lock, recheck.
        if self.is_resolved() {
            return task::Poll::Ready(());
        }
        // A forwarding ticket's successor has been dropped, it can't poll anymore.
        debug_assert!(!matches!(*waiter, LockTicketWaiter::Forward(_)));
        let registered = matches!(&*waiter, LockTicketWaiter::Task(waker) if waker.will_wake(cx.waker()));
        if !registered {
            *waiter = LockTicketWaiter::Task(cx.waker().clone());
        }
        task::Poll::Pending
    }

    /// Arrange for `successor` to get resolved as soon as `self` is.
    ///
    /// Used when the acquisition owning `successor` and waiting on `self` is
    /// abandoned. If `self` has been resolved already, nothing gets installed
    /// and `successor` is returned back in an `Err`.
    pub(super) fn forward_on_resolve(&self, successor: LockTicketPtr<ST>) -> Result<(), LockTicketPtr<ST>> {
        let mut waiter = self.waiter.lock();
        if self.is_resolved() {
            return Err(successor);
        }
        *waiter = LockTicketWaiter::Forward(successor);
        Ok(())
    }

    /// Resolve the ticket.
    ///
    /// Wakes the task waiting on the ticket, if any. If the waiting
    /// acquisition has been abandoned in the meanwhile, its own ticket gets
    /// resolved in turn, and so on.
    pub(super) fn resolve(this: LockTicketPtr<ST>) {
        let mut ticket = this;
        loop {
            let waiter = {
                let mut waiter = ticket.waiter.lock();
                let was_resolved = ticket.resolved.swap(true, atomic::Ordering::Release);
                debug_assert!(!was_resolved);
                mem::replace(&mut *waiter, LockTicketWaiter::None)
            };

            // Don't wake with the waiter lock held.
            match waiter {
                LockTicketWaiter::None => break,
                LockTicketWaiter::Task(waker) => {
                    waker.wake();
                    break;
                }
                LockTicketWaiter::Forward(successor) => {
                    log::trace!("AsyncLock: forwarding hand-off past abandoned waiter");
                    ticket = successor;
                }
            }
        }
    }
}
