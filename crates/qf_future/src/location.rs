//! Per-shepherd admission state.
//!
//! A [`Location`] is the bookkeeping record for one shepherd's VP-slot cap:
//! how many futures are currently admitted, how many are allowed, and the
//! [`AdmissionGate`] futures block on when the cap is reached.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use vc_os::sync::{Mutex, PoisonError};

use crate::shepherd::ShepherdId;

/// A queued waiter: a ticket identifying its own slot (so a cancelled waiter
/// can find and remove exactly its own entry, never someone else's) plus the
/// waker to invoke once a slot frees up.
struct Waiter {
    ticket: u64,
    waker: Waker,
}

struct GateState {
    count: usize,
    cap: usize,
    next_ticket: u64,
    waiters: VecDeque<Waiter>,
}

/// An async semaphore gating the number of futures concurrently admitted on
/// one shepherd.
///
/// This stands in for the original runtime's full/empty-bit wait address
/// (see the crate's design notes on §4.E.1): `acquire` suspends only the
/// calling task, never the shepherd's OS thread, and the compare-then-block
/// decision is always made with the lock held, never across an `.await`.
pub(crate) struct AdmissionGate {
    state: Mutex<GateState>,
}

impl AdmissionGate {
    fn new(cap: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                count: 0,
                cap,
                next_ticket: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Blocks (suspends) the calling task until a slot is available, then
    /// takes it.
    pub(crate) async fn acquire(&self) {
        Acquire { gate: self, ticket: None }.await;
    }

    /// Releases a previously acquired slot, waking at most one waiter.
    ///
    /// The wake decision compares the *pre*-decrement count to the cap, a
    /// direct transliteration of the original `vp_count-- == vp_max` test
    /// (see the crate's design notes' Open Questions section).
    pub(crate) fn release(&self) {
        let waker = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let was_at_cap = state.count == state.cap;
            state.count -= 1;
            if was_at_cap {
                state.waiters.pop_front().map(|waiter| waiter.waker)
            } else {
                None
            }
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    }

    #[cfg(test)]
    pub(crate) fn count(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).count
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).waiters.len()
    }
}

/// The future returned by [`AdmissionGate::acquire`].
///
/// Cancel-safe: if this future is dropped before it resolves (e.g. the task
/// awaiting it is cancelled), its `Drop` impl removes its own ticket from
/// `waiters` so a stale `Waker` can never be the one `release` pops in place
/// of a still-live waiter.
struct Acquire<'a> {
    gate: &'a AdmissionGate,
    ticket: Option<u64>,
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut state = this.gate.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.count < state.cap {
            if let Some(ticket) = this.ticket.take() {
                state.waiters.retain(|waiter| waiter.ticket != ticket);
            }
            state.count += 1;
            return Poll::Ready(());
        }

        match this.ticket {
            Some(ticket) => {
                if let Some(waiter) = state.waiters.iter_mut().find(|waiter| waiter.ticket == ticket) {
                    waiter.waker = cx.waker().clone();
                } else {
                    state.waiters.push_back(Waiter { ticket, waker: cx.waker().clone() });
                }
            }
            None => {
                let ticket = state.next_ticket;
                state.next_ticket = state.next_ticket.wrapping_add(1);
                state.waiters.push_back(Waiter { ticket, waker: cx.waker().clone() });
                this.ticket = Some(ticket);
            }
        }
        Poll::Pending
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket {
            let mut state = self.gate.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.waiters.retain(|waiter| waiter.ticket != ticket);
        }
    }
}

/// The bookkeeping record for one shepherd's admission state.
///
/// `vp_max` is fixed at construction; `vp_count` lives inside the
/// [`AdmissionGate`] it owns. There is no `sched_cursor` field here: the
/// round-robin cursor is kept in thread-local storage instead (see
/// [`crate::runtime`]), since it is read and written only by the owning
/// shepherd thread and a `Location` must otherwise be freely shareable across
/// shepherds.
pub(crate) struct Location {
    id: ShepherdId,
    gate: AdmissionGate,
}

impl Location {
    pub(crate) fn new(id: ShepherdId, vp_max: usize) -> Self {
        Self {
            id,
            gate: AdmissionGate::new(vp_max),
        }
    }

    pub(crate) fn id(&self) -> ShepherdId {
        self.id
    }

    pub(crate) fn gate(&self) -> &AdmissionGate {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use vc_os::sync::Arc;

    use super::*;

    #[test]
    fn location_exposes_its_id() {
        let loc = Location::new(ShepherdId(3), 1);
        assert_eq!(loc.id(), ShepherdId(3));
    }

    #[test]
    fn admits_up_to_cap_without_blocking() {
        let gate = AdmissionGate::new(2);
        crate::block_on(gate.acquire());
        crate::block_on(gate.acquire());
        assert_eq!(gate.count(), 2);
    }

    #[test]
    fn release_drops_the_count_below_cap() {
        let gate = AdmissionGate::new(1);
        crate::block_on(gate.acquire());
        assert_eq!(gate.count(), 1);
        gate.release();
        assert_eq!(gate.count(), 0);
    }

    #[test]
    fn a_waiter_is_admitted_only_after_a_release() {
        let gate = Arc::new(AdmissionGate::new(1));
        crate::block_on(gate.acquire());

        let waiting_gate = Arc::clone(&gate);
        let (admitted_tx, admitted_rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            crate::block_on(waiting_gate.acquire());
            admitted_tx.send(()).unwrap();
        });

        // The waiter cannot have been admitted yet: the single slot is still held.
        assert!(admitted_rx.recv_timeout(std::time::Duration::from_millis(50)).is_err());

        gate.release();
        admitted_rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        waiter.join().unwrap();

        assert_eq!(gate.count(), 1);
    }

    #[test]
    fn release_wakes_exactly_one_of_several_waiters() {
        let gate = Arc::new(AdmissionGate::new(2));
        crate::block_on(gate.acquire());
        crate::block_on(gate.acquire());

        let (admitted_tx, admitted_rx) = mpsc::channel();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let admitted_tx = admitted_tx.clone();
                thread::spawn(move || {
                    crate::block_on(gate.acquire());
                    admitted_tx.send(()).unwrap();
                })
            })
            .collect();
        drop(admitted_tx);

        // Give every waiter a chance to register before releasing once.
        thread::sleep(std::time::Duration::from_millis(50));
        gate.release();

        // Exactly one waiter should have been admitted.
        admitted_rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert!(admitted_rx.recv_timeout(std::time::Duration::from_millis(50)).is_err());
        assert_eq!(gate.count(), 2);

        // Drain the rest so the threads can exit.
        for _ in 0..3 {
            gate.release();
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn cancelling_a_waiter_does_not_starve_a_later_live_waiter() {
        let gate = Arc::new(AdmissionGate::new(1));
        crate::block_on(gate.acquire());

        // Register a waiter, then drop its future before it is ever woken --
        // simulating the task that was awaiting `acquire` being cancelled.
        {
            let mut dead = core::pin::pin!(gate.acquire());
            let cx = &mut Context::from_waker(Waker::noop());
            assert!(dead.as_mut().poll(cx).is_pending());
            assert_eq!(gate.waiter_count(), 1);
        }
        assert_eq!(gate.waiter_count(), 0, "dropping the waiter must remove its own queue entry");

        // A second, live waiter registers behind the now-vacated entry.
        let waiting_gate = Arc::clone(&gate);
        let (admitted_tx, admitted_rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            crate::block_on(waiting_gate.acquire());
            admitted_tx.send(()).unwrap();
        });

        // Give the live waiter a chance to register before releasing.
        thread::sleep(std::time::Duration::from_millis(50));

        // A single release must wake the live waiter, not a stale entry.
        gate.release();
        admitted_rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        waiter.join().unwrap();

        assert_eq!(gate.count(), 1);
    }
}
