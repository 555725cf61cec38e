//! Futures admission control atop a small lightweight-thread runtime.
//!
//! This crate multiplexes user-level tasks over a fixed set of OS-thread
//! workers ("shepherds"). Tasks spawned as *futures* additionally count
//! against a per-shepherd cap on concurrently admitted futures (a VP slot);
//! forking, yielding, re-acquiring, and exiting that status is what this
//! crate is for. See [`runtime`] for the public entry points and
//! [`location`] for the admission mechanism itself.
//!
//! The host runtime ([`executor`], [`runtime`]) exists only so the
//! admission-control core has something concrete to drive end to end; it is
//! intentionally the simplest thing that can pin a task to a chosen
//! shepherd, not a work-stealing pool.

use core::future::Future;

mod error;
mod executor;
mod location;
mod runtime;
mod shepherd;
mod task;

pub use error::{ForkError, FutureError, FutureInitError};
pub use runtime::{FutureRuntime, FutureRuntimeBuilder, future_join, future_join_all};
pub use shepherd::ShepherdId;
pub use task::TaskHandle;

/// Blocks the calling thread until `future` completes.
///
/// Busy-waits with a no-op [`Waker`](core::task::Waker), exactly like the
/// teacher's own `vc_task::block_on`: there is no reactor to register
/// interest with in this crate's scope, so there is nothing a "real" waker
/// would buy beyond what a future's own suspension points (the admission
/// gate, a joined task) already provide. Used to drive each shepherd's
/// executor loop and, in tests, to drive async test bodies to completion.
pub fn block_on<T>(future: impl Future<Output = T>) -> T {
    use core::task::{Context, Poll};

    let mut future = core::pin::pin!(future);
    let cx = &mut Context::from_waker(core::task::Waker::noop());

    loop {
        match future.as_mut().poll(cx) {
            Poll::Ready(output) => return output,
            Poll::Pending => core::hint::spin_loop(),
        }
    }
}
