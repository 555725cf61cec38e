//! A single-threaded, multi-producer task executor.
//!
//! Adapted from `vc_task::mini_executor::Executor`: tasks may be spawned from
//! any thread, but only the thread that calls [`Executor::run`] ever polls
//! them. This is exactly the shape a shepherd needs — other shepherds place
//! work on it via [`Executor::spawn`], but only the owning shepherd thread
//! ever ticks it.
//!
//! Unlike the original, every future spawned here is `Send + 'static`
//! (shepherds never go away mid-task and tasks are never pinned to a
//! particular `!Send` resource), so there is no need for the unsafe,
//! lifetime-polymorphic `spawn_unchecked` the original exposes.

use std::future::{poll_fn, Future};
use std::task::{Context, Poll};

use async_task::{Runnable, Task};
use atomic_waker::AtomicWaker;
use futures_lite::FutureExt;

use vc_os::sync::Arc;
use vc_os::utils::ListQueue;

struct State {
    queue: ListQueue<Runnable>,
    waker: AtomicWaker,
}

impl State {
    fn new() -> Self {
        Self {
            queue: ListQueue::new(16),
            waker: AtomicWaker::new(),
        }
    }
}

/// A shepherd's run queue and task poller.
pub struct Executor {
    state: Arc<State>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(State::new()),
        }
    }

    /// Spawns a task onto this executor. Safe to call from any thread.
    pub fn spawn<F>(&self, fut: F) -> Task<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let state = self.state.clone();

        let schedule = move |runnable| {
            state.queue.push(runnable);
            state.waker.wake();
        };

        let (runnable, task) = async_task::spawn(fut, schedule);
        runnable.schedule();
        task
    }

    /// Attempts to run one scheduled task. Returns `false` if none was ready.
    pub fn try_tick(&self) -> bool {
        if let Some(runnable) = self.try_get_runnable() {
            runnable.run();
            true
        } else {
            false
        }
    }

    /// Polls and runs a single scheduled task, waiting for one if none is ready yet.
    pub async fn tick(&self) {
        poll_fn(|ctx| self.poll_runnable(ctx)).await.run();
    }

    fn poll_runnable(&self, ctx: &Context<'_>) -> Poll<Runnable> {
        self.state.waker.register(ctx.waker());

        if let Some(runnable) = self.try_get_runnable() {
            Poll::Ready(runnable)
        } else {
            Poll::Pending
        }
    }

    fn try_get_runnable(&self) -> Option<Runnable> {
        self.state.queue.pop()
    }

    /// Drives the executor forever, alongside `fut`, until `fut` completes.
    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        async {
            loop {
                self.tick().await;
            }
        }
        .or(fut)
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn spawn_and_try_tick_runs_task() {
        let ex = Executor::new();
        let task = ex.spawn(async { 1 + 1 });
        assert!(ex.try_tick());
        assert_eq!(crate::block_on(task), 2);
    }

    #[test]
    fn try_tick_returns_false_on_empty_queue() {
        let ex = Executor::new();
        assert!(!ex.try_tick());
    }

    #[test]
    fn spawn_from_other_thread_executes_on_owner() {
        let ex = Arc::new(Executor::new());
        let task = ex.spawn(async { 7 });

        let owner_ex = Arc::clone(&ex);
        let owner = thread::spawn(move || {
            crate::block_on(owner_ex.tick());
        });
        owner.join().unwrap();

        assert_eq!(crate::block_on(task), 7);
    }

    #[test]
    fn run_returns_as_soon_as_the_driven_future_completes() {
        let ex = Executor::new();

        // A task that never completes must not prevent `run` from returning
        // once its own `fut` does.
        ex.spawn(core::future::pending::<()>()).detach();

        assert_eq!(crate::block_on(ex.run(async { 42 })), 42);
    }
}
