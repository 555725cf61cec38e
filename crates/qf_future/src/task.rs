//! The current-task handle threaded through every future-flagged task.

use core::sync::atomic::{AtomicBool, Ordering};

use vc_os::sync::{Arc, Weak};

use crate::error::ForkError;
use crate::location::Location;
use crate::runtime::{Inner, spawn_future_on};
use crate::shepherd::ShepherdId;
use async_task::Task;
use core::future::Future;
use log::warn;

/// Identifies one spawned lightweight task and its "future" status.
///
/// A task is a *future* (in the admission-control sense, not merely "a Rust
/// `Future`") from the moment [`FutureRuntime::future_fork`] spawns it until
/// [`TaskHandle::future_exit`] clears the flag; after that the handle is
/// still usable (`future_yield`/`future_acquire` simply become no-ops) but no
/// longer counts against its shepherd's VP cap.
///
/// [`FutureRuntime::future_fork`]: crate::runtime::FutureRuntime::future_fork
#[derive(Clone)]
pub struct TaskHandle {
    location: Arc<Location>,
    runtime: Weak<Inner>,
    is_future: Arc<AtomicBool>,
}

impl TaskHandle {
    pub(crate) fn new(location: Arc<Location>, runtime: Weak<Inner>) -> Self {
        Self {
            location,
            runtime,
            is_future: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Returns whether this task currently counts against its shepherd's VP cap.
    #[inline]
    pub fn is_future(&self) -> bool {
        self.is_future.load(Ordering::Acquire)
    }

    /// Returns the shepherd this task is running on.
    #[inline]
    pub fn shepherd(&self) -> ShepherdId {
        self.location.id()
    }

    /// Releases this task's VP slot, if it holds one.
    ///
    /// Idempotent with respect to the future flag: calling it on a task that
    /// is not (or is no longer) a future is a no-op that returns `false`.
    pub fn future_yield(&self) -> bool {
        if self.is_future() {
            self.location.gate().release();
            true
        } else {
            false
        }
    }

    /// Re-acquires a VP slot for this task, suspending until one is available.
    ///
    /// A no-op for a task that is not a future.
    pub async fn future_acquire(&self) {
        if self.is_future() {
            self.location.gate().acquire().await;
        }
    }

    /// Forks a new future-flagged task, placed by the shepherd-local
    /// round-robin cursor (this task runs on a shepherd, so it always has a
    /// worker-local binding to consult).
    ///
    /// Fails with [`ForkError::RuntimeNotInitialized`] if the owning
    /// [`FutureRuntime`](crate::runtime::FutureRuntime) has already been
    /// dropped.
    pub async fn future_fork<F, Fut, T>(&self, f: F) -> Result<Task<T>, ForkError>
    where
        F: FnOnce(TaskHandle) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.runtime.upgrade().ok_or_else(|| {
            warn!("future_fork: called on a task whose runtime has been torn down");
            ForkError::RuntimeNotInitialized
        })?;
        let shepherd = inner.choose_target();
        Ok(spawn_future_on(&inner, shepherd, f).await)
    }

    /// Releases this task's VP slot (as [`future_yield`](Self::future_yield))
    /// and permanently clears its future flag.
    ///
    /// After this call every subsequent `future_yield`/`future_acquire` on
    /// this handle is a no-op; the task may keep running to completion
    /// without counting against its shepherd's cap.
    pub fn future_exit(&self) {
        self.future_yield();
        self.is_future.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use vc_os::sync::Weak;

    use super::*;
    use crate::location::Location;

    /// Builds a bare `TaskHandle` without a `FutureRuntime` behind it, for
    /// exercising the flag/gate state machine in isolation. `location` is
    /// returned alongside so tests can simulate the admission that
    /// `spawn_future_on` would normally have performed before handing out
    /// the handle.
    fn handle_with_cap(cap: usize) -> (Arc<Location>, TaskHandle) {
        let location = Arc::new(Location::new(ShepherdId(0), cap));
        let handle = TaskHandle::new(Arc::clone(&location), Weak::new());
        (location, handle)
    }

    #[test]
    fn new_handle_is_a_future() {
        let (_location, handle) = handle_with_cap(1);
        assert!(handle.is_future());
    }

    #[test]
    fn future_yield_releases_the_held_slot() {
        let (location, handle) = handle_with_cap(1);
        crate::block_on(location.gate().acquire());
        assert_eq!(location.gate().count(), 1);

        assert!(handle.future_yield());
        assert_eq!(location.gate().count(), 0);
    }

    #[test]
    fn acquire_then_yield_round_trips_the_gate_state() {
        let (location, handle) = handle_with_cap(1);

        crate::block_on(handle.future_acquire());
        assert_eq!(location.gate().count(), 1);

        assert!(handle.future_yield());
        assert_eq!(location.gate().count(), 0);

        crate::block_on(handle.future_acquire());
        assert_eq!(location.gate().count(), 1);
    }

    #[test]
    fn future_yield_on_a_non_future_task_is_a_no_op() {
        let (location, handle) = handle_with_cap(1);
        crate::block_on(location.gate().acquire());
        handle.future_exit();
        assert_eq!(location.gate().count(), 0);

        assert!(!handle.is_future());
        assert!(!handle.future_yield());
        assert_eq!(location.gate().count(), 0);
    }

    #[test]
    fn future_exit_is_idempotent() {
        let (location, handle) = handle_with_cap(1);
        crate::block_on(location.gate().acquire());

        handle.future_exit();
        assert_eq!(location.gate().count(), 0);
        assert!(!handle.is_future());

        handle.future_exit();
        assert_eq!(location.gate().count(), 0);
        assert!(!handle.is_future());
    }

    #[test]
    fn forking_through_a_handle_whose_runtime_is_gone_fails() {
        let (_location, handle) = handle_with_cap(1);
        let result = crate::block_on(handle.future_fork(|_h| async {}));
        assert!(matches!(result, Err(ForkError::RuntimeNotInitialized)));
    }
}
