//! The host lightweight-thread runtime: shepherd threads, per-shepherd
//! executors, and the public entry points of the futures admission-control
//! layer.
//!
//! Not part of the admission-control core itself (components A-G of the
//! design); this module is the "H" that gives the core something concrete
//! to drive, kept deliberately the simplest thing that pins each task to a
//! specific shepherd rather than a throughput-oriented work-stealing pool.

use std::cell::Cell;
use std::mem;
use std::thread;
use std::thread::JoinHandle;
use std::thread_local;

use async_task::Task;
use core::future::Future;
use log::warn;

use vc_os::sync::{Arc, Mutex, PoisonError};

use crate::error::FutureInitError;
use crate::executor::Executor;
use crate::location::Location;
use crate::shepherd::ShepherdId;
use crate::task::TaskHandle;

thread_local! {
    /// The shepherd the calling OS thread is driving, if any.
    ///
    /// This is the crate's O(1) Worker-Local Binding: set once, before the
    /// owning shepherd's executor ever polls a task, so every task that
    /// queries it while actually executing on that shepherd observes it
    /// already populated.
    static CURRENT_SHEPHERD: Cell<Option<ShepherdId>> = const { Cell::new(None) };

    /// The per-shepherd round-robin placement cursor.
    ///
    /// Mutated only by the shepherd thread that owns it, so a plain `Cell`
    /// suffices; the runtime's non-preemptive, single-threaded-per-shepherd
    /// scheduling model means no two tasks on the same shepherd can ever
    /// race on it.
    static LOCAL_CURSOR: Cell<usize> = const { Cell::new(0) };
}

/// Shared state behind a [`FutureRuntime`], reachable through a `Weak` handle
/// from every [`TaskHandle`] so a task can fork further futures without
/// keeping the runtime alive by itself.
pub(crate) struct Inner {
    locations: Box<[Arc<Location>]>,
    executors: Box<[Executor]>,
    global_cursor: Mutex<usize>,
    shepherd_count: usize,
}

impl Inner {
    /// Placement policy (§4.D): local round-robin cursor when the caller
    /// runs on a shepherd, global mutex-guarded cursor otherwise.
    pub(crate) fn choose_target(&self) -> ShepherdId {
        if CURRENT_SHEPHERD.with(Cell::get).is_some() {
            LOCAL_CURSOR.with(|cursor| {
                let id = cursor.get();
                cursor.set((id + 1) % self.shepherd_count);
                ShepherdId(id)
            })
        } else {
            let mut cursor = self.global_cursor.lock().unwrap_or_else(PoisonError::into_inner);
            let id = *cursor;
            *cursor = (id + 1) % self.shepherd_count;
            ShepherdId(id)
        }
    }
}

/// Admits a slot on `shepherd`'s `Location`, then spawns `f(handle)` there as
/// a future-flagged task. Shared by [`FutureRuntime::future_fork`] and
/// [`TaskHandle::future_fork`](crate::task::TaskHandle::future_fork).
pub(crate) async fn spawn_future_on<F, Fut, T>(inner: &Arc<Inner>, shepherd: ShepherdId, f: F) -> Task<T>
where
    F: FnOnce(TaskHandle) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let location = Arc::clone(&inner.locations[shepherd.index()]);
    location.gate().acquire().await;

    let handle = TaskHandle::new(Arc::clone(&location), Arc::downgrade(inner));
    inner.executors[shepherd.index()].spawn(f(handle))
}

/// Builder for a [`FutureRuntime`].
///
/// Configurable parameters:
///
/// - [`shepherd_count`]: number of shepherd threads. Defaults to
///   [`vc_os::thread::available_parallelism`].
/// - [`vp_per_loc`]: the per-shepherd VP-slot cap (`vp_max` of every
///   `Location`). Defaults to `1`. Zero is rejected at [`build`].
/// - [`thread_name`]: shepherd thread name prefix; threads are named
///   `{thread_name} ({id})`. Default: `qf-shepherd ({id})`.
///
/// [`shepherd_count`]: Self::shepherd_count
/// [`vp_per_loc`]: Self::vp_per_loc
/// [`thread_name`]: Self::thread_name
/// [`build`]: Self::build
#[derive(Default)]
#[must_use]
pub struct FutureRuntimeBuilder {
    shepherd_count: Option<usize>,
    vp_per_loc: Option<usize>,
    thread_name: Option<String>,
}

impl FutureRuntimeBuilder {
    /// Creates a new, unconfigured builder.
    #[inline]
    pub const fn new() -> Self {
        Self {
            shepherd_count: None,
            vp_per_loc: None,
            thread_name: None,
        }
    }

    /// Sets the number of shepherd threads.
    #[inline]
    pub fn shepherd_count(mut self, shepherd_count: usize) -> Self {
        self.shepherd_count = Some(shepherd_count);
        self
    }

    /// Sets the per-shepherd VP-slot cap. Must be at least `1`.
    #[inline]
    pub fn vp_per_loc(mut self, vp_per_loc: usize) -> Self {
        self.vp_per_loc = Some(vp_per_loc);
        self
    }

    /// Sets the shepherd thread name prefix.
    #[inline]
    pub fn thread_name(mut self, thread_name: String) -> Self {
        self.thread_name = Some(thread_name);
        self
    }

    /// Builds and spawns the shepherd threads, yielding an initialized
    /// [`FutureRuntime`].
    ///
    /// Rejects `vp_per_loc == 0` (an unconditional stall per §4.E's edge
    /// case) without touching any shared state.
    pub fn build(self) -> Result<FutureRuntime, FutureInitError> {
        FutureRuntime::new_internal(self)
    }
}

/// An initialized futures admission-control layer atop its own set of
/// shepherd threads.
///
/// `future_init` from the design returns this value; there is no ambient
/// global. Dropping it tears the runtime down: it closes the shutdown
/// channel and joins every shepherd thread (§4.G.1).
pub struct FutureRuntime {
    inner: Arc<Inner>,
    shutdown_tx: async_channel::Sender<()>,
    threads: Box<[JoinHandle<()>]>,
}

impl FutureRuntime {
    /// Shorthand for `FutureRuntimeBuilder::new().vp_per_loc(vp_per_loc).build()`.
    ///
    /// This is the crate's `future_init(vp_per_loc)`.
    pub fn init(vp_per_loc: usize) -> Result<Self, FutureInitError> {
        FutureRuntimeBuilder::new().vp_per_loc(vp_per_loc).build()
    }

    fn new_internal(builder: FutureRuntimeBuilder) -> Result<Self, FutureInitError> {
        let vp_per_loc = builder.vp_per_loc.unwrap_or(1);
        if vp_per_loc == 0 {
            return Err(FutureInitError::ZeroCap);
        }

        let shepherd_count = builder
            .shepherd_count
            .unwrap_or_else(|| vc_os::thread::available_parallelism().get());

        let executors: Box<[Executor]> = (0..shepherd_count).map(|_| Executor::new()).collect();
        let locations: Box<[Arc<Location>]> = (0..shepherd_count)
            .map(|i| Arc::new(Location::new(ShepherdId(i), vp_per_loc)))
            .collect();

        let inner = Arc::new(Inner {
            locations,
            executors,
            global_cursor: Mutex::new(0),
            shepherd_count,
        });

        let (shutdown_tx, shutdown_rx) = async_channel::unbounded::<()>();
        let mut threads = Vec::with_capacity(shepherd_count);

        for i in 0..shepherd_count {
            let inner = Arc::clone(&inner);
            let shutdown_rx = shutdown_rx.clone();
            let name = match builder.thread_name.as_deref() {
                Some(prefix) => format!("{prefix} ({i})"),
                None => format!("qf-shepherd ({i})"),
            };

            let spawned = thread::Builder::new().name(name).spawn(move || {
                CURRENT_SHEPHERD.with(|cell| cell.set(Some(ShepherdId(i))));
                let executor = &inner.executors[i];
                let _ = crate::block_on(executor.run(shutdown_rx.recv()));
            });

            match spawned {
                Ok(handle) => threads.push(handle),
                Err(_) => {
                    warn!("future_init: failed to spawn shepherd thread {i}");
                    shutdown_tx.close();
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(FutureInitError::ShepherdSpawnFailed { shepherd: ShepherdId(i) });
                }
            }
        }

        Ok(Self {
            inner,
            shutdown_tx,
            threads: threads.into_boxed_slice(),
        })
    }

    /// Returns the number of shepherd threads this runtime was built with.
    #[inline]
    pub fn shepherd_count(&self) -> usize {
        self.inner.shepherd_count
    }

    /// Spawns `future` on a specific shepherd, without admission control.
    pub fn spawn_on<F>(&self, shepherd: ShepherdId, future: F) -> Task<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.executors[shepherd.index()].spawn(future)
    }

    /// Admits a slot on `shepherd`, then spawns `f(handle)` there as a
    /// future-flagged task.
    pub async fn spawn_future_on<F, Fut, T>(&self, shepherd: ShepherdId, f: F) -> Task<T>
    where
        F: FnOnce(TaskHandle) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        spawn_future_on(&self.inner, shepherd, f).await
    }

    /// Forks a new future-flagged task, placed by the placement policy:
    /// local round-robin cursor if the calling OS thread happens to be a
    /// shepherd, global mutex-guarded cursor otherwise (the common case for
    /// this method, since it is normally called from outside the runtime --
    /// e.g. the thread driving `main`, or a test).
    ///
    /// Futures forking further futures should prefer
    /// [`TaskHandle::future_fork`](crate::task::TaskHandle::future_fork),
    /// which is equivalent but also surfaces
    /// [`ForkError::RuntimeNotInitialized`](crate::error::ForkError) if the
    /// runtime has since been torn down.
    pub async fn future_fork<F, Fut, T>(&self, f: F) -> Task<T>
    where
        F: FnOnce(TaskHandle) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let shepherd = self.inner.choose_target();
        spawn_future_on(&self.inner, shepherd, f).await
    }
}

impl Drop for FutureRuntime {
    fn drop(&mut self) {
        self.shutdown_tx.close();

        let threads = mem::replace(&mut self.threads, Box::new([]));
        for handle in threads {
            handle.join().ok();
        }
    }
}

/// Joins a single forked task. Pure delegation to `Task<T>::await`, the
/// crate's "read-when-full" (§6.2).
pub async fn future_join<T>(task: Task<T>) -> T {
    task.await
}

/// Joins every task in `tasks`, in order. Completion order among the tasks
/// themselves is irrelevant to correctness (§4.F).
pub async fn future_join_all<T>(tasks: Vec<Task<T>>) -> Vec<T> {
    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        results.push(task.await);
    }
    results
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    use vc_os::sync::Mutex;

    use crate::error::ForkError;

    use super::*;

    #[test]
    fn init_rejects_a_zero_cap() {
        assert!(matches!(FutureRuntime::init(0), Err(FutureInitError::ZeroCap)));
    }

    #[test]
    fn shepherd_count_matches_the_builder() {
        let rt = FutureRuntimeBuilder::new().shepherd_count(3).vp_per_loc(1).build().unwrap();
        assert_eq!(rt.shepherd_count(), 3);
    }

    #[test]
    fn a_single_shepherd_with_cap_one_never_runs_two_futures_at_once() {
        let rt = FutureRuntimeBuilder::new().shepherd_count(1).vp_per_loc(1).build().unwrap();
        let concurrent = std::sync::Arc::new(AtomicUsize::new(0));
        let max_seen = std::sync::Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let concurrent = std::sync::Arc::clone(&concurrent);
            let max_seen = std::sync::Arc::clone(&max_seen);
            let task = crate::block_on(rt.future_fork(move |handle| async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                concurrent.fetch_sub(1, Ordering::SeqCst);
                handle.future_exit();
            }));
            tasks.push(task);
        }

        crate::block_on(future_join_all(tasks));
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forking_places_tasks_round_robin_across_shepherds() {
        let rt = FutureRuntimeBuilder::new().shepherd_count(2).vp_per_loc(2).build().unwrap();
        let placements = std::sync::Arc::new(Mutex::new(vec![None; 8]));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let placements = std::sync::Arc::clone(&placements);
            let task = crate::block_on(rt.future_fork(move |handle| async move {
                placements.lock().unwrap()[i] = Some(handle.shepherd().index());
                handle.future_yield();
                handle.future_acquire().await;
            }));
            tasks.push(task);
        }

        crate::block_on(future_join_all(tasks));

        let placements: Vec<_> = placements.lock().unwrap().iter().map(|p| p.unwrap()).collect();
        assert_eq!(placements, vec![0, 1, 0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn waiters_are_admitted_one_by_one_as_holders_release() {
        let rt = std::sync::Arc::new(FutureRuntimeBuilder::new().shepherd_count(1).vp_per_loc(2).build().unwrap());

        let concurrent = std::sync::Arc::new(AtomicUsize::new(0));
        let max_seen = std::sync::Arc::new(AtomicUsize::new(0));
        let (exit_tx, exit_rx) = async_channel::unbounded::<()>();

        // Two holders take both slots and wait to be told to leave.
        let mut holders = Vec::new();
        for _ in 0..2 {
            let exit_rx = exit_rx.clone();
            let concurrent = std::sync::Arc::clone(&concurrent);
            let max_seen = std::sync::Arc::clone(&max_seen);
            let task = crate::block_on(rt.future_fork(move |handle| async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                exit_rx.recv().await.ok();
                concurrent.fetch_sub(1, Ordering::SeqCst);
                handle.future_exit();
            }));
            holders.push(task);
        }

        // Four more forks must block in admission: both slots are held.
        let (admitted_tx, admitted_rx) = mpsc::channel::<()>();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let rt = std::sync::Arc::clone(&rt);
                let admitted_tx = admitted_tx.clone();
                let concurrent = std::sync::Arc::clone(&concurrent);
                let max_seen = std::sync::Arc::clone(&max_seen);
                thread::spawn(move || {
                    let task = crate::block_on(rt.future_fork(move |handle| async move {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                        handle.future_exit();
                    }));
                    admitted_tx.send(()).unwrap();
                    crate::block_on(future_join(task));
                })
            })
            .collect();
        drop(admitted_tx);

        assert!(admitted_rx.recv_timeout(Duration::from_millis(50)).is_err());

        // Release both holders; the cascade admits and immediately retires
        // each waiter in turn, eventually draining all four.
        for _ in 0..2 {
            exit_tx.try_send(()).unwrap();
        }

        for _ in 0..4 {
            admitted_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }
        crate::block_on(future_join_all(holders));

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn an_extra_fork_past_capacity_blocks_until_a_release() {
        const SHEPHERDS: usize = 2;
        const CAP: usize = 2;

        let rt = std::sync::Arc::new(
            FutureRuntimeBuilder::new()
                .shepherd_count(SHEPHERDS)
                .vp_per_loc(CAP)
                .build()
                .unwrap(),
        );

        // One dedicated channel per parked task: round-robin placement puts
        // fork call `i` on shepherd `i % SHEPHERDS`, so releasing a specific
        // channel deterministically frees a specific shepherd, instead of
        // leaving which task wakes to chance (as a single shared channel
        // would).
        let mut parkers = Vec::new();
        let mut tasks = Vec::new();
        for _ in 0..(SHEPHERDS * CAP) {
            let (park_tx, park_rx) = async_channel::bounded::<()>(1);
            let task = crate::block_on(rt.future_fork(move |handle| async move {
                park_rx.recv().await.ok();
                handle.future_exit();
            }));
            parkers.push(park_tx);
            tasks.push(task);
        }

        let rt2 = std::sync::Arc::clone(&rt);
        let (extra_admitted_tx, extra_admitted_rx) = mpsc::channel::<()>();
        let extra = thread::spawn(move || {
            let task = crate::block_on(rt2.future_fork(move |handle| async move {
                handle.future_exit();
            }));
            extra_admitted_tx.send(()).unwrap();
            crate::block_on(future_join(task));
        });

        // Every slot is held; the extra fork must not be admitted yet.
        assert!(extra_admitted_rx.recv_timeout(Duration::from_millis(100)).is_err());

        // The extra fork round-robins onto shepherd 0 (fork calls 0 and 2
        // above were also placed there); releasing one of those two is the
        // only release that can admit it.
        parkers[0].try_send(()).unwrap();
        extra_admitted_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        extra.join().unwrap();

        for park_tx in parkers.into_iter().skip(1) {
            park_tx.try_send(()).unwrap();
        }
        crate::block_on(future_join_all(tasks));
    }

    #[test]
    fn forking_after_the_runtime_is_dropped_fails() {
        let rt = FutureRuntimeBuilder::new().shepherd_count(1).vp_per_loc(1).build().unwrap();
        let handle = crate::block_on(rt.future_fork(|handle| async move { handle }));
        let handle = crate::block_on(future_join(handle));

        drop(rt);

        let result = crate::block_on(handle.future_fork(|_h| async {}));
        assert!(matches!(result, Err(ForkError::RuntimeNotInitialized)));
    }
}
