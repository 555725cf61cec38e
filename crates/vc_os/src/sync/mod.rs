//! Useful synchronization primitives.
//!
//! This module re-exports the standard library's `sync` contents directly;
//! the crate targets hosted environments only, so no fallback path exists.
//!
//! See the [standard library] for further details.
//!
//! [standard library]: https://doc.rust-lang.org/std/sync/index.html

// -----------------------------------------------------------------------------
// Modules

mod sync_cell;

pub mod atomic;

// -----------------------------------------------------------------------------
// Exports

pub use alloc::sync::{Arc, Weak};
pub use std::sync::{
    Barrier, BarrierWaitResult, Condvar, LazyLock, LockResult, Mutex, MutexGuard, Once, OnceLock,
    OnceState, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
    TryLockResult, WaitTimeoutResult, mpsc,
};
pub use sync_cell::SyncCell;
