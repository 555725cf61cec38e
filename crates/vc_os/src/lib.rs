//! Low-level OS-facing primitives: synchronization, threads, time, and
//! lock-free/spin-based utility structures.
//!
//! This crate targets hosted (`std`) environments only. Shepherds in this
//! workspace are OS threads, so the no_std/wasm portability layer the
//! original crate offered has no consumer here and was dropped.

extern crate alloc;
extern crate std;

// -----------------------------------------------------------------------------
// Modules

pub mod sync;
pub mod thread;
pub mod time;
pub mod utils;
