//! Thread utilities.
//!
//! Re-exports [`std::thread::sleep`] and provides a parallelism estimate that
//! never reports zero.

pub use std::thread::sleep;

// -----------------------------------------------------------------------------
// available_parallelism

use core::num::NonZero;

/// Returns an estimate of the default amount of parallelism a program should use.
///
/// Like [`std::thread::available_parallelism`], but falls back to `1` instead
/// of propagating an error.
///
/// We ensure that `result > 0`.
pub fn available_parallelism() -> NonZero<usize> {
    #[expect(unsafe_code, reason = "`1` is non-zero")]
    std::thread::available_parallelism().unwrap_or(unsafe { NonZero::new_unchecked(1) })
}
