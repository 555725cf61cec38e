//! Temporal quantification.
//!
//! Re-exports the standard library's `time` contents.
//!
//! See the [standard library](https://doc.rust-lang.org/std/time) for further details.

pub use core::time::{Duration, TryFromFloatSecsError};
pub use std::time::{Instant, SystemTime, SystemTimeError};
