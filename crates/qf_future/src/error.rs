//! Error types for the futures admission-control layer.
//!
//! Grounded on `vc_ecs::entity::error`: one `#[non_exhaustive]` enum per
//! failure family, composed into a top-level enum by the same hand-written
//! `impl_from!`-style macro, giving bidirectional `From` conversions plus a
//! `promote`/`handle_error` pair on every leaf type.

use thiserror::Error;

use crate::shepherd::ShepherdId;

/// Failures that can occur while building a [`FutureRuntime`](crate::runtime::FutureRuntime).
#[derive(Debug, Error, Clone, Copy)]
#[non_exhaustive]
pub enum FutureInitError {
    /// `vp_per_loc` was zero; admission on every shepherd would stall forever.
    #[error("vp_per_loc must be at least 1, got 0")]
    ZeroCap,
    /// The OS refused to spawn a shepherd thread.
    #[error("failed to spawn shepherd thread {shepherd}")]
    ShepherdSpawnFailed {
        /// The shepherd whose thread failed to start.
        shepherd: ShepherdId,
    },
}

/// Failures that can occur while forking a new future-flagged task.
#[derive(Debug, Error, Clone, Copy)]
#[non_exhaustive]
pub enum ForkError {
    /// The `FutureRuntime` this [`TaskHandle`](crate::task::TaskHandle) was
    /// spawned from has already been torn down.
    #[error("future_fork called after its runtime was torn down")]
    RuntimeNotInitialized,
}

/// Composite error wrapping every failure family this crate can produce.
#[derive(Debug, Error, Clone, Copy)]
#[non_exhaustive]
pub enum FutureError {
    #[error("Runtime initialization failed: {0}")]
    Init(FutureInitError),

    #[error("Fork failed: {0}")]
    Fork(ForkError),
}

impl FutureError {
    /// Panics with this error's `Display` message.
    #[cold]
    #[inline(never)]
    pub fn handle_error(&self) -> ! {
        panic!("{self}");
    }
}

macro_rules! impl_from {
    ($name:ident, $variant:ident) => {
        impl From<FutureError> for $name {
            #[inline]
            fn from(value: FutureError) -> Self {
                if let FutureError::$variant(ret) = value {
                    ret
                } else {
                    value.handle_error();
                }
            }
        }

        impl From<$name> for FutureError {
            #[inline]
            fn from(value: $name) -> Self {
                FutureError::$variant(value)
            }
        }

        impl $name {
            /// Panics with this error's `Display` message.
            #[cold]
            #[inline(never)]
            pub fn handle_error(&self) -> ! {
                panic!("{self}");
            }

            /// Wraps this error in the composite [`FutureError`].
            #[inline]
            pub fn promote(self) -> FutureError {
                FutureError::$variant(self)
            }
        }
    };
}

impl_from!(FutureInitError, Init);
impl_from!(ForkError, Fork);
