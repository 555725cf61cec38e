//! Facade crate re-exporting the OS-level primitives and the futures
//! admission-control runtime as a single dependency.

pub use qf_future as future;
pub use vc_os as os;
