//! Runtime abstractions shared by the dispatch paths.
//!
//! CPU execution is implemented in-crate by [`crate::exec`]. GPU execution is
//! an external collaborator behind [`gpu::KernelLauncher`].

pub mod device;
pub mod gpu;
pub mod types;

pub use device::{DeviceDescription, WARP_SIZE};
pub use gpu::{DeviceAddress, KernelLauncher};
pub use types::{RunOptions, RuntimeError};
