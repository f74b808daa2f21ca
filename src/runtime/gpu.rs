//! GPU launch contract.
//!
//! This crate plans launches but does not own a GPU runtime. A concrete
//! runtime implements [`KernelLauncher`] and is handed the planned geometry by
//! [`crate::fusion::TiledKernelFusion::launch`].

use crate::fusion::LaunchDimensions;
use crate::runtime::types::RuntimeError;

/// Opaque device pointer passed through to a kernel.
pub type DeviceAddress = u64;

/// Abstract contract for GPU kernel launchers.
///
/// A concrete implementation owns compiled kernels, streams and device memory.
pub trait KernelLauncher {
    /// Launch `kernel_name` with the given geometry over the argument buffers.
    fn launch(
        &self,
        kernel_name: &str,
        dims: &LaunchDimensions,
        args: &[DeviceAddress],
    ) -> Result<(), RuntimeError>;

    /// Wait until every launch issued so far has completed.
    fn synchronize(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}
