//! Configuration inputs: the serialized matmul config consumed by the CPU
//! dispatcher, the JSON backend config attached to fusion nodes, and the
//! on-disk dispatcher settings.

pub mod backend;
pub mod matmul;
pub mod settings;
mod varint;

pub use backend::{BackendConfigError, BlockLevelFusionConfig, FusionBackendConfig, GpuBackendConfig};
pub use matmul::{FusedOp, MatmulConfig, MatmulConfigError};
pub use settings::{find_settings_file, Settings, SETTINGS_FILE_NAME};
pub use varint::VarintError;
