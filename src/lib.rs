//! kdispatch: backend kernel dispatch for fused tensor computations.
//!
//! Two paths share one shape, config in and executable call out:
//!
//! * CPU: [`exec::dispatch_matmul`] binds raw operand buffers to the matmul
//!   primitive and runs it on a borrowed intra-op thread pool.
//! * GPU: [`pipeline::plan_fusion`] selects the emitter for a fusion's backend
//!   kind and plans the tiled kernel launch.
pub mod config;
pub mod exec;
pub mod fusion;
pub mod memref;
pub mod pipeline;
pub mod runtime;
pub mod types;

pub use config::{GpuBackendConfig, MatmulConfig, Settings};
pub use exec::{dispatch_matmul, kd_cpu_runtime_matmul, DispatchError};
pub use fusion::{
    select_emitter, FusionEmitter, FusionKind, FusionNode, LaunchConfig, LaunchDimensions,
    LaunchPlanner,
};
pub use memref::{BufferDescriptor, MemrefHandle};
pub use pipeline::{plan_fusion, FusionPlan, PipelineError};
pub use runtime::{DeviceDescription, RunOptions};
pub use types::{DType, TensorType};
