//! Per-fusion facts the emitter selector works from.

use tracing::trace;

use super::kind::FusionKind;
use super::launch::{BlockLevelParameters, LaunchError};
use crate::config::{BackendConfigError, GpuBackendConfig};
use crate::runtime::DeviceDescription;
use crate::types::{DType, TensorType};

/// A fused computation as handed over by the fusion pass: its root output type
/// and the backend config text attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionNode {
    pub name: String,
    pub output: TensorType,
    pub backend_config: String,
}

impl FusionNode {
    pub fn new(name: impl Into<String>, output: TensorType, backend_config: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output,
            backend_config: backend_config.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    #[error("fusion '{name}': {source}")]
    BackendConfig {
        name: String,
        #[source]
        source: BackendConfigError,
    },
    #[error("fusion '{name}' carries no fusion backend config")]
    MissingBackendConfig { name: String },
    #[error("fusion '{name}' has non-static output type {output}")]
    DynamicShape { name: String, output: TensorType },
    #[error("fusion '{name}': invalid block-level config: {source}")]
    InvalidBlockLevel {
        name: String,
        #[source]
        source: LaunchError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionAnalysis {
    pub name: String,
    /// Backend kind tag exactly as written in the config.
    pub kind: String,
    pub output_dims: Vec<u64>,
    pub dtype: DType,
    /// Validated tiling. Only kept for kinds that plan a launch.
    pub block_level: Option<BlockLevelParameters>,
    pub device: DeviceDescription,
}

pub fn analyze_fusion(
    node: &FusionNode,
    device: &DeviceDescription,
) -> Result<FusionAnalysis, FusionError> {
    let config = GpuBackendConfig::from_json(&node.backend_config).map_err(|source| {
        FusionError::BackendConfig {
            name: node.name.clone(),
            source,
        }
    })?;
    let fusion = config
        .fusion_backend_config
        .ok_or_else(|| FusionError::MissingBackendConfig {
            name: node.name.clone(),
        })?;
    let output_dims = node
        .output
        .static_dims()
        .ok_or_else(|| FusionError::DynamicShape {
            name: node.name.clone(),
            output: node.output.clone(),
        })?;
    let plans_launch = fusion
        .kind
        .parse::<FusionKind>()
        .is_ok_and(|kind| kind.supports_launch_config());
    let block_level = fusion
        .block_level_fusion_config
        .as_ref()
        .filter(|_| plans_launch)
        .map(BlockLevelParameters::from_config)
        .transpose()
        .map_err(|source| FusionError::InvalidBlockLevel {
            name: node.name.clone(),
            source,
        })?;

    trace!(
        fusion = %node.name,
        kind = %fusion.kind,
        output = %node.output,
        tiled = block_level.is_some(),
        "analyzed fusion"
    );
    Ok(FusionAnalysis {
        name: node.name.clone(),
        kind: fusion.kind,
        output_dims,
        dtype: node.output.dtype,
        block_level,
        device: device.clone(),
    })
}
