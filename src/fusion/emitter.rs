// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Emitter selection.
//!
//! The backend kind tag of a fusion picks exactly one [`FusionEmitter`]. Tiled
//! kernels plan their launch when the emitter is built; library calls defer to
//! the CPU dispatcher at execution time.

use tracing::debug;

use super::analysis::FusionAnalysis;
use super::kind::{FusionKind, UnknownFusionKind};
use super::launch::{LaunchConfig, LaunchError, LaunchPlanner};
use crate::exec::{dispatch_matmul, DispatchError};
use crate::memref::BufferDescriptor;
use crate::runtime::{DeviceAddress, KernelLauncher, RunOptions, RuntimeError};

#[derive(Debug, thiserror::Error)]
pub enum EmitterError {
    #[error(transparent)]
    UnknownKind(#[from] UnknownFusionKind),
    #[error("fusion '{name}': {source}")]
    Launch {
        name: String,
        #[source]
        source: LaunchError,
    },
    #[error("kernel launch failed: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Custom kernel sized by block-level tiling.
#[derive(Debug, Clone)]
pub struct TiledKernelFusion {
    analysis: FusionAnalysis,
    launch_config: Option<LaunchConfig>,
}

impl TiledKernelFusion {
    pub fn new(analysis: FusionAnalysis) -> Result<Self, EmitterError> {
        let launch_config = match &analysis.block_level {
            Some(params) => Some(
                LaunchPlanner::new(&analysis.device)
                    .plan(params, &analysis.output_dims)
                    .map_err(|source| EmitterError::Launch {
                        name: analysis.name.clone(),
                        source,
                    })?,
            ),
            None => None,
        };
        Ok(Self {
            analysis,
            launch_config,
        })
    }

    pub fn analysis(&self) -> &FusionAnalysis {
        &self.analysis
    }

    /// `None` when the fusion carries no block-level tiling.
    pub fn launch_config(&self) -> Option<LaunchConfig> {
        self.launch_config.clone()
    }

    /// Launch the generated kernel, named after the fusion, with the planned
    /// geometry.
    pub fn launch(
        &self,
        launcher: &dyn KernelLauncher,
        args: &[DeviceAddress],
    ) -> Result<(), EmitterError> {
        let config = self
            .launch_config
            .as_ref()
            .ok_or_else(|| EmitterError::Launch {
                name: self.analysis.name.clone(),
                source: LaunchError::MissingBlockLevelConfig,
            })?;
        debug!(
            fusion = %self.analysis.name,
            dims = %config.launch_dimensions,
            args = args.len(),
            "launching tiled kernel"
        );
        launcher.launch(&self.analysis.name, &config.launch_dimensions, args)?;
        Ok(())
    }
}

/// Fusion realized by the library matmul primitive.
#[derive(Debug, Clone)]
pub struct LibraryCallFusion {
    analysis: FusionAnalysis,
}

impl LibraryCallFusion {
    pub fn new(analysis: FusionAnalysis) -> Self {
        Self { analysis }
    }

    pub fn analysis(&self) -> &FusionAnalysis {
        &self.analysis
    }

    pub fn execute(
        &self,
        run_options: &RunOptions<'_>,
        lhs: &BufferDescriptor<'_>,
        rhs: &BufferDescriptor<'_>,
        result: &BufferDescriptor<'_>,
        config: &[u8],
    ) -> Result<(), DispatchError> {
        debug!(fusion = %self.analysis.name, "delegating to library matmul");
        dispatch_matmul(run_options, lhs, rhs, result, config)
    }
}

#[derive(Debug, Clone)]
pub enum FusionEmitter {
    TiledKernel(TiledKernelFusion),
    LibraryCall(LibraryCallFusion),
}

impl FusionEmitter {
    pub fn kind(&self) -> FusionKind {
        match self {
            FusionEmitter::TiledKernel(_) => FusionKind::TiledKernel,
            FusionEmitter::LibraryCall(_) => FusionKind::LibraryCall,
        }
    }

    pub fn analysis(&self) -> &FusionAnalysis {
        match self {
            FusionEmitter::TiledKernel(e) => e.analysis(),
            FusionEmitter::LibraryCall(e) => e.analysis(),
        }
    }

    /// Launch configuration of the emitter. Library calls never have one.
    pub fn launch_config(&self) -> Option<LaunchConfig> {
        match self {
            FusionEmitter::TiledKernel(e) => e.launch_config(),
            FusionEmitter::LibraryCall(_) => None,
        }
    }

    pub fn as_tiled_kernel(&self) -> Option<&TiledKernelFusion> {
        match self {
            FusionEmitter::TiledKernel(e) => Some(e),
            FusionEmitter::LibraryCall(_) => None,
        }
    }

    pub fn as_library_call(&self) -> Option<&LibraryCallFusion> {
        match self {
            FusionEmitter::LibraryCall(e) => Some(e),
            FusionEmitter::TiledKernel(_) => None,
        }
    }
}

/// Pick the emitter for `analysis` by exact match on its kind tag.
pub fn select_emitter(analysis: &FusionAnalysis) -> Result<FusionEmitter, EmitterError> {
    let kind: FusionKind = analysis.kind.parse()?;
    debug!(fusion = %analysis.name, %kind, "selected emitter");
    Ok(match kind {
        FusionKind::TiledKernel => {
            FusionEmitter::TiledKernel(TiledKernelFusion::new(analysis.clone())?)
        }
        FusionKind::LibraryCall => {
            FusionEmitter::LibraryCall(LibraryCallFusion::new(analysis.clone()))
        }
    })
}
