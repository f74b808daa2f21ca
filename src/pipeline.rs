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

//! High-level planning pipeline for one fusion.
//!
//! Analyze the fusion node, select its emitter and, for tiled kernels, plan
//! the launch. Nothing is cached: every call recomputes the plan from the
//! node and device it is given.

use crate::fusion::{
    self, EmitterError, FusionEmitter, FusionError, FusionKind, FusionNode, LaunchConfig,
};
use crate::runtime::DeviceDescription;

/// Artifacts produced by [`plan_fusion`].
#[derive(Debug, Clone)]
pub struct FusionPlan {
    pub emitter: FusionEmitter,
    /// Launch geometry; present only for tiled kernels with block-level tiling.
    pub launch_config: Option<LaunchConfig>,
}

impl FusionPlan {
    pub fn kind(&self) -> FusionKind {
        self.emitter.kind()
    }
}

/// Errors surfaced by the planning pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The fusion node could not be analyzed.
    #[error(transparent)]
    Analysis(#[from] FusionError),
    /// No emitter could be built for the analyzed fusion.
    #[error(transparent)]
    Emitter(#[from] EmitterError),
}

pub fn plan_fusion(
    node: &FusionNode,
    device: &DeviceDescription,
) -> Result<FusionPlan, PipelineError> {
    let analysis = fusion::analyze_fusion(node, device)?;
    let emitter = fusion::select_emitter(&analysis)?;
    let launch_config = emitter.launch_config();
    Ok(FusionPlan {
        emitter,
        launch_config,
    })
}
