// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the "License").

//! GPU-class path: fusion analysis, emitter selection and launch planning.

pub mod analysis;
pub mod emitter;
pub mod kind;
pub mod launch;

pub use analysis::{analyze_fusion, FusionAnalysis, FusionError, FusionNode};
pub use emitter::{
    select_emitter, EmitterError, FusionEmitter, LibraryCallFusion, TiledKernelFusion,
};
pub use kind::{FusionKind, UnknownFusionKind, LIBRARY_CALL_KIND, TILED_KERNEL_KIND};
pub use launch::{
    blocks_along, threads_per_block, BlockLevelParameters, LaunchConfig, LaunchDimensions,
    LaunchError, LaunchPlanner,
};
