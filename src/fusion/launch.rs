// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the "License").

//! Launch geometry for tiled kernels.
//!
//! Each output dimension `D_i` is covered by tiles of `T_i` elements, one
//! thread block per tile, so the grid has `prod_i ceil(D_i / T_i)` blocks. A
//! block runs `num_warps` warps. Every input is validated before any division.

use std::fmt;
use std::num::NonZeroU64;

use serde::Serialize;
use tracing::debug;

use crate::config::BlockLevelFusionConfig;
use crate::runtime::DeviceDescription;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    #[error("fusion has no block-level tiling config")]
    MissingBlockLevelConfig,
    #[error("tile size {value} on axis {axis} is not positive")]
    NonPositiveTileSize { axis: usize, value: i64 },
    #[error("empty tile size list")]
    EmptyTileSizes,
    #[error("{tiles} tile sizes for an output of rank {rank}")]
    TileRankMismatch { tiles: usize, rank: usize },
    #[error("warp count {0} is not positive")]
    NonPositiveWarpCount(i64),
    #[error("{name} hint {value} is negative")]
    NegativeHint { name: &'static str, value: i64 },
    #[error("{threads} threads per block exceed the device limit of {max}")]
    TooManyThreads { threads: u128, max: u64 },
    #[error("{blocks} blocks exceed the device limit of {max}")]
    TooManyBlocks { blocks: u128, max: u64 },
    #[error("output axis {axis} has size zero")]
    ZeroSizeDimension { axis: usize },
}

/// Validated block-level tiling of one fusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockLevelParameters {
    pub output_tile_sizes: Vec<u64>,
    pub num_warps: u64,
    /// Cluster size hint for code generation; does not affect geometry.
    pub num_ctas: u64,
    /// Pipelining depth hint for code generation; does not affect geometry.
    pub num_stages: u64,
}

impl BlockLevelParameters {
    pub fn new(output_tile_sizes: Vec<u64>, num_warps: u64) -> Self {
        Self {
            output_tile_sizes,
            num_warps,
            num_ctas: 1,
            num_stages: 1,
        }
    }

    /// Validate the raw payload. Unset (zero) `num_ctas`/`num_stages` become 1.
    pub fn from_config(config: &BlockLevelFusionConfig) -> Result<Self, LaunchError> {
        let output_tile_sizes = config
            .output_tile_sizes
            .iter()
            .enumerate()
            .map(|(axis, &value)| {
                if value > 0 {
                    Ok(value as u64)
                } else {
                    Err(LaunchError::NonPositiveTileSize { axis, value })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        if config.num_warps <= 0 {
            return Err(LaunchError::NonPositiveWarpCount(config.num_warps));
        }
        Ok(Self {
            output_tile_sizes,
            num_warps: config.num_warps as u64,
            num_ctas: hint("num_ctas", config.num_ctas)?,
            num_stages: hint("num_stages", config.num_stages)?,
        })
    }
}

fn hint(name: &'static str, value: i64) -> Result<u64, LaunchError> {
    match value {
        0 => Ok(1),
        v if v > 0 => Ok(v as u64),
        v => Err(LaunchError::NegativeHint { name, value: v }),
    }
}

/// Grid and block sizes of one kernel launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchDimensions {
    /// Blocks along each output axis.
    pub block_counts: Vec<u64>,
    pub threads_per_block: u64,
}

impl LaunchDimensions {
    pub fn num_blocks(&self) -> u64 {
        self.block_counts.iter().product()
    }

    pub fn num_threads_per_block(&self) -> u64 {
        self.threads_per_block
    }
}

impl fmt::Display for LaunchDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blocks: {} (", self.num_blocks())?;
        for (i, count) in self.block_counts.iter().enumerate() {
            if i > 0 {
                f.write_str("x")?;
            }
            write!(f, "{count}")?;
        }
        write!(f, "), threads/block: {}", self.threads_per_block)
    }
}

/// Launch dimensions together with the tiling they were derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchConfig {
    pub launch_dimensions: LaunchDimensions,
    pub block_level_parameters: BlockLevelParameters,
}

/// Blocks needed to cover `dim` elements with tiles of `tile`.
pub fn blocks_along(dim: u64, tile: NonZeroU64) -> u64 {
    dim.div_ceil(tile.get())
}

/// Threads in a block of `num_warps` warps, or `None` on overflow.
pub fn threads_per_block(num_warps: u64, warp_size: u64) -> Option<u64> {
    num_warps.checked_mul(warp_size)
}

/// Sizes launches against one device's limits.
#[derive(Debug, Clone, Copy)]
pub struct LaunchPlanner<'d> {
    device: &'d DeviceDescription,
}

impl<'d> LaunchPlanner<'d> {
    pub fn new(device: &'d DeviceDescription) -> Self {
        Self { device }
    }

    pub fn plan(
        &self,
        params: &BlockLevelParameters,
        output_dims: &[u64],
    ) -> Result<LaunchConfig, LaunchError> {
        let tiles = &params.output_tile_sizes;
        if tiles.is_empty() {
            return Err(LaunchError::EmptyTileSizes);
        }
        if tiles.len() != output_dims.len() {
            return Err(LaunchError::TileRankMismatch {
                tiles: tiles.len(),
                rank: output_dims.len(),
            });
        }
        let tiles = tiles
            .iter()
            .enumerate()
            .map(|(axis, &t)| {
                NonZeroU64::new(t).ok_or(LaunchError::NonPositiveTileSize { axis, value: 0 })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(axis) = output_dims.iter().position(|&d| d == 0) {
            return Err(LaunchError::ZeroSizeDimension { axis });
        }
        if params.num_warps == 0 {
            return Err(LaunchError::NonPositiveWarpCount(0));
        }

        let max_threads = self.device.max_threads_per_block;
        let threads = threads_per_block(params.num_warps, self.device.threads_per_warp)
            .filter(|&t| t <= max_threads)
            .ok_or(LaunchError::TooManyThreads {
                threads: params.num_warps as u128 * self.device.threads_per_warp as u128,
                max: max_threads,
            })?;

        let block_counts: Vec<u64> = output_dims
            .iter()
            .zip(&tiles)
            .map(|(&dim, &tile)| blocks_along(dim, tile))
            .collect();
        let total: u128 = block_counts.iter().map(|&c| c as u128).product();
        if total > self.device.max_blocks as u128 {
            return Err(LaunchError::TooManyBlocks {
                blocks: total,
                max: self.device.max_blocks,
            });
        }

        let launch_dimensions = LaunchDimensions {
            block_counts,
            threads_per_block: threads,
        };
        debug!(
            device = %self.device.name,
            dims = ?output_dims,
            tiles = ?params.output_tile_sizes,
            num_blocks = launch_dimensions.num_blocks(),
            threads_per_block = threads,
            "planned tiled launch"
        );
        Ok(LaunchConfig {
            launch_dimensions,
            block_level_parameters: params.clone(),
        })
    }
}
