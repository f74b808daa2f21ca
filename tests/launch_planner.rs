// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the "License").

use std::num::NonZeroU64;

use kdispatch::fusion::{
    blocks_along, threads_per_block, BlockLevelParameters, FusionNode, LaunchError, LaunchPlanner,
};
use kdispatch::pipeline::{plan_fusion, PipelineError};
use kdispatch::runtime::WARP_SIZE;
use kdispatch::types::{DType, TensorType};
use kdispatch::DeviceDescription;
use proptest::prelude::*;

fn triton_config(tiles: &[&str], warps: &str) -> String {
    let tiles: Vec<String> = tiles.iter().map(|t| format!("\"{t}\"")).collect();
    format!(
        r#"{{"fusion_backend_config":{{"kind":"__triton","block_level_fusion_config":{{"output_tile_sizes":[{}],"num_warps":"{warps}"}}}}}}"#,
        tiles.join(",")
    )
}

#[test]
fn reference_fusion_launches_42_blocks_of_128_threads() {
    let node = FusionNode::new(
        "triton_softmax",
        TensorType::with_dims(DType::F32, &[125, 127]),
        triton_config(&["3", "127"], "4"),
    );
    let plan = plan_fusion(&node, &DeviceDescription::rtx_a6000()).expect("plan");
    let config = plan.launch_config.expect("launch config");

    assert_eq!(config.launch_dimensions.num_blocks(), 42);
    assert_eq!(config.launch_dimensions.block_counts, vec![42, 1]);
    assert_eq!(config.launch_dimensions.num_threads_per_block(), 128);
    assert_eq!(config.block_level_parameters.output_tile_sizes, vec![3, 127]);
    assert_eq!(config.block_level_parameters.num_warps, 4);
}

#[test]
fn zero_tile_is_rejected_without_block_count() {
    let node = FusionNode::new(
        "triton_softmax",
        TensorType::with_dims(DType::F32, &[125, 127]),
        triton_config(&["0", "127"], "4"),
    );
    let err = plan_fusion(&node, &DeviceDescription::rtx_a6000()).unwrap_err();
    let PipelineError::Analysis(analysis_err) = &err else {
        panic!("expected an analysis error, got {err:?}");
    };
    assert!(
        analysis_err
            .to_string()
            .contains("tile size 0 on axis 0 is not positive"),
        "{analysis_err}"
    );
}

#[test]
fn negative_warps_are_rejected() {
    let node = FusionNode::new(
        "f",
        TensorType::with_dims(DType::F32, &[8]),
        triton_config(&["4"], "-2"),
    );
    let err = plan_fusion(&node, &DeviceDescription::default()).unwrap_err();
    assert!(err.to_string().contains("warp count -2"), "{err}");
}

#[test]
fn threads_ceiling_follows_device() {
    let small = DeviceDescription {
        max_threads_per_block: 256,
        ..DeviceDescription::default()
    };
    let planner = LaunchPlanner::new(&small);
    assert!(planner.plan(&BlockLevelParameters::new(vec![8], 8), &[64]).is_ok());
    assert_eq!(
        planner.plan(&BlockLevelParameters::new(vec![8], 9), &[64]),
        Err(LaunchError::TooManyThreads {
            threads: 288,
            max: 256
        })
    );
}

proptest! {
    #[test]
    fn blocks_cover_the_dimension(dim in 1u64..1_000_000, tile in 1u64..10_000) {
        let blocks = blocks_along(dim, NonZeroU64::new(tile).unwrap());
        prop_assert!(blocks * tile >= dim);
        prop_assert!((blocks - 1) * tile < dim);
    }

    #[test]
    fn tile_at_least_dim_is_one_block(dim in 1u64..100_000, extra in 0u64..100_000) {
        prop_assert_eq!(blocks_along(dim, NonZeroU64::new(dim + extra).unwrap()), 1);
    }

    #[test]
    fn threads_are_warp_multiples(warps in 1u64..=32) {
        prop_assert_eq!(threads_per_block(warps, WARP_SIZE), Some(32 * warps));
    }

    #[test]
    fn total_blocks_is_product_of_axes(
        dims in prop::collection::vec(1u64..128, 1..4),
        tile in 1u64..64,
    ) {
        let device = DeviceDescription::default();
        let params = BlockLevelParameters::new(vec![tile; dims.len()], 2);
        let config = LaunchPlanner::new(&device).plan(&params, &dims).unwrap();
        let expected: u64 = dims.iter().map(|d| d.div_ceil(tile)).product();
        prop_assert_eq!(config.launch_dimensions.num_blocks(), expected);
        prop_assert_eq!(config.launch_dimensions.num_threads_per_block(), 64);
    }

    #[test]
    fn planning_is_idempotent(d0 in 1u64..4096, d1 in 1u64..4096, t0 in 1u64..128, warps in 1u64..=16) {
        let device = DeviceDescription::default();
        let planner = LaunchPlanner::new(&device);
        let params = BlockLevelParameters::new(vec![t0, d1], warps);
        prop_assert_eq!(planner.plan(&params, &[d0, d1]), planner.plan(&params, &[d0, d1]));
    }
}
