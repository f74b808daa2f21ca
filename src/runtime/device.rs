// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the "License").

//! Hardware limits of a launch target.
//!
//! The launch planner never assumes a fixed per-block thread ceiling; it reads
//! the limits from a [`DeviceDescription`], either one of the presets below or
//! one loaded from settings.

use serde::{Deserialize, Serialize};

/// Lanes per warp on every architecture the planner targets.
pub const WARP_SIZE: u64 = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub name: String,
    pub threads_per_warp: u64,
    pub max_threads_per_block: u64,
    /// Upper bound on the total number of blocks in one launch.
    pub max_blocks: u64,
    pub multiprocessor_count: u32,
}

impl DeviceDescription {
    /// NVIDIA RTX A6000 (Ampere, 84 SMs).
    pub fn rtx_a6000() -> Self {
        Self {
            name: "rtx-a6000".to_string(),
            threads_per_warp: WARP_SIZE,
            max_threads_per_block: 1024,
            max_blocks: (1 << 31) - 1,
            multiprocessor_count: 84,
        }
    }

    /// NVIDIA A100 SXM (Ampere, 108 SMs).
    pub fn a100() -> Self {
        Self {
            name: "a100".to_string(),
            multiprocessor_count: 108,
            ..Self::rtx_a6000()
        }
    }

    /// NVIDIA H100 SXM (Hopper, 132 SMs).
    pub fn h100() -> Self {
        Self {
            name: "h100".to_string(),
            multiprocessor_count: 132,
            ..Self::rtx_a6000()
        }
    }

    /// Look up a preset by name (case-insensitive).
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rtx-a6000" | "a6000" => Some(Self::rtx_a6000()),
            "a100" => Some(Self::a100()),
            "h100" => Some(Self::h100()),
            _ => None,
        }
    }

    pub fn preset_names() -> &'static [&'static str] {
        &["rtx-a6000", "a100", "h100"]
    }
}

impl Default for DeviceDescription {
    fn default() -> Self {
        Self::rtx_a6000()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_resolve_by_name() {
        for name in DeviceDescription::preset_names() {
            let device = DeviceDescription::preset(name).expect("preset");
            assert_eq!(&device.name, name);
            assert_eq!(device.threads_per_warp, WARP_SIZE);
        }
        assert_eq!(DeviceDescription::preset("A6000"), Some(DeviceDescription::rtx_a6000()));
        assert!(DeviceDescription::preset("tpu").is_none());
    }
}
