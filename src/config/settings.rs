// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0

//! Dispatcher settings read from `Kdispatch.toml`.
//!
//! ```toml
//! [device]
//! preset = "rtx-a6000"
//! max_threads_per_block = 1024
//!
//! [cpu]
//! intra_op_threads = 8
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::runtime::DeviceDescription;

pub const SETTINGS_FILE_NAME: &str = "Kdispatch.toml";

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub cpu: CpuSettings,
}

/// Launch target limits. A `preset` supplies defaults; explicit fields win.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeviceSettings {
    pub preset: Option<String>,
    pub name: Option<String>,
    pub threads_per_warp: Option<u64>,
    pub max_threads_per_block: Option<u64>,
    pub max_blocks: Option<u64>,
    pub multiprocessor_count: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CpuSettings {
    /// Worker count for the intra-op pool; 0 lets rayon decide.
    #[serde(default)]
    pub intra_op_threads: usize,
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load the nearest `Kdispatch.toml` at or above `start`, if any.
    pub fn discover(start: &Path) -> Result<Option<(PathBuf, Self)>> {
        match find_settings_file(start) {
            Some(path) => {
                let settings = Self::load(&path)?;
                Ok(Some((path, settings)))
            }
            None => Ok(None),
        }
    }

    /// Resolve the device section into concrete launch limits.
    pub fn device_description(&self) -> Result<DeviceDescription> {
        let dev = &self.device;
        let mut desc = match dev.preset.as_deref() {
            Some(name) => DeviceDescription::preset(name).ok_or_else(|| {
                anyhow!(
                    "unknown device preset '{name}' (expected one of {})",
                    DeviceDescription::preset_names().join("|")
                )
            })?,
            None => DeviceDescription::default(),
        };
        if let Some(name) = &dev.name {
            desc.name = name.clone();
        }
        if let Some(v) = dev.threads_per_warp {
            desc.threads_per_warp = v;
        }
        if let Some(v) = dev.max_threads_per_block {
            desc.max_threads_per_block = v;
        }
        if let Some(v) = dev.max_blocks {
            desc.max_blocks = v;
        }
        if let Some(v) = dev.multiprocessor_count {
            desc.multiprocessor_count = v;
        }

        if desc.threads_per_warp == 0 {
            bail!("device.threads_per_warp must be positive");
        }
        if desc.max_threads_per_block < desc.threads_per_warp {
            bail!(
                "device.max_threads_per_block ({}) is smaller than one warp ({})",
                desc.max_threads_per_block,
                desc.threads_per_warp
            );
        }
        if desc.max_blocks == 0 {
            bail!("device.max_blocks must be positive");
        }
        Ok(desc)
    }

    /// Build the intra-op pool described by the `[cpu]` section. The caller
    /// owns the pool and lends it to dispatch calls.
    pub fn build_thread_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.cpu.intra_op_threads)
            .thread_name(|i| format!("kdispatch-intra-op-{i}"))
            .build()
            .context("Failed to build intra-op thread pool")
    }
}

/// Walk from `start` towards the filesystem root looking for
/// [`SETTINGS_FILE_NAME`].
pub fn find_settings_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(SETTINGS_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}
