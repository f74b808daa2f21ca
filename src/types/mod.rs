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

//! Element and tensor type definitions shared by both dispatch paths.
//!
//! # Example
//! ```
//! use kdispatch::types::{DType, ShapeDim, TensorType};
//! let ty = TensorType::new(DType::F32, vec![ShapeDim::Known(125), ShapeDim::Known(127)]);
//! assert_eq!(ty.static_dims(), Some(vec![125, 127]));
//! ```

use std::fmt;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

/// Element type of a buffer. The discriminants are part of the memref ABI.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    I32 = 0,
    F32 = 1,
    F16 = 2,
    BF16 = 3,
}

impl DType {
    /// Parse dtype from its canonical token (`f32`, `f16`, `bf16`, `i32`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "i32" => Some(Self::I32),
            "f32" => Some(Self::F32),
            "f16" => Some(Self::F16),
            "bf16" => Some(Self::BF16),
            _ => None,
        }
    }

    /// Decode the ABI discriminant used by [`crate::memref::MemrefDescriptor`].
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::I32),
            1 => Some(Self::F32),
            2 => Some(Self::F16),
            3 => Some(Self::BF16),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::I32 => "i32",
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::I32 | Self::F32 => 4,
            Self::F16 | Self::BF16 => 2,
        }
    }

    pub fn is_float(&self) -> bool {
        !matches!(self, Self::I32)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host element types the CPU primitive engine computes on.
///
/// All arithmetic is carried out in `f32`; narrower types are widened on load
/// and rounded on store.
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    fn to_f32(self) -> f32;
    fn from_f32(value: f32) -> Self;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }
}

impl Element for bf16 {
    const DTYPE: DType = DType::BF16;

    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        bf16::from_f32(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShapeDim {
    Known(usize),
    Sym(String),
}

impl fmt::Display for ShapeDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeDim::Known(n) => write!(f, "{n}"),
            ShapeDim::Sym(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorType {
    pub dtype: DType,
    pub shape: Vec<ShapeDim>,
}

impl TensorType {
    pub fn new(dtype: DType, shape: Vec<ShapeDim>) -> Self {
        Self { dtype, shape }
    }

    /// Shorthand for a fully static shape.
    pub fn with_dims(dtype: DType, dims: &[usize]) -> Self {
        Self::new(dtype, dims.iter().copied().map(ShapeDim::Known).collect())
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// The concrete dimension sizes, or `None` if any dimension is symbolic.
    pub fn static_dims(&self) -> Option<Vec<u64>> {
        self.shape
            .iter()
            .map(|dim| match dim {
                ShapeDim::Known(n) => Some(*n as u64),
                ShapeDim::Sym(_) => None,
            })
            .collect()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.dtype)?;
        for (i, dim) in self.shape.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

/// Parse a shape written as `125x127` or `125,127`.
pub fn parse_dims(text: &str) -> Option<Vec<usize>> {
    let text = text.trim();
    if text.is_empty() {
        return Some(Vec::new());
    }
    text.split(|c| c == 'x' || c == ',')
        .map(|part| part.trim().parse::<usize>().ok())
        .collect()
}
