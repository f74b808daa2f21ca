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

//! Matmul dispatch configuration and its wire format.
//!
//! Wire format (version 1):
//! ```text
//! [0..4)  : magic "KDMC"
//! [4]     : version 0x01
//! [5..]   : ULEB128 fused-op count, one tag byte per op
//! [last]  : hint flags (bit 0 transpose_lhs, bit 1 transpose_rhs)
//! ```
//! Unknown op tags, reserved flag bits and trailing bytes are rejected.

use std::fmt;
use std::str::FromStr;

use super::varint::{read_uleb128, uleb128_len, write_uleb128, VarintError};

pub const MATMUL_CONFIG_MAGIC: [u8; 4] = *b"KDMC";
pub const MATMUL_CONFIG_VERSION: u8 = 0x01;

const FLAG_TRANSPOSE_LHS: u8 = 1 << 0;
const FLAG_TRANSPOSE_RHS: u8 = 1 << 1;
const KNOWN_FLAGS: u8 = FLAG_TRANSPOSE_LHS | FLAG_TRANSPOSE_RHS;

/// Upper bound on the fused-op count accepted by the decoder.
const MAX_FUSED_OPS: u64 = 64;

/// Post-multiply operation a compiler may request to fuse into the matmul.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FusedOp {
    Bias,
    Relu,
    Tanh,
    GeluErf,
    GeluTanh,
    BinaryAdd,
    Sigmoid,
}

impl FusedOp {
    pub const ALL: [FusedOp; 7] = [
        FusedOp::Bias,
        FusedOp::Relu,
        FusedOp::Tanh,
        FusedOp::GeluErf,
        FusedOp::GeluTanh,
        FusedOp::BinaryAdd,
        FusedOp::Sigmoid,
    ];

    pub fn to_byte(self) -> u8 {
        match self {
            FusedOp::Bias => 1,
            FusedOp::Relu => 2,
            FusedOp::Tanh => 3,
            FusedOp::GeluErf => 4,
            FusedOp::GeluTanh => 5,
            FusedOp::BinaryAdd => 6,
            FusedOp::Sigmoid => 7,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.to_byte() == byte)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FusedOp::Bias => "bias",
            FusedOp::Relu => "relu",
            FusedOp::Tanh => "tanh",
            FusedOp::GeluErf => "gelu_erf",
            FusedOp::GeluTanh => "gelu_tanh",
            FusedOp::BinaryAdd => "binary_add",
            FusedOp::Sigmoid => "sigmoid",
        }
    }
}

impl fmt::Display for FusedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FusedOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown fused op '{s}'"))
    }
}

/// Decoded configuration for one matmul dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatmulConfig {
    pub fused_ops: Vec<FusedOp>,
    pub transpose_lhs: bool,
    pub transpose_rhs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatmulConfigError {
    #[error("config is {len} bytes, too short for the header")]
    Truncated { len: usize },
    #[error("bad magic {found:02x?}")]
    BadMagic { found: [u8; 4] },
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u8),
    #[error("malformed fused-op count: {0}")]
    Count(#[from] VarintError),
    #[error("fused-op count {0} exceeds limit")]
    TooManyOps(u64),
    #[error("config ended before {expected} fused-op tags were read")]
    MissingOps { expected: u64 },
    #[error("unknown fused-op tag {0}")]
    UnknownOp(u8),
    #[error("config ended before the hint flags")]
    MissingFlags,
    #[error("reserved hint flag bits set: {0:#04x}")]
    ReservedFlags(u8),
    #[error("{0} trailing bytes after config")]
    TrailingBytes(usize),
}

impl MatmulConfig {
    /// A plain multiply with no fusion and no transposes.
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn with_fused_op(mut self, op: FusedOp) -> Self {
        self.fused_ops.push(op);
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let count = self.fused_ops.len() as u64;
        let mut out = Vec::with_capacity(
            MATMUL_CONFIG_MAGIC.len() + 2 + uleb128_len(count) + self.fused_ops.len(),
        );
        out.extend_from_slice(&MATMUL_CONFIG_MAGIC);
        out.push(MATMUL_CONFIG_VERSION);
        // Writes into a Vec cannot fail.
        let _ = write_uleb128(&mut out, count);
        out.extend(self.fused_ops.iter().map(|op| op.to_byte()));
        let mut flags = 0u8;
        if self.transpose_lhs {
            flags |= FLAG_TRANSPOSE_LHS;
        }
        if self.transpose_rhs {
            flags |= FLAG_TRANSPOSE_RHS;
        }
        out.push(flags);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MatmulConfigError> {
        if bytes.len() < MATMUL_CONFIG_MAGIC.len() + 1 {
            return Err(MatmulConfigError::Truncated { len: bytes.len() });
        }
        let (magic, rest) = bytes.split_at(MATMUL_CONFIG_MAGIC.len());
        if magic != MATMUL_CONFIG_MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(magic);
            return Err(MatmulConfigError::BadMagic { found });
        }
        let (&version, mut rest) = rest
            .split_first()
            .ok_or(MatmulConfigError::Truncated { len: bytes.len() })?;
        if version != MATMUL_CONFIG_VERSION {
            return Err(MatmulConfigError::UnsupportedVersion(version));
        }

        let count = read_uleb128(&mut rest)?;
        if count > MAX_FUSED_OPS {
            return Err(MatmulConfigError::TooManyOps(count));
        }
        let count_usize = count as usize;
        if rest.len() < count_usize {
            return Err(MatmulConfigError::MissingOps { expected: count });
        }
        let (tags, rest) = rest.split_at(count_usize);
        let fused_ops = tags
            .iter()
            .map(|&tag| FusedOp::from_byte(tag).ok_or(MatmulConfigError::UnknownOp(tag)))
            .collect::<Result<Vec<_>, _>>()?;

        let (&flags, rest) = rest.split_first().ok_or(MatmulConfigError::MissingFlags)?;
        if flags & !KNOWN_FLAGS != 0 {
            return Err(MatmulConfigError::ReservedFlags(flags & !KNOWN_FLAGS));
        }
        if !rest.is_empty() {
            return Err(MatmulConfigError::TrailingBytes(rest.len()));
        }

        Ok(Self {
            fused_ops,
            transpose_lhs: flags & FLAG_TRANSPOSE_LHS != 0,
            transpose_rhs: flags & FLAG_TRANSPOSE_RHS != 0,
        })
    }
}
