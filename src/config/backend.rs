//! Backend configuration attached to fusion nodes.
//!
//! The payload is JSON in the proto3 mapping: 64-bit integers may arrive as
//! decimal strings (`"num_warps":"4"`) or as plain numbers. Decoding here is
//! purely structural; value checks (positive tiles, warp limits) happen in
//! [`crate::fusion::BlockLevelParameters::from_config`] and the launch
//! planner.

use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuBackendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fusion_backend_config: Option<FusionBackendConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionBackendConfig {
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_level_fusion_config: Option<BlockLevelFusionConfig>,
}

/// Raw tiling payload for the tiled-kernel backend kind.
///
/// Fields keep the signed wire type so that negative values survive decoding
/// and can be reported precisely instead of wrapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLevelFusionConfig {
    #[serde(default, deserialize_with = "proto_int_seq")]
    pub output_tile_sizes: Vec<i64>,
    #[serde(default, deserialize_with = "proto_int")]
    pub num_warps: i64,
    #[serde(default, deserialize_with = "proto_int")]
    pub num_ctas: i64,
    #[serde(default, deserialize_with = "proto_int")]
    pub num_stages: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendConfigError {
    #[error("malformed backend config: {0}")]
    Json(#[from] serde_json::Error),
}

impl GpuBackendConfig {
    /// Parse the backend config text of a fusion node. Blank text is the
    /// default (no fusion backend config).
    pub fn from_json(text: &str) -> Result<Self, BackendConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Config for `kind` with an optional tiling payload.
    pub fn for_kind(kind: &str, block_level: Option<BlockLevelFusionConfig>) -> Self {
        Self {
            fusion_backend_config: Some(FusionBackendConfig {
                kind: kind.to_string(),
                block_level_fusion_config: block_level,
            }),
        }
    }
}

impl BlockLevelFusionConfig {
    pub fn new(output_tile_sizes: Vec<i64>, num_warps: i64) -> Self {
        Self {
            output_tile_sizes,
            num_warps,
            ..Self::default()
        }
    }
}

struct ProtoIntVisitor;

impl<'de> Visitor<'de> for ProtoIntVisitor {
    type Value = i64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or a decimal string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
        Ok(v)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
        i64::try_from(v).map_err(|_| E::custom(format!("integer {v} out of range")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
        v.trim()
            .parse::<i64>()
            .map_err(|_| E::custom(format!("'{v}' is not an integer")))
    }
}

#[derive(Debug)]
struct ProtoInt(i64);

impl<'de> Deserialize<'de> for ProtoInt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ProtoIntVisitor).map(ProtoInt)
    }
}

fn proto_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    ProtoInt::deserialize(deserializer).map(|v| v.0)
}

fn proto_int_seq<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i64>, D::Error> {
    struct SeqVisitor;

    impl<'de> Visitor<'de> for SeqVisitor {
        type Value = Vec<i64>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a list of integers")
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<i64>, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(ProtoInt(v)) = seq.next_element()? {
                out.push(v);
            }
            Ok(out)
        }
    }

    deserializer.deserialize_seq(SeqVisitor)
}
