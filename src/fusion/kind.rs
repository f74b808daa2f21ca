//! Backend kind tags carried by fusion nodes.

use std::fmt;
use std::str::FromStr;

/// Kind tag of the tiled custom-kernel backend.
pub const TILED_KERNEL_KIND: &str = "__triton";
/// Kind tag of fusions delegated to the library matmul.
pub const LIBRARY_CALL_KIND: &str = "__library$matmul";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FusionKind {
    /// Custom kernel launched with block-level tiling.
    TiledKernel,
    /// Call into the library-delegation dispatcher.
    LibraryCall,
}

impl FusionKind {
    pub const ALL: [FusionKind; 2] = [FusionKind::TiledKernel, FusionKind::LibraryCall];

    pub fn as_str(self) -> &'static str {
        match self {
            FusionKind::TiledKernel => TILED_KERNEL_KIND,
            FusionKind::LibraryCall => LIBRARY_CALL_KIND,
        }
    }

    /// Whether emitters of this kind expose a launch configuration.
    pub fn supports_launch_config(self) -> bool {
        matches!(self, FusionKind::TiledKernel)
    }
}

impl fmt::Display for FusionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown fusion backend kind '{0}'")]
pub struct UnknownFusionKind(pub String);

impl FromStr for FusionKind {
    type Err = UnknownFusionKind;

    /// Exact, case-sensitive match.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownFusionKind(s.to_string()))
    }
}
