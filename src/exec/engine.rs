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

//! Engine, stream and memory objects of the CPU primitive engine.
//!
//! A primitive is bound to an [`Engine`], reads and writes [`Memory`] objects
//! described by [`MemDesc`]s, and runs on a [`Stream`]. The stream borrows the
//! caller's thread pool, so a primitive's internal parallelism reuses the
//! caller's workers instead of spawning its own.

use std::fmt;
use std::marker::PhantomData;

use rayon::ThreadPool;

use crate::memref::{required_extent, BufferDescriptor};
use crate::types::DType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Engine {
    kind: EngineKind,
    index: usize,
}

impl Engine {
    pub fn new(kind: EngineKind, index: usize) -> Result<Self, PrimitiveError> {
        match kind {
            EngineKind::Cpu if index == 0 => Ok(Self { kind, index }),
            EngineKind::Cpu => Err(PrimitiveError::InvalidEngine { kind, index }),
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Argument slots a primitive binds memory objects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgSlot {
    Src,
    Weights,
    Dst,
}

impl fmt::Display for ArgSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgSlot::Src => f.write_str("src"),
            ArgSlot::Weights => f.write_str("weights"),
            ArgSlot::Dst => f.write_str("dst"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrimitiveError {
    #[error("no {kind:?} engine with index {index}")]
    InvalidEngine { kind: EngineKind, index: usize },
    #[error("matmul operands need rank >= 2, got {rank}")]
    RankTooSmall { rank: usize },
    #[error("operand ranks differ: src {src}, weights {weights}, dst {dst}")]
    RankMismatch {
        src: usize,
        weights: usize,
        dst: usize,
    },
    #[error("batch axis {axis} is not broadcast-compatible: src {src}, weights {weights}, dst {dst}")]
    BatchMismatch {
        axis: usize,
        src: u64,
        weights: u64,
        dst: u64,
    },
    #[error("contraction dims differ: src K={src_k}, weights K={weights_k}")]
    ContractionMismatch { src_k: u64, weights_k: u64 },
    #[error("dst is {found:?}, expected [.., {m}, {n}]")]
    OutputShapeMismatch { m: u64, n: u64, found: Vec<u64> },
    #[error("unsupported element types: src {src}, weights {weights}, dst {dst}")]
    UnsupportedDTypes { src: DType, weights: DType, dst: DType },
    #[error("memory descriptor for {slot} does not fit its buffer")]
    DescriptorOutOfBounds { slot: ArgSlot },
    #[error("no memory bound to {0}")]
    MissingArgument(ArgSlot),
    #[error("memory bound to {0} does not match the primitive descriptor")]
    ArgumentMismatch(ArgSlot),
    #[error("memory bound to {0} belongs to a different engine")]
    EngineMismatch(ArgSlot),
    #[error("memory bound to dst is read-only")]
    ReadOnlyDestination,
    #[error("dst layout {dims:?} / {strides:?} addresses some elements more than once")]
    OverlappingDestination { dims: Vec<u64>, strides: Vec<u64> },
}

/// Element type, dims and element strides of one operand as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemDesc {
    pub dtype: DType,
    pub dims: Vec<u64>,
    pub strides: Vec<u64>,
}

impl MemDesc {
    pub fn new(dtype: DType, dims: Vec<u64>, strides: Vec<u64>) -> Self {
        Self {
            dtype,
            dims,
            strides,
        }
    }

    pub fn from_buffer(buffer: &BufferDescriptor<'_>) -> Self {
        Self::new(buffer.dtype(), buffer.dims().to_vec(), buffer.strides().to_vec())
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Whether every logical element maps to a distinct offset.
    pub fn is_non_overlapping(&self) -> bool {
        let mut axes: Vec<(u64, u64)> = self
            .dims
            .iter()
            .zip(&self.strides)
            .filter(|&(&d, _)| d > 1)
            .map(|(&d, &s)| (s, d))
            .collect();
        axes.sort_unstable();
        let mut span = 0u64;
        for (stride, dim) in axes {
            if stride <= span {
                return false;
            }
            span = match (dim - 1).checked_mul(stride).and_then(|v| v.checked_add(span)) {
                Some(v) => v,
                None => return false,
            };
        }
        true
    }

    /// View with the two innermost axes swapped. Rank < 2 is returned as is.
    pub fn transpose_inner(&self) -> Self {
        let mut out = self.clone();
        let rank = out.rank();
        if rank >= 2 {
            out.dims.swap(rank - 2, rank - 1);
            out.strides.swap(rank - 2, rank - 1);
        }
        out
    }
}

/// A memory descriptor bound to an engine and a data region.
#[derive(Debug)]
pub struct Memory<'a> {
    desc: MemDesc,
    engine: Engine,
    data: *mut u8,
    writable: bool,
    _marker: PhantomData<&'a mut [u8]>,
}

impl<'a> Memory<'a> {
    /// Bind `desc` over the storage of `buffer`. The descriptor may permute
    /// the buffer's layout but must not address past its extent.
    pub fn from_buffer(
        desc: MemDesc,
        engine: Engine,
        buffer: &BufferDescriptor<'a>,
        slot: ArgSlot,
    ) -> Result<Self, PrimitiveError> {
        let fits = desc.dtype == buffer.dtype()
            && desc.dims.len() == desc.strides.len()
            && match (
                required_extent(&desc.dims, &desc.strides),
                required_extent(buffer.dims(), buffer.strides()),
            ) {
                (Ok(needed), Ok(available)) => needed <= available,
                _ => false,
            };
        if !fits {
            return Err(PrimitiveError::DescriptorOutOfBounds { slot });
        }
        Ok(Self {
            desc,
            engine,
            data: buffer.data_ptr(),
            writable: buffer.is_writable(),
            _marker: PhantomData,
        })
    }

    pub fn desc(&self) -> &MemDesc {
        &self.desc
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn data_ptr(&self) -> *mut u8 {
        self.data
    }
}

/// Execution stream bound to a borrowed thread pool.
pub struct Stream<'p> {
    engine: Engine,
    pool: &'p ThreadPool,
}

impl<'p> Stream<'p> {
    pub fn with_thread_pool(engine: Engine, pool: &'p ThreadPool) -> Self {
        Self { engine, pool }
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `work` inside the borrowed pool and block until it returns.
    pub(crate) fn run<R, F>(&self, work: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(work)
    }
}

impl fmt::Debug for Stream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("engine", &self.engine)
            .field("threads", &self.num_threads())
            .finish()
    }
}
