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

//! Strided, batched matmul primitive.
//!
//! `dst[b, m, n] = sum_k src[b, m, k] * weights[b, k, n]` where every leading
//! batch axis of `src` and `weights` either matches `dst` or is 1 and
//! broadcasts. Inputs are widened to `f32` and accumulated in `f32`.

use std::collections::HashMap;

use half::{bf16, f16};
use rayon::prelude::*;
use tracing::trace;

use super::engine::{ArgSlot, Engine, MemDesc, Memory, PrimitiveError, Stream};
use crate::types::{DType, Element};

/// Validated operand geometry for one matmul.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatmulPrimitiveDesc {
    engine: Engine,
    src: MemDesc,
    weights: MemDesc,
    dst: MemDesc,
    batch: Vec<u64>,
    m: u64,
    k: u64,
    n: u64,
}

impl MatmulPrimitiveDesc {
    pub fn new(
        engine: Engine,
        src: MemDesc,
        weights: MemDesc,
        dst: MemDesc,
    ) -> Result<Self, PrimitiveError> {
        let rank = dst.rank();
        if src.rank() != rank || weights.rank() != rank {
            return Err(PrimitiveError::RankMismatch {
                src: src.rank(),
                weights: weights.rank(),
                dst: rank,
            });
        }
        if rank < 2 {
            return Err(PrimitiveError::RankTooSmall { rank });
        }

        let supported = src.dtype == weights.dtype
            && src.dtype.is_float()
            && (dst.dtype == src.dtype || dst.dtype == DType::F32);
        if !supported {
            return Err(PrimitiveError::UnsupportedDTypes {
                src: src.dtype,
                weights: weights.dtype,
                dst: dst.dtype,
            });
        }

        if !dst.is_non_overlapping() {
            return Err(PrimitiveError::OverlappingDestination {
                dims: dst.dims.clone(),
                strides: dst.strides.clone(),
            });
        }

        let batch_rank = rank - 2;
        for axis in 0..batch_rank {
            let (s, w, d) = (src.dims[axis], weights.dims[axis], dst.dims[axis]);
            let compatible = (s == d || s == 1) && (w == d || w == 1) && d == s.max(w);
            if !compatible {
                return Err(PrimitiveError::BatchMismatch {
                    axis,
                    src: s,
                    weights: w,
                    dst: d,
                });
            }
        }

        let (m, k) = (src.dims[batch_rank], src.dims[batch_rank + 1]);
        let (weights_k, n) = (weights.dims[batch_rank], weights.dims[batch_rank + 1]);
        if k != weights_k {
            return Err(PrimitiveError::ContractionMismatch {
                src_k: k,
                weights_k,
            });
        }
        if dst.dims[batch_rank] != m || dst.dims[batch_rank + 1] != n {
            return Err(PrimitiveError::OutputShapeMismatch {
                m,
                n,
                found: dst.dims.clone(),
            });
        }

        Ok(Self {
            engine,
            batch: dst.dims[..batch_rank].to_vec(),
            src,
            weights,
            dst,
            m,
            k,
            n,
        })
    }

    pub fn src_desc(&self) -> &MemDesc {
        &self.src
    }

    pub fn weights_desc(&self) -> &MemDesc {
        &self.weights
    }

    pub fn dst_desc(&self) -> &MemDesc {
        &self.dst
    }

    /// `(batch count, M, K, N)`
    pub fn problem_size(&self) -> (u64, u64, u64, u64) {
        (self.batch.iter().product(), self.m, self.k, self.n)
    }

    fn desc_for(&self, slot: ArgSlot) -> &MemDesc {
        match slot {
            ArgSlot::Src => &self.src,
            ArgSlot::Weights => &self.weights,
            ArgSlot::Dst => &self.dst,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatmulPrimitive {
    pd: MatmulPrimitiveDesc,
}

#[derive(Clone, Copy)]
struct SendPtr(*mut u8);

// SAFETY: rows of dst written through this pointer are disjoint per task, and
// src/weights are only read.
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

impl SendPtr {
    fn get(self) -> *mut u8 {
        self.0
    }
}

/// Element offsets of one operand for a given row task.
#[derive(Clone, Copy)]
struct Operand<'d> {
    ptr: SendPtr,
    desc: &'d MemDesc,
}

impl MatmulPrimitive {
    pub fn new(pd: MatmulPrimitiveDesc) -> Self {
        Self { pd }
    }

    pub fn desc(&self) -> &MatmulPrimitiveDesc {
        &self.pd
    }

    /// Execute synchronously on `stream`; returns once dst is fully written.
    pub fn execute(
        &self,
        stream: &Stream<'_>,
        args: &HashMap<ArgSlot, Memory<'_>>,
    ) -> Result<(), PrimitiveError> {
        let mut bound = [SendPtr(std::ptr::null_mut()); 3];
        for (i, slot) in [ArgSlot::Src, ArgSlot::Weights, ArgSlot::Dst].into_iter().enumerate() {
            let memory = args.get(&slot).ok_or(PrimitiveError::MissingArgument(slot))?;
            if memory.engine() != self.pd.engine || stream.engine() != self.pd.engine {
                return Err(PrimitiveError::EngineMismatch(slot));
            }
            if memory.desc() != self.pd.desc_for(slot) {
                return Err(PrimitiveError::ArgumentMismatch(slot));
            }
            if slot == ArgSlot::Dst && !memory.is_writable() {
                return Err(PrimitiveError::ReadOnlyDestination);
            }
            bound[i] = SendPtr(memory.data_ptr());
        }

        let (batch, m, k, n) = self.pd.problem_size();
        trace!(batch, m, k, n, threads = stream.num_threads(), "executing matmul primitive");
        if batch == 0 || m == 0 || n == 0 {
            return Ok(());
        }

        let src = Operand {
            ptr: bound[0],
            desc: &self.pd.src,
        };
        let weights = Operand {
            ptr: bound[1],
            desc: &self.pd.weights,
        };
        let dst = Operand {
            ptr: bound[2],
            desc: &self.pd.dst,
        };

        match (self.pd.src.dtype, self.pd.dst.dtype) {
            (DType::F32, DType::F32) => self.run::<f32, f32>(stream, src, weights, dst),
            (DType::F16, DType::F16) => self.run::<f16, f16>(stream, src, weights, dst),
            (DType::F16, DType::F32) => self.run::<f16, f32>(stream, src, weights, dst),
            (DType::BF16, DType::BF16) => self.run::<bf16, bf16>(stream, src, weights, dst),
            (DType::BF16, DType::F32) => self.run::<bf16, f32>(stream, src, weights, dst),
            (s, d) => {
                return Err(PrimitiveError::UnsupportedDTypes {
                    src: s,
                    weights: self.pd.weights.dtype,
                    dst: d,
                })
            }
        }
        Ok(())
    }

    fn run<S: Element, D: Element>(
        &self,
        stream: &Stream<'_>,
        src: Operand<'_>,
        weights: Operand<'_>,
        dst: Operand<'_>,
    ) {
        let batch_rank = self.pd.batch.len();
        let batch_dims = &self.pd.batch;
        let (batch, m, k, n) = self.pd.problem_size();
        let rows = batch * m;

        let (s_m, s_k) = (src.desc.strides[batch_rank], src.desc.strides[batch_rank + 1]);
        let (w_k, w_n) = (
            weights.desc.strides[batch_rank],
            weights.desc.strides[batch_rank + 1],
        );
        let (d_m, d_n) = (dst.desc.strides[batch_rank], dst.desc.strides[batch_rank + 1]);

        stream.run(|| {
            (0..rows).into_par_iter().for_each(|row| {
                let (mut b, mi) = (row / m, row % m);
                let (mut s_off, mut w_off, mut d_off) = (0u64, 0u64, 0u64);
                for axis in (0..batch_rank).rev() {
                    let idx = b % batch_dims[axis];
                    b /= batch_dims[axis];
                    if src.desc.dims[axis] != 1 {
                        s_off += idx * src.desc.strides[axis];
                    }
                    if weights.desc.dims[axis] != 1 {
                        w_off += idx * weights.desc.strides[axis];
                    }
                    d_off += idx * dst.desc.strides[axis];
                }
                let s_row = s_off + mi * s_m;
                let d_row = d_off + mi * d_m;

                for ni in 0..n {
                    let mut acc = 0.0f32;
                    for ki in 0..k {
                        // SAFETY: offsets stay inside the extents checked when
                        // the memory objects were bound.
                        unsafe {
                            acc += load::<S>(src.ptr.get(), s_row + ki * s_k)
                                * load::<S>(weights.ptr.get(), w_off + ki * w_k + ni * w_n);
                        }
                    }
                    // SAFETY: each (b, m) row task owns its dst row.
                    unsafe { store::<D>(dst.ptr.get(), d_row + ni * d_n, acc) };
                }
            });
        });
    }
}

#[inline(always)]
unsafe fn load<T: Element>(base: *mut u8, offset: u64) -> f32 {
    unsafe { (base as *const T).add(offset as usize).read_unaligned().to_f32() }
}

#[inline(always)]
unsafe fn store<T: Element>(base: *mut u8, offset: u64, value: f32) {
    unsafe { (base as *mut T).add(offset as usize).write_unaligned(T::from_f32(value)) }
}
