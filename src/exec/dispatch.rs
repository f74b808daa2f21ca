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

//! Library-delegation dispatcher for matmul.
//!
//! [`dispatch_matmul`] is the safe entry: it takes decoded buffers and returns
//! a typed [`DispatchError`]. [`kd_cpu_runtime_matmul`] is the entry compiled
//! code calls with raw handles; every failure there is fatal.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use super::engine::{ArgSlot, Engine, EngineKind, MemDesc, Memory, PrimitiveError, Stream};
use super::matmul::{MatmulPrimitive, MatmulPrimitiveDesc};
use crate::config::{FusedOp, MatmulConfig, MatmulConfigError};
use crate::memref::{BufferDescriptor, MemrefError};
use crate::runtime::RunOptions;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("run options carry no intra-op thread pool")]
    MissingThreadPool,
    #[error("invalid matmul config: {0}")]
    Config(#[from] MatmulConfigError),
    #[error("fused post-ops are not supported by the matmul dispatcher: {}", format_ops(.ops))]
    UnsupportedFusion { ops: Vec<FusedOp> },
    #[error("{operand} operand: {source}")]
    Memref {
        operand: ArgSlot,
        #[source]
        source: MemrefError,
    },
    #[error("config buffer handle is null")]
    NullConfig,
    #[error("result buffer is read-only")]
    ReadOnlyDestination,
    #[error("result buffer overlaps the {operand} operand")]
    AliasedDestination { operand: ArgSlot },
    #[error(transparent)]
    Primitive(#[from] PrimitiveError),
}

fn format_ops(ops: &[FusedOp]) -> String {
    ops.iter().map(|op| op.as_str()).collect::<Vec<_>>().join(", ")
}

/// Run `result = lhs x rhs` on the primitive engine using the caller's
/// intra-op pool. Returns once `result` holds the product.
pub fn dispatch_matmul(
    run_options: &RunOptions<'_>,
    lhs: &BufferDescriptor<'_>,
    rhs: &BufferDescriptor<'_>,
    result: &BufferDescriptor<'_>,
    config: &[u8],
) -> Result<(), DispatchError> {
    let pool = run_options
        .intra_op_thread_pool()
        .ok_or(DispatchError::MissingThreadPool)?;

    let config = MatmulConfig::decode(config)?;
    if !config.fused_ops.is_empty() {
        return Err(DispatchError::UnsupportedFusion {
            ops: config.fused_ops,
        });
    }
    if !result.is_writable() {
        return Err(DispatchError::ReadOnlyDestination);
    }
    for (operand, input) in [(ArgSlot::Src, lhs), (ArgSlot::Weights, rhs)] {
        if result.overlaps(input) {
            return Err(DispatchError::AliasedDestination { operand });
        }
    }

    let engine = Engine::new(EngineKind::Cpu, 0)?;
    let stream = Stream::with_thread_pool(engine, pool);

    let mut src_md = MemDesc::from_buffer(lhs);
    let mut weights_md = MemDesc::from_buffer(rhs);
    let dst_md = MemDesc::from_buffer(result);
    if config.transpose_lhs {
        src_md = src_md.transpose_inner();
    }
    if config.transpose_rhs {
        weights_md = weights_md.transpose_inner();
    }
    debug!(
        src = ?src_md.dims,
        weights = ?weights_md.dims,
        dst = ?dst_md.dims,
        dtype = %src_md.dtype,
        threads = stream.num_threads(),
        "dispatching matmul"
    );

    let src_mem = Memory::from_buffer(src_md.clone(), engine, lhs, ArgSlot::Src)?;
    let weights_mem = Memory::from_buffer(weights_md.clone(), engine, rhs, ArgSlot::Weights)?;
    let dst_mem = Memory::from_buffer(dst_md.clone(), engine, result, ArgSlot::Dst)?;

    let pd = MatmulPrimitiveDesc::new(engine, src_md, weights_md, dst_md)?;
    let primitive = MatmulPrimitive::new(pd);

    let mut args = HashMap::with_capacity(3);
    args.insert(ArgSlot::Src, src_mem);
    args.insert(ArgSlot::Weights, weights_mem);
    args.insert(ArgSlot::Dst, dst_mem);
    primitive.execute(&stream, &args)?;
    Ok(())
}

/// Serialized config blob as passed across the runtime call boundary.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ConfigBuffer {
    pub data: *const u8,
    pub len: usize,
}

impl ConfigBuffer {
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    /// # Safety
    ///
    /// `data` must point at `len` readable bytes for `'a` (or `len` is 0).
    unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.len == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.data, self.len) }
        }
    }
}

#[cold]
#[track_caller]
fn fatal(args: fmt::Arguments<'_>) -> ! {
    error!(target: "kdispatch::runtime", "{args}");
    panic!("runtime check failed: {args}")
}

macro_rules! runtime_check {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            fatal(format_args!($($arg)+));
        }
    };
}

/// Decode the raw handles of one call.
///
/// # Safety
///
/// Same contract as [`kd_cpu_runtime_matmul`].
unsafe fn raw_operands<'a>(
    lhs: *const c_void,
    rhs: *const c_void,
    result: *const c_void,
    config: *const c_void,
) -> Result<
    (
        BufferDescriptor<'a>,
        BufferDescriptor<'a>,
        BufferDescriptor<'a>,
        &'a [u8],
    ),
    DispatchError,
> {
    let decode = |handle: *const c_void, operand: ArgSlot| {
        unsafe { BufferDescriptor::from_memref(handle) }
            .map_err(|source| DispatchError::Memref { operand, source })
    };
    let lhs = decode(lhs, ArgSlot::Src)?;
    let rhs = decode(rhs, ArgSlot::Weights)?;
    let result = decode(result, ArgSlot::Dst)?;
    if config.is_null() {
        return Err(DispatchError::NullConfig);
    }
    let config = unsafe { (*(config as *const ConfigBuffer)).as_slice() };
    Ok((lhs, rhs, result, config))
}

/// Raw matmul runtime entry.
///
/// Any precondition or configuration failure terminates the call with a
/// logged panic; nothing is written to `result` in that case.
///
/// # Safety
///
/// * `run_options` points at a live [`RunOptions`].
/// * `lhs`, `rhs` and `result` point at valid
///   [`crate::memref::MemrefDescriptor`]s whose data outlives the call;
///   `result` does not alias the inputs.
/// * `config` points at a [`ConfigBuffer`] whose bytes outlive the call.
pub unsafe fn kd_cpu_runtime_matmul(
    run_options: *const c_void,
    lhs: *const c_void,
    rhs: *const c_void,
    result: *const c_void,
    config: *const c_void,
) {
    runtime_check!(!run_options.is_null(), "run options are null");
    let run_options = unsafe { &*(run_options as *const RunOptions<'_>) };
    runtime_check!(
        run_options.intra_op_thread_pool().is_some(),
        "{}",
        DispatchError::MissingThreadPool
    );

    let outcome = unsafe { raw_operands(lhs, rhs, result, config) }
        .and_then(|(lhs, rhs, result, config)| {
            dispatch_matmul(run_options, &lhs, &rhs, &result, config)
        });
    if let Err(err) = outcome {
        fatal(format_args!("{err}"));
    }
}

/// C symbol for [`kd_cpu_runtime_matmul`]. A failed check aborts the process.
///
/// # Safety
///
/// See [`kd_cpu_runtime_matmul`].
#[no_mangle]
pub unsafe extern "C" fn __kdispatch_cpu_runtime_matmul(
    run_options: *const c_void,
    lhs: *const c_void,
    rhs: *const c_void,
    result: *const c_void,
    config: *const c_void,
) {
    let call = AssertUnwindSafe(|| unsafe {
        kd_cpu_runtime_matmul(run_options, lhs, rhs, result, config)
    });
    if panic::catch_unwind(call).is_err() {
        std::process::abort();
    }
}
