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

use std::ffi::c_void;

use half::{bf16, f16};
use kdispatch::config::{FusedOp, MatmulConfig};
use kdispatch::exec::{ArgSlot, ConfigBuffer, DispatchError, PrimitiveError};
use kdispatch::memref::{BufferDescriptor, MemrefHandle};
use kdispatch::{dispatch_matmul, kd_cpu_runtime_matmul, RunOptions};

fn pool(threads: usize) -> rayon::ThreadPool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .expect("thread pool")
}

/// Row-major reference product of `[m, k] x [k, n]`.
fn reference(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            out[i * n + j] = (0..k).map(|p| a[i * k + p] * b[p * n + j]).sum();
        }
    }
    out
}

fn ramp(len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|i| ((i % 11) as f32 - 5.0) * scale).collect()
}

#[test]
fn f32_product_matches_reference() {
    let pool = pool(4);
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let (m, k, n) = (17, 9, 23);
    let a = ramp(m * k, 0.5);
    let b = ramp(k * n, 0.25);
    let mut c = vec![f32::NAN; m * n];
    {
        let lhs = BufferDescriptor::from_slice(&a, &[m as u64, k as u64]).unwrap();
        let rhs = BufferDescriptor::from_slice(&b, &[k as u64, n as u64]).unwrap();
        let dst = BufferDescriptor::from_mut_slice(&mut c, &[m as u64, n as u64]).unwrap();
        dispatch_matmul(&options, &lhs, &rhs, &dst, &MatmulConfig::plain().encode()).unwrap();
    }
    assert_eq!(c, reference(&a, &b, m, k, n));
}

#[test]
fn transposed_rhs_matches_reference() {
    let pool = pool(2);
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let (m, k, n) = (4, 6, 5);
    let a = ramp(m * k, 1.0);
    let b = ramp(k * n, 1.0);
    // Store rhs as [n, k].
    let mut bt = vec![0.0f32; k * n];
    for p in 0..k {
        for j in 0..n {
            bt[j * k + p] = b[p * n + j];
        }
    }
    let mut c = vec![0.0f32; m * n];
    {
        let lhs = BufferDescriptor::from_slice(&a, &[m as u64, k as u64]).unwrap();
        let rhs = BufferDescriptor::from_slice(&bt, &[n as u64, k as u64]).unwrap();
        let dst = BufferDescriptor::from_mut_slice(&mut c, &[m as u64, n as u64]).unwrap();
        let config = MatmulConfig {
            transpose_rhs: true,
            ..MatmulConfig::plain()
        };
        dispatch_matmul(&options, &lhs, &rhs, &dst, &config.encode()).unwrap();
    }
    assert_eq!(c, reference(&a, &b, m, k, n));
}

#[test]
fn broadcast_weights_across_batch() {
    let pool = pool(3);
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let (batch, m, k, n) = (3, 2, 4, 3);
    let a = ramp(batch * m * k, 1.0);
    let b = ramp(k * n, 0.5);
    let mut c = vec![0.0f32; batch * m * n];
    {
        let lhs = BufferDescriptor::from_slice(&a, &[batch as u64, m as u64, k as u64]).unwrap();
        let rhs = BufferDescriptor::from_slice(&b, &[1, k as u64, n as u64]).unwrap();
        let dst =
            BufferDescriptor::from_mut_slice(&mut c, &[batch as u64, m as u64, n as u64]).unwrap();
        dispatch_matmul(&options, &lhs, &rhs, &dst, &MatmulConfig::plain().encode()).unwrap();
    }
    for bi in 0..batch {
        let expected = reference(&a[bi * m * k..(bi + 1) * m * k], &b, m, k, n);
        assert_eq!(&c[bi * m * n..(bi + 1) * m * n], expected.as_slice(), "batch {bi}");
    }
}

#[test]
fn strided_destination_leaves_padding_untouched() {
    let pool = pool(2);
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let a = [1.0f32, 2.0, 3.0, 4.0];
    let b = [1.0f32, 1.0, 1.0, 1.0];
    // 2x2 result in rows of 3 elements; column 2 is padding.
    let mut c = [-1.0f32; 6];
    {
        let lhs = BufferDescriptor::from_slice(&a, &[2, 2]).unwrap();
        let rhs = BufferDescriptor::from_slice(&b, &[2, 2]).unwrap();
        let dst = BufferDescriptor::strided_mut(&mut c, &[2, 2], &[3, 1]).unwrap();
        dispatch_matmul(&options, &lhs, &rhs, &dst, &MatmulConfig::plain().encode()).unwrap();
    }
    assert_eq!(c, [3.0, 3.0, -1.0, 7.0, 7.0, -1.0]);
}

#[test]
fn half_precision_inputs() {
    let pool = pool(2);
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let a: Vec<f16> = [1.0f32, 2.0, 3.0, 4.0].iter().map(|&v| f16::from_f32(v)).collect();
    let b: Vec<f16> = [0.5f32, 1.0, 1.5, 2.0].iter().map(|&v| f16::from_f32(v)).collect();

    let mut same = vec![f16::ZERO; 4];
    let mut wide = vec![0.0f32; 4];
    {
        let lhs = BufferDescriptor::from_slice(&a, &[2, 2]).unwrap();
        let rhs = BufferDescriptor::from_slice(&b, &[2, 2]).unwrap();
        let config = MatmulConfig::plain().encode();
        let dst = BufferDescriptor::from_mut_slice(&mut same, &[2, 2]).unwrap();
        dispatch_matmul(&options, &lhs, &rhs, &dst, &config).unwrap();
        let dst = BufferDescriptor::from_mut_slice(&mut wide, &[2, 2]).unwrap();
        dispatch_matmul(&options, &lhs, &rhs, &dst, &config).unwrap();
    }
    let expected = [3.5f32, 5.0, 7.5, 11.0];
    assert_eq!(wide, expected);
    assert_eq!(same.iter().map(|v| v.to_f32()).collect::<Vec<_>>(), expected);
}

#[test]
fn bf16_into_f32() {
    let pool = pool(1);
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let a: Vec<bf16> = [1.0f32, -2.0].iter().map(|&v| bf16::from_f32(v)).collect();
    let b: Vec<bf16> = [4.0f32, 8.0].iter().map(|&v| bf16::from_f32(v)).collect();
    let mut c = [0.0f32; 1];
    {
        let lhs = BufferDescriptor::from_slice(&a, &[1, 2]).unwrap();
        let rhs = BufferDescriptor::from_slice(&b, &[2, 1]).unwrap();
        let dst = BufferDescriptor::from_mut_slice(&mut c, &[1, 1]).unwrap();
        dispatch_matmul(&options, &lhs, &rhs, &dst, &MatmulConfig::plain().encode()).unwrap();
    }
    assert_eq!(c, [-12.0]);
}

#[test]
fn unsupported_dtype_pair_is_a_primitive_error() {
    let pool = pool(1);
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let a = [1.0f32; 4];
    let mut c = [f16::ZERO; 4];
    let lhs = BufferDescriptor::from_slice(&a, &[2, 2]).unwrap();
    let dst = BufferDescriptor::from_mut_slice(&mut c, &[2, 2]).unwrap();
    let err =
        dispatch_matmul(&options, &lhs, &lhs, &dst, &MatmulConfig::plain().encode()).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Primitive(PrimitiveError::UnsupportedDTypes { .. })
    ));
}

#[test]
fn fused_op_is_rejected_and_destination_untouched() {
    let pool = pool(2);
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let a = [1.0f32; 4];
    let mut c = [42.0f32; 4];
    {
        let lhs = BufferDescriptor::from_slice(&a, &[2, 2]).unwrap();
        let dst = BufferDescriptor::from_mut_slice(&mut c, &[2, 2]).unwrap();
        let config = MatmulConfig::plain().with_fused_op(FusedOp::Bias).encode();
        let err = dispatch_matmul(&options, &lhs, &lhs, &dst, &config).unwrap_err();
        assert!(matches!(err, DispatchError::UnsupportedFusion { .. }));
    }
    assert_eq!(c, [42.0; 4]);
}

#[test]
fn malformed_config_is_rejected() {
    let pool = pool(1);
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let a = [1.0f32; 4];
    let mut c = [0.0f32; 4];
    let lhs = BufferDescriptor::from_slice(&a, &[2, 2]).unwrap();
    let dst = BufferDescriptor::from_mut_slice(&mut c, &[2, 2]).unwrap();
    let err = dispatch_matmul(&options, &lhs, &lhs, &dst, b"KDMC").unwrap_err();
    assert!(matches!(err, DispatchError::Config(_)));
}

#[test]
fn read_only_result_is_rejected() {
    let pool = pool(1);
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let a = [1.0f32; 4];
    let lhs = BufferDescriptor::from_slice(&a, &[2, 2]).unwrap();
    let err =
        dispatch_matmul(&options, &lhs, &lhs, &lhs, &MatmulConfig::plain().encode()).unwrap_err();
    assert!(matches!(err, DispatchError::ReadOnlyDestination));
}

#[test]
fn result_aliasing_an_input_is_rejected() {
    let pool = pool(4);
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let swap = [0.0f32, 1.0, 1.0, 0.0];
    let mut b = [1.0f32, 2.0, 3.0, 4.0];
    {
        let lhs = BufferDescriptor::from_slice(&swap, &[2, 2]).unwrap();
        let dst = BufferDescriptor::from_mut_slice(&mut b, &[2, 2]).unwrap();
        let config = MatmulConfig::plain().encode();

        let err = dispatch_matmul(&options, &lhs, &dst, &dst, &config).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::AliasedDestination {
                operand: ArgSlot::Weights
            }
        ));
        assert_eq!(err.to_string(), "result buffer overlaps the weights operand");

        let err = dispatch_matmul(&options, &dst, &lhs, &dst, &config).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::AliasedDestination {
                operand: ArgSlot::Src
            }
        ));
    }
    assert_eq!(b, [1.0, 2.0, 3.0, 4.0]);
}

fn run_raw(config: &[u8], out: &mut [f32]) {
    let pool = pool(2);
    let options = RunOptions::new().with_intra_op_thread_pool(&pool);
    let mut a = vec![1.0f32, 2.0, 3.0, 4.0];
    let mut b = vec![1.0f32, 0.0, 0.0, 1.0];
    let lhs = MemrefHandle::new(&mut a, &[2, 2]);
    let rhs = MemrefHandle::new(&mut b, &[2, 2]);
    let dst = MemrefHandle::new(out, &[2, 2]);
    let config = ConfigBuffer::from_slice(config);
    unsafe {
        kd_cpu_runtime_matmul(
            &options as *const RunOptions<'_> as *const c_void,
            lhs.as_raw(),
            rhs.as_raw(),
            dst.as_raw(),
            &config as *const ConfigBuffer as *const c_void,
        );
    }
}

#[test]
fn raw_entry_computes_product() {
    let mut out = [0.0f32; 4];
    run_raw(&MatmulConfig::plain().encode(), &mut out);
    assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
}

#[test]
#[should_panic(expected = "fused post-ops are not supported")]
fn raw_entry_treats_fused_op_as_fatal() {
    let mut out = [0.0f32; 4];
    run_raw(
        &MatmulConfig::plain().with_fused_op(FusedOp::GeluTanh).encode(),
        &mut out,
    );
}

#[test]
fn raw_entry_failure_leaves_destination_untouched() {
    let mut out = [9.0f32; 4];
    let config = MatmulConfig::plain().with_fused_op(FusedOp::Relu).encode();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        run_raw(&config, &mut out)
    }));
    assert!(result.is_err());
    assert_eq!(out, [9.0; 4]);
}
