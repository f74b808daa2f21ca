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

//! Operand buffer descriptors.
//!
//! Compiled code hands the runtime entry points opaque pointers to a
//! [`MemrefDescriptor`]: a C-layout record of element type, rank, base
//! address, dims and element strides. [`BufferDescriptor`] is the validated,
//! read-only view of one such record that the dispatcher works with. Safe
//! constructors exist for Rust slices so the same view can be built without
//! going through raw pointers.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr;

use crate::types::{DType, Element};

/// Highest rank a memref may carry.
pub const MAX_RANK: usize = 8;

/// C-layout buffer record produced by the memory-management collaborator.
///
/// `dims` and `strides` each point at `rank` signed 64-bit values. Strides are
/// counted in elements, not bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemrefDescriptor {
    pub dtype: u32,
    pub rank: u64,
    pub data: *mut c_void,
    pub dims: *const i64,
    pub strides: *const i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MemrefError {
    #[error("memref handle is null")]
    NullHandle,
    #[error("memref data pointer is null")]
    NullData,
    #[error("memref dims or strides pointer is null for rank {rank}")]
    NullShape { rank: u64 },
    #[error("unknown element type tag {0}")]
    UnknownDType(u32),
    #[error("rank {rank} exceeds the supported maximum of {max}")]
    RankTooLarge { rank: u64, max: usize },
    #[error("dimension {axis} has negative size {value}")]
    NegativeDim { axis: usize, value: i64 },
    #[error("dimension {axis} has negative stride {value}")]
    NegativeStride { axis: usize, value: i64 },
    #[error("dims and strides differ in length ({dims} vs {strides})")]
    StrideRankMismatch { dims: usize, strides: usize },
    #[error("buffer holds {len} elements but the layout spans {required}")]
    BufferTooSmall { required: u64, len: u64 },
    #[error("element type mismatch: slice is {found}, layout expects {expected}")]
    DTypeMismatch { expected: DType, found: DType },
    #[error("layout extent overflows")]
    ExtentOverflow,
}

/// Validated view of one operand buffer for the duration of a dispatch call.
#[derive(Debug)]
pub struct BufferDescriptor<'a> {
    dtype: DType,
    dims: Vec<u64>,
    strides: Vec<u64>,
    data: *mut u8,
    writable: bool,
    _marker: PhantomData<&'a mut [u8]>,
}

// SAFETY: the descriptor is only a view; access to the pointee is governed by
// the borrow it was created from (or by the raw-handle contract). It is not
// `Sync`: a writable view must not be shared across threads.
unsafe impl Send for BufferDescriptor<'_> {}

impl<'a> BufferDescriptor<'a> {
    /// Decode a raw memref handle.
    ///
    /// # Safety
    ///
    /// `handle` must be null or point at a valid [`MemrefDescriptor`] whose
    /// `dims`/`strides` arrays hold `rank` values and whose data region covers
    /// the described layout for the lifetime `'a`. The data is treated as
    /// writable.
    pub unsafe fn from_memref(handle: *const c_void) -> Result<Self, MemrefError> {
        if handle.is_null() {
            return Err(MemrefError::NullHandle);
        }
        let desc = unsafe { &*(handle as *const MemrefDescriptor) };
        let dtype = DType::from_raw(desc.dtype).ok_or(MemrefError::UnknownDType(desc.dtype))?;
        if desc.rank > MAX_RANK as u64 {
            return Err(MemrefError::RankTooLarge {
                rank: desc.rank,
                max: MAX_RANK,
            });
        }
        if desc.data.is_null() {
            return Err(MemrefError::NullData);
        }
        let rank = desc.rank as usize;
        let (raw_dims, raw_strides) = if rank == 0 {
            (&[][..], &[][..])
        } else {
            if desc.dims.is_null() || desc.strides.is_null() {
                return Err(MemrefError::NullShape { rank: desc.rank });
            }
            unsafe {
                (
                    std::slice::from_raw_parts(desc.dims, rank),
                    std::slice::from_raw_parts(desc.strides, rank),
                )
            }
        };

        let dims = non_negative(raw_dims, |axis, value| MemrefError::NegativeDim { axis, value })?;
        let strides =
            non_negative(raw_strides, |axis, value| MemrefError::NegativeStride { axis, value })?;
        required_extent(&dims, &strides)?;

        Ok(Self {
            dtype,
            dims,
            strides,
            data: desc.data as *mut u8,
            writable: true,
            _marker: PhantomData,
        })
    }

    /// Read-only row-major view over a slice.
    pub fn from_slice<T: Element>(data: &'a [T], dims: &[u64]) -> Result<Self, MemrefError> {
        Self::checked(
            T::DTYPE,
            dims.to_vec(),
            row_major_strides(dims),
            data.as_ptr() as *mut u8,
            data.len(),
            false,
        )
    }

    /// Writable row-major view over a slice.
    pub fn from_mut_slice<T: Element>(data: &'a mut [T], dims: &[u64]) -> Result<Self, MemrefError> {
        let len = data.len();
        Self::checked(
            T::DTYPE,
            dims.to_vec(),
            row_major_strides(dims),
            data.as_mut_ptr() as *mut u8,
            len,
            true,
        )
    }

    /// Read-only view with explicit element strides.
    pub fn strided<T: Element>(
        data: &'a [T],
        dims: &[u64],
        strides: &[u64],
    ) -> Result<Self, MemrefError> {
        Self::checked(
            T::DTYPE,
            dims.to_vec(),
            strides.to_vec(),
            data.as_ptr() as *mut u8,
            data.len(),
            false,
        )
    }

    /// Writable view with explicit element strides.
    pub fn strided_mut<T: Element>(
        data: &'a mut [T],
        dims: &[u64],
        strides: &[u64],
    ) -> Result<Self, MemrefError> {
        let len = data.len();
        Self::checked(
            T::DTYPE,
            dims.to_vec(),
            strides.to_vec(),
            data.as_mut_ptr() as *mut u8,
            len,
            true,
        )
    }

    fn checked(
        dtype: DType,
        dims: Vec<u64>,
        strides: Vec<u64>,
        data: *mut u8,
        len: usize,
        writable: bool,
    ) -> Result<Self, MemrefError> {
        if dims.len() > MAX_RANK {
            return Err(MemrefError::RankTooLarge {
                rank: dims.len() as u64,
                max: MAX_RANK,
            });
        }
        if dims.len() != strides.len() {
            return Err(MemrefError::StrideRankMismatch {
                dims: dims.len(),
                strides: strides.len(),
            });
        }
        let required = required_extent(&dims, &strides)?;
        if required > len as u64 {
            return Err(MemrefError::BufferTooSmall {
                required,
                len: len as u64,
            });
        }
        Ok(Self {
            dtype,
            dims,
            strides,
            data,
            writable,
            _marker: PhantomData,
        })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    pub fn strides(&self) -> &[u64] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Base address of element `[0, 0, ...]`.
    pub fn data_ptr(&self) -> *mut u8 {
        self.data
    }

    /// Byte addresses `[start, end)` the layout touches, or `None` when it
    /// addresses no element.
    pub fn byte_span(&self) -> Option<(usize, usize)> {
        let extent = required_extent(&self.dims, &self.strides).ok()?;
        if extent == 0 {
            return None;
        }
        let start = self.data as usize;
        let len = usize::try_from(extent)
            .ok()?
            .checked_mul(self.dtype.size_in_bytes())?;
        Some((start, start.checked_add(len)?))
    }

    /// Whether the address ranges of `self` and `other` intersect.
    pub fn overlaps(&self, other: &BufferDescriptor<'_>) -> bool {
        match (self.byte_span(), other.byte_span()) {
            (Some((a0, a1)), Some((b0, b1))) => a0 < b1 && b0 < a1,
            _ => false,
        }
    }
}

/// Row-major (C order) element strides for `dims`.
pub fn row_major_strides(dims: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; dims.len()];
    for axis in (0..dims.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1].saturating_mul(dims[axis + 1].max(1));
    }
    strides
}

/// Number of elements from the base address to one past the last addressed
/// element. Zero when any dimension is empty.
pub fn required_extent(dims: &[u64], strides: &[u64]) -> Result<u64, MemrefError> {
    if dims.iter().any(|&d| d == 0) {
        return Ok(0);
    }
    dims.iter()
        .zip(strides)
        .try_fold(1u64, |acc, (&dim, &stride)| {
            (dim - 1).checked_mul(stride).and_then(|span| acc.checked_add(span))
        })
        .ok_or(MemrefError::ExtentOverflow)
}

fn non_negative(
    values: &[i64],
    err: impl Fn(usize, i64) -> MemrefError,
) -> Result<Vec<u64>, MemrefError> {
    values
        .iter()
        .enumerate()
        .map(|(axis, &value)| u64::try_from(value).map_err(|_| err(axis, value)))
        .collect()
}

/// Owns a [`MemrefDescriptor`] and its dims/strides arrays for a mutable slice,
/// so Rust callers can produce the raw handles compiled code would pass.
pub struct MemrefHandle<'a> {
    desc: MemrefDescriptor,
    _dims: Box<[i64]>,
    _strides: Box<[i64]>,
    _marker: PhantomData<&'a mut [u8]>,
}

impl<'a> MemrefHandle<'a> {
    pub fn new<T: Element>(data: &'a mut [T], dims: &[u64]) -> Self {
        Self::with_strides(data, dims, &row_major_strides(dims))
    }

    pub fn with_strides<T: Element>(data: &'a mut [T], dims: &[u64], strides: &[u64]) -> Self {
        let dims: Box<[i64]> = dims.iter().map(|&d| d as i64).collect();
        let strides: Box<[i64]> = strides.iter().map(|&s| s as i64).collect();
        let desc = MemrefDescriptor {
            dtype: T::DTYPE as u32,
            rank: dims.len() as u64,
            data: data.as_mut_ptr() as *mut c_void,
            dims: if dims.is_empty() { ptr::null() } else { dims.as_ptr() },
            strides: if strides.is_empty() {
                ptr::null()
            } else {
                strides.as_ptr()
            },
        };
        Self {
            desc,
            _dims: dims,
            _strides: strides,
            _marker: PhantomData,
        }
    }

    /// Opaque handle suitable for the runtime entry points.
    pub fn as_raw(&self) -> *const c_void {
        &self.desc as *const MemrefDescriptor as *const c_void
    }
}
