// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the "License").

//! ULEB128 integers for the matmul config wire format.
//!
//! 7 payload bits per byte, MSB set on every byte but the last.

use std::io::{self, Write};

/// ceil(64 / 7)
const MAX_ULEB128_BYTES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VarintError {
    #[error("input ended inside a varint")]
    UnexpectedEof,
    #[error("varint does not fit in 64 bits")]
    Overflow,
}

/// Append `value` as ULEB128, returning the number of bytes written.
pub fn write_uleb128<W: Write>(w: &mut W, mut value: u64) -> io::Result<usize> {
    let mut written = 0;
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        w.write_all(&[byte])?;
        written += 1;
        if value == 0 {
            return Ok(written);
        }
    }
}

/// Decode one ULEB128 value from the front of `input`, advancing it.
pub fn read_uleb128(input: &mut &[u8]) -> Result<u64, VarintError> {
    let mut result = 0u64;
    for (i, &byte) in input.iter().enumerate().take(MAX_ULEB128_BYTES) {
        let payload = u64::from(byte & 0x7F);
        let shift = 7 * i as u32;
        if shift == 63 && payload > 1 {
            return Err(VarintError::Overflow);
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            *input = &input[i + 1..];
            return Ok(result);
        }
    }
    if input.len() >= MAX_ULEB128_BYTES {
        Err(VarintError::Overflow)
    } else {
        Err(VarintError::UnexpectedEof)
    }
}

/// Encoded length of `value` in bytes.
pub fn uleb128_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}
