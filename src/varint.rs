// VCDIFF variable-length integers (RFC 3284, Section 2).
//
// Base-128, big-endian: most-significant group first, bit 7 set on every
// byte except the last.  A u32 occupies at most 5 bytes, a u64 at most 10;
// longer encodings (including redundant leading zero groups) are rejected.

use std::io::{self, Write};

/// Maximum encoded length of a 64-bit value (ceil(64/7)).
pub const MAX_VARINT_LEN64: usize = 10;
/// Maximum encoded length of a 32-bit value (ceil(32/7)).
pub const MAX_VARINT_LEN32: usize = 5;

/// Overflow guard for the 32-bit accumulator: if any of these bits are set
/// before a shift, the next `<< 7` would lose data.
const U32_OVERFLOW_MASK: u32 = 0xFE00_0000;

/// Overflow guard for the 64-bit accumulator.
const U64_OVERFLOW_MASK: u64 = 0xFE00_0000_0000_0000;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a `u64` into `buf`, filling it from the end.  Returns the number
/// of bytes used (1..=10); the encoding occupies the tail of `buf`.
#[inline]
pub fn encode_u64(mut num: u64, buf: &mut [u8; MAX_VARINT_LEN64]) -> usize {
    let mut i = MAX_VARINT_LEN64;
    loop {
        i -= 1;
        buf[i] = (num as u8 & 0x7F) | 0x80;
        num >>= 7;
        if num == 0 {
            break;
        }
    }
    buf[MAX_VARINT_LEN64 - 1] &= 0x7F; // clear the continuation bit on the last byte
    MAX_VARINT_LEN64 - i
}

/// Append the encoding of a `u64` to `out`.
pub fn push_u64(out: &mut Vec<u8>, num: u64) {
    let mut buf = [0u8; MAX_VARINT_LEN64];
    let len = encode_u64(num, &mut buf);
    out.extend_from_slice(&buf[MAX_VARINT_LEN64 - len..]);
}

/// Append the encoding of a `u32` to `out`.
pub fn push_u32(out: &mut Vec<u8>, num: u32) {
    push_u64(out, u64::from(num));
}

/// Encode a `u64` and write it to a `Write` sink.
pub fn write_u64<W: Write>(w: &mut W, num: u64) -> io::Result<()> {
    let mut buf = [0u8; MAX_VARINT_LEN64];
    let len = encode_u64(num, &mut buf);
    w.write_all(&buf[MAX_VARINT_LEN64 - len..])
}

/// Encode a `u32` and write it to a `Write` sink.
pub fn write_u32<W: Write>(w: &mut W, num: u32) -> io::Result<()> {
    write_u64(w, u64::from(num))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a `u64` from the front of `data`.
///
/// Returns `(value, bytes_consumed)`.  `Truncated` means `data` ended in
/// the middle of the integer; the caller keeps its cursor and may retry
/// once more input has arrived.  `Overflow` is a hard format error.
pub fn read_u64(data: &[u8]) -> Result<(u64, usize), VarIntError> {
    let mut val: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN64 || val & U64_OVERFLOW_MASK != 0 {
            return Err(VarIntError::Overflow);
        }
        val = (val << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
    }
    Err(VarIntError::Truncated)
}

/// Decode a `u32` from the front of `data`.
pub fn read_u32(data: &[u8]) -> Result<(u32, usize), VarIntError> {
    let mut val: u32 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN32 || val & U32_OVERFLOW_MASK != 0 {
            return Err(VarIntError::Overflow);
        }
        val = (val << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
    }
    Err(VarIntError::Truncated)
}

// ---------------------------------------------------------------------------
// Length calculation
// ---------------------------------------------------------------------------

/// Encoded byte length of a `u64` value, without emitting it.
#[inline]
pub fn sizeof_u64(num: u64) -> usize {
    let bits = 64 - num.leading_zeros();
    (bits.max(1).div_ceil(7) as usize).min(MAX_VARINT_LEN64)
}

/// Encoded byte length of a `u32` value.
#[inline]
pub fn sizeof_u32(num: u32) -> usize {
    sizeof_u64(u64::from(num))
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarIntError {
    /// Input ended mid-integer; retry with more data.
    Truncated,
    /// The encoding exceeds the width of the target integer type.
    Overflow,
}

impl std::fmt::Display for VarIntError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarIntError::Truncated => write!(f, "truncated variable-length integer"),
            VarIntError::Overflow => write!(f, "variable-length integer overflow"),
        }
    }
}

impl std::error::Error for VarIntError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
