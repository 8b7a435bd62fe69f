//! Scalar storage codecs.
//!
//! Vectors are stored in one of three per-scalar encodings chosen at index
//! creation: full 32-bit floats, symmetric int8 with a fixed 1/127 scale,
//! or the non-uniform 8-bit [`e4m3`] float. Each codec converts between the
//! caller-facing `f32` and its stored byte form and is monotonic on finite
//! inputs, so distance orderings survive quantization.

/// 8-bit 1-4-3 float codec with round-to-nearest, ties-to-even.
pub mod e4m3;
/// Chunked distance kernels over encoded byte blocks.
pub mod kernels;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Fixed scale for the int8 codec: stored byte `b` decodes to `b / 127`.
pub const FLOAT8_SCALE: f32 = 127.0;

/// Per-scalar storage encoding.
///
/// The discriminants double as the on-disk `storage_kind` tags, matching
/// the legacy stream scheme (`Float8 = 0x10`, `Float32 = 0x20`,
/// `E4M3 = 0x30`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StorageKind {
    /// Signed 8-bit integer with uniform scale 1/127. Out-of-range inputs
    /// clamp silently to [-1, 1].
    Float8 = 0x10,
    /// IEEE-754 binary32, stored verbatim.
    Float32 = 0x20,
    /// 8-bit float, 4 exponent and 3 mantissa bits. Inputs outside
    /// [-448, 448] are rejected.
    E4M3 = 0x30,
}

impl StorageKind {
    /// Stored bytes per scalar.
    #[inline]
    pub fn scalar_size(self) -> usize {
        match self {
            StorageKind::Float8 | StorageKind::E4M3 => 1,
            StorageKind::Float32 => 4,
        }
    }

    /// The on-disk tag byte.
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parses an on-disk tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x10 => Some(StorageKind::Float8),
            0x20 => Some(StorageKind::Float32),
            0x30 => Some(StorageKind::E4M3),
            _ => None,
        }
    }
}

/// Encodes one scalar to the int8 representation. Saturating.
#[inline]
pub fn encode_f8(value: f32) -> u8 {
    (value * FLOAT8_SCALE).clamp(-FLOAT8_SCALE, FLOAT8_SCALE).round() as i8 as u8
}

/// Decodes one int8 byte back to `f32`.
#[inline]
pub fn decode_f8(byte: u8) -> f32 {
    byte as i8 as f32 / FLOAT8_SCALE
}

/// Encodes a full vector, appending `input.len() * scalar_size` bytes to
/// `out`. The only fallible kind is E4M3 (out-of-range scalars).
pub fn encode_vector(kind: StorageKind, input: &[f32], out: &mut Vec<u8>) -> Result<()> {
    match kind {
        StorageKind::Float32 => {
            for &v in input {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        StorageKind::Float8 => {
            out.extend(input.iter().map(|&v| encode_f8(v)));
        }
        StorageKind::E4M3 => {
            for &v in input {
                out.push(e4m3::encode(v)?);
            }
        }
    }
    Ok(())
}

/// Decodes an encoded block back to `f32`s, appending to `out`.
pub fn decode_vector(kind: StorageKind, bytes: &[u8], out: &mut Vec<f32>) {
    match kind {
        StorageKind::Float32 => {
            for chunk in bytes.chunks_exact(4) {
                out.push(f32::from_le_bytes(chunk.try_into().expect("4-byte chunk")));
            }
        }
        StorageKind::Float8 => {
            out.extend(bytes.iter().map(|&b| decode_f8(b)));
        }
        StorageKind::E4M3 => {
            out.extend(bytes.iter().map(|&b| e4m3::decode(b)));
        }
    }
}
