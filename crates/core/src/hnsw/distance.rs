//! Distance metric dispatch.
//!
//! Three metrics, all returning "lower is better" dissimilarities:
//! squared Euclidean, inner-product dissimilarity (`1 - dot`, may be
//! negative), and cosine dissimilarity. Cosine shares the inner-product
//! kernel: vectors in a cosine index are normalized once before encoding,
//! and queries are normalized on the way in, so `1 - dot` over the stored
//! bytes *is* the cosine dissimilarity.
//!
//! Dispatch is a match over `(Space, StorageKind)` into monomorphic
//! kernels; the hot loops see no dynamic calls.

use serde::{Deserialize, Serialize};

use crate::quantization::{kernels, StorageKind};

/// The space (distance metric) an index searches in.
///
/// Discriminants are the on-disk `space` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Space {
    /// Squared L2 distance. The square root is never taken; ordering is
    /// identical and the squared form is cheaper.
    Euclidean = 0,
    /// `1 - dot(u, v)`. Can be negative for un-normalized data.
    InnerProduct = 1,
    /// `1 - dot(u, v)` over unit-normalized operands. Range [0, 2].
    Cosine = 2,
}

impl Space {
    /// The on-disk tag byte.
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parses an on-disk tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Space::Euclidean),
            1 => Some(Space::InnerProduct),
            2 => Some(Space::Cosine),
            _ => None,
        }
    }

    /// Whether vectors are unit-normalized before they are encoded.
    #[inline]
    pub fn normalizes(self) -> bool {
        matches!(self, Space::Cosine)
    }

    /// Distance between two stored (encoded) scalar blocks.
    #[inline]
    pub fn distance_stored(self, kind: StorageKind, a: &[u8], b: &[u8]) -> f32 {
        match self {
            Space::Euclidean => match kind {
                StorageKind::Float32 => kernels::l2_sq_f32(a, b),
                StorageKind::Float8 => kernels::l2_sq_f8(a, b),
                StorageKind::E4M3 => kernels::l2_sq_e4m3(a, b),
            },
            // Cosine operands are already normalized, so both reduce to 1 - dot.
            Space::InnerProduct | Space::Cosine => match kind {
                StorageKind::Float32 => 1.0 - kernels::dot_f32(a, b),
                StorageKind::Float8 => 1.0 - kernels::dot_f8(a, b),
                StorageKind::E4M3 => 1.0 - kernels::dot_e4m3(a, b),
            },
        }
    }

    /// Distance between a transient `f32` query and a stored block.
    ///
    /// For cosine the query must already be unit-normalized.
    #[inline]
    pub fn distance_query(self, kind: StorageKind, query: &[f32], stored: &[u8]) -> f32 {
        match self {
            Space::Euclidean => match kind {
                StorageKind::Float32 => kernels::l2_sq_query_f32(query, stored),
                StorageKind::Float8 => kernels::l2_sq_query_f8(query, stored),
                StorageKind::E4M3 => kernels::l2_sq_query_e4m3(query, stored),
            },
            Space::InnerProduct | Space::Cosine => match kind {
                StorageKind::Float32 => 1.0 - kernels::dot_query_f32(query, stored),
                StorageKind::Float8 => 1.0 - kernels::dot_query_f8(query, stored),
                StorageKind::E4M3 => 1.0 - kernels::dot_query_e4m3(query, stored),
            },
        }
    }
}
