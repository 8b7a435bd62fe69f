//! Typed vector store.
//!
//! A fixed-dimension arena of encoded vectors. Each slot holds the
//! encoded scalars and, for cosine indexes, a trailing 4-byte
//! pre-normalization norm: cosine vectors are normalized *once* before
//! encoding (re-normalizing lossy storage would drift), and the stored
//! norm lets [`VectorStore::decoded`] return the original direction and
//! magnitude.
//!
//! Distances are evaluated directly over the encoded bytes; nothing here
//! materializes an intermediate `f32` vector.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::errors::{Error, Result};
use crate::hnsw::distance::Space;
use crate::quantization::{decode_vector, encode_vector, kernels, StorageKind};
use crate::storage::slab::ByteSlab;

/// Keeps the zero vector from dividing by zero when normalizing.
const NORM_EPSILON: f32 = 1e-30;

/// Normalizes `v` to unit length, returning the scaled copy and the
/// original L2 norm.
pub fn normalized(v: &[f32]) -> (Vec<f32>, f32) {
    let norm = kernels::norm_sq(v).sqrt();
    let inv = 1.0 / (norm + NORM_EPSILON);
    (v.iter().map(|&x| x * inv).collect(), norm)
}

/// Portable software prefetch hint (L1 cache, read). No-op elsewhere.
#[inline(always)]
fn prefetch_read(ptr: *const u8) {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        std::arch::asm!(
            "prfm pldl1keep, [{ptr}]",
            ptr = in(reg) ptr,
            options(nostack, preserves_flags)
        );
    }
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::x86_64::_mm_prefetch(ptr as *const i8, std::arch::x86_64::_MM_HINT_T0);
    }
    #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
    let _ = ptr;
}

/// Fixed-dimension arena of encoded vectors.
#[derive(Debug)]
pub struct VectorStore {
    dim: usize,
    kind: StorageKind,
    space: Space,
    scalar_bytes: usize,
    slab: ByteSlab,
    /// Largest pre-normalization norm seen (f32 bits). Cosine only.
    max_norm_bits: AtomicU32,
}

impl VectorStore {
    pub fn new(dim: usize, kind: StorageKind, space: Space, capacity: usize) -> Self {
        let scalar_bytes = dim * kind.scalar_size();
        let slot_size = scalar_bytes + if space.normalizes() { 4 } else { 0 };
        Self {
            dim,
            kind,
            space,
            scalar_bytes,
            slab: ByteSlab::new(slot_size, capacity),
            max_norm_bits: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    #[inline]
    pub fn space(&self) -> Space {
        self.space
    }

    /// Stored bytes per vector, including the norm field when present.
    #[inline]
    pub fn bytes_per_vector(&self) -> usize {
        self.slab.slot_size()
    }

    #[inline]
    pub fn stores_norm(&self) -> bool {
        self.space.normalizes()
    }

    /// Largest pre-normalization norm stored so far; 0 for non-cosine.
    pub fn max_norm(&self) -> f32 {
        f32::from_bits(self.max_norm_bits.load(Ordering::Acquire))
    }

    pub(crate) fn set_max_norm(&self, norm: f32) {
        self.max_norm_bits.store(norm.to_bits(), Ordering::Release);
    }

    fn observe_norm(&self, norm: f32) {
        // Norms are non-negative, so their bit patterns order like floats.
        self.max_norm_bits.fetch_max(norm.to_bits(), Ordering::AcqRel);
    }

    /// Encodes a caller vector into a slot-sized byte block.
    ///
    /// Cosine indexes normalize first and append the pre-norm; other
    /// spaces encode verbatim. Fails on dimension mismatch or scalars the
    /// storage kind cannot represent.
    pub fn encode(&self, input: &[f32]) -> Result<Vec<u8>> {
        if input.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                got: input.len(),
            });
        }
        let mut block = Vec::with_capacity(self.bytes_per_vector());
        if self.stores_norm() {
            let (unit, norm) = normalized(input);
            encode_vector(self.kind, &unit, &mut block)?;
            block.extend_from_slice(&norm.to_le_bytes());
            self.observe_norm(norm);
        } else {
            encode_vector(self.kind, input, &mut block)?;
        }
        Ok(block)
    }

    /// Writes an encoded block into `slot`.
    ///
    /// # Safety
    ///
    /// Same contract as [`ByteSlab::write_slot`]: the slot is unpublished,
    /// or the caller holds the owning node's link lock for a replace.
    #[inline]
    pub unsafe fn write(&self, slot: u32, block: &[u8]) {
        self.slab.write_slot(slot as usize, block);
    }

    /// The full stored block for a slot (scalars plus any norm field).
    #[inline]
    pub fn block(&self, slot: u32) -> &[u8] {
        self.slab.slot(slot as usize)
    }

    /// Just the encoded scalar region of a slot.
    #[inline]
    pub fn scalars(&self, slot: u32) -> &[u8] {
        &self.slab.slot(slot as usize)[..self.scalar_bytes]
    }

    /// The stored pre-normalization norm, or 1.0 when none is stored.
    #[inline]
    pub fn norm(&self, slot: u32) -> f32 {
        if !self.stores_norm() {
            return 1.0;
        }
        let block = self.slab.slot(slot as usize);
        f32::from_le_bytes(
            block[self.scalar_bytes..self.scalar_bytes + 4]
                .try_into()
                .expect("norm field is 4 bytes"),
        )
    }

    /// Decodes a slot back to `f32`s. For cosine the stored norm is
    /// multiplied back in, recovering the original (pre-normalization)
    /// vector up to quantization error.
    pub fn decoded(&self, slot: u32) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dim);
        decode_vector(self.kind, self.scalars(slot), &mut out);
        if self.stores_norm() {
            let norm = self.norm(slot);
            for x in &mut out {
                *x *= norm;
            }
        }
        out
    }

    /// Distance between two stored vectors.
    #[inline]
    pub fn distance(&self, a: u32, b: u32) -> f32 {
        self.space
            .distance_stored(self.kind, self.scalars(a), self.scalars(b))
    }

    /// Distance between a prepared query (normalized already, for cosine)
    /// and a stored vector.
    #[inline]
    pub fn distance_to_query(&self, slot: u32, query: &[f32]) -> f32 {
        self.space.distance_query(self.kind, query, self.scalars(slot))
    }

    /// Metric distance between two caller vectors, computed the way the
    /// index would see them: both are encoded (and normalized, for
    /// cosine) first, so the answer reflects storage quantization.
    pub fn distance_between(&self, a: &[f32], b: &[f32]) -> crate::errors::Result<f32> {
        let ea = self.encode(a)?;
        let eb = self.encode(b)?;
        Ok(self.space.distance_stored(
            self.kind,
            &ea[..self.scalar_bytes],
            &eb[..self.scalar_bytes],
        ))
    }

    /// Hints the CPU to pull a slot's scalars into L1.
    #[inline(always)]
    pub fn prefetch(&self, slot: u32) {
        let block = self.slab.slot(slot as usize);
        prefetch_read(block.as_ptr());
        if self.scalar_bytes > 64 {
            prefetch_read(unsafe { block.as_ptr().add(64) });
        }
    }

    /// Grows the arena. Caller holds the structural lock exclusively.
    pub fn grow(&mut self, capacity: usize) {
        self.slab.grow(capacity);
    }
}
