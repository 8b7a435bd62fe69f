//! Global configuration constants for argonaut.
//!
//! Compile-time defaults and validation limits. Per-index tuning is done
//! through `IndexOptions` at construction time; these are the fallbacks.

/// Default number of bidirectional links per HNSW node at levels >= 1.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 16-48.
pub const DEFAULT_M: usize = 16;

/// Default candidate-list width during index construction.
///
/// Higher values produce a better graph but slow down insertion.
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default candidate-list width during search.
///
/// Raised per query when the requested `k` exceeds it.
pub const DEFAULT_EF_SEARCH: usize = 50;

/// Default seed for the level-sampling PRNG.
pub const DEFAULT_RANDOM_SEED: u64 = 1;

/// Initial element capacity for a freshly created index.
///
/// Capacity doubles whenever an insert would exceed it.
pub const DEFAULT_INITIAL_CAPACITY: usize = 1;

/// Hard ceiling on `M`. Degrees beyond this are capped with a warning.
pub const MAX_M: usize = 10_000;

/// Internal indices are `u32`; capacity may never exceed this.
pub const MAX_ELEMENTS: usize = u32::MAX as usize;

/// Ceiling on vector dimensionality. Generous for any real embedding, and
/// keeps a forged stream header from driving per-vector allocations.
pub const MAX_DIMENSIONS: usize = 1 << 20;

/// Batches at or below `4 * threads` rows run single-threaded; thread
/// startup dominates at that size.
pub const SMALL_BATCH_FACTOR: usize = 4;

/// Factor by which capacity grows when an insert finds the index full.
pub const CAPACITY_GROWTH_FACTOR: usize = 2;

/// Cosine dissimilarities this far below zero are clamped to zero
/// (floating-point noise on self-queries).
pub const NEGATIVE_DISTANCE_SLACK: f32 = 1e-5;

/// Wider clamp for int8 storage, whose unit vectors round off the sphere.
pub const NEGATIVE_DISTANCE_SLACK_F8: f32 = 0.03;

/// Widest clamp, for E4M3 storage with its larger quantization error.
pub const NEGATIVE_DISTANCE_SLACK_E4M3: f32 = 0.14;
