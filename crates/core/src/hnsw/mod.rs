//! Hierarchical Navigable Small World (HNSW) graph engine.
//!
//! A multi-layer proximity graph over slots in the typed vector store.
//! Upper layers form an expressway of long links for greedy descent;
//! layer 0 holds the dense neighborhood structure that the bounded
//! best-first search explores. Neighbor lists live in preallocated atomic
//! word slabs so adjacency sits at fixed offsets, concurrent inserts
//! coordinate through one-byte per-node locks, and the on-disk layout can
//! mirror memory.

/// Distance metric dispatch across storage kinds.
pub mod distance;
/// Graph structure: parameters, adjacency slabs, level sampling.
pub mod graph;
/// Insertion with diversity pruning and bidirectional linking.
pub(crate) mod insert;
/// Layer search, greedy descent, and multi-layer k-NN.
pub(crate) mod search;
/// Generation-stamped visited set and pool.
pub mod visited;

pub use distance::Space;
pub use graph::HnswGraph;
