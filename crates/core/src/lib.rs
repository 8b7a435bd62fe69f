//! # argonaut-core
//!
//! Embeddable in-memory approximate-nearest-neighbor engine: an HNSW
//! proximity graph over quantized vector storage, with three distance
//! metrics (squared Euclidean, inner product, cosine), three per-scalar
//! storage encodings (f32, int8, E4M3), batch insert/query across worker
//! threads, mark-and-replace deletion, and a versioned binary format.
//!
//! This is the core library crate with zero async dependencies, suitable
//! for embedding directly in Rust services or behind language bindings.
//!
//! ```no_run
//! use argonaut_core::{Index, IndexOptions, Space};
//!
//! # fn main() -> argonaut_core::Result<()> {
//! let index = Index::new(Space::Euclidean, 3, IndexOptions::default())?;
//! index.add_item(&[1.0, 0.0, 0.0], None)?;
//! index.add_item(&[0.0, 1.0, 0.0], None)?;
//! let nearest = index.query(&[0.9, 0.1, 0.0], 1, None)?;
//! assert_eq!(nearest[0].label, 0);
//! # Ok(())
//! # }
//! ```

/// Compile-time defaults and limits.
pub mod config;
/// Crate-wide error type and `Result` alias.
pub mod errors;
/// HNSW graph engine: structure, insertion, search, metric dispatch.
pub mod hnsw;
/// Label table and deleted set.
pub mod labels;
/// Scalar storage codecs and distance kernels.
pub mod quantization;
/// Typed vector store and the binary index format.
pub mod storage;

mod index;

pub use errors::{Error, Result};
pub use hnsw::distance::Space;
pub use index::{Index, IndexOptions, Neighbor};
pub use quantization::StorageKind;
pub use storage::persistence::LoadParams;
