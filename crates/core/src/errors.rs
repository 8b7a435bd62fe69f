//! Crate-wide error type.
//!
//! Every fallible public operation returns [`Result`]. Variants group into
//! four families: invalid arguments (dimension mismatch, duplicate label,
//! out-of-range scalar, bad parameter), missing labels, malformed index
//! streams, and internal invariant violations. Nothing is retried
//! internally; batch operations surface the first worker error.

use crate::hnsw::distance::Space;
use crate::quantization::StorageKind;

/// Error type for all index operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A vector's length does not match the index dimensionality.
    #[error("vector has {got} dimensions, but the index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    /// An insert supplied a label that is already live in the index.
    #[error("label {0} is already present in the index")]
    DuplicateLabel(u64),

    /// The requested label does not exist or has been marked deleted.
    #[error("label {0} was not found in the index (or is marked deleted)")]
    LabelNotFound(u64),

    /// A scalar cannot be represented by the configured storage kind.
    #[error("value {value} cannot be stored as {kind:?}: outside [{min}, {max}]")]
    ValueOutOfRange {
        value: f32,
        kind: StorageKind,
        min: f32,
        max: f32,
    },

    /// A caller-supplied parameter is out of its accepted range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The index is full and automatic growth was not possible.
    #[error("index is at capacity")]
    CapacityExhausted,

    /// An index stream failed validation while loading.
    #[error("invalid index format: {0}")]
    Format(String),

    /// A V1 stream's recorded parameters disagree with the caller's.
    #[error("index file declares {field} = {in_file}, but the caller specified {supplied}")]
    ParameterMismatch {
        field: &'static str,
        in_file: String,
        supplied: String,
    },

    /// Reading or writing an index stream failed at the I/O layer.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An internal invariant was violated. The index may be corrupted.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn space_mismatch(in_file: Space, supplied: Space) -> Self {
        Error::ParameterMismatch {
            field: "space",
            in_file: format!("{in_file:?}"),
            supplied: format!("{supplied:?}"),
        }
    }

    pub(crate) fn dimension_mismatch_on_load(in_file: u32, supplied: usize) -> Self {
        Error::ParameterMismatch {
            field: "num_dimensions",
            in_file: in_file.to_string(),
            supplied: supplied.to_string(),
        }
    }

    pub(crate) fn storage_mismatch(in_file: StorageKind, supplied: StorageKind) -> Self {
        Error::ParameterMismatch {
            field: "storage_kind",
            in_file: format!("{in_file:?}"),
            supplied: format!("{supplied:?}"),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
