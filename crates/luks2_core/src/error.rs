//! Error types for LUKS2 core.

use crate::header::SlotKind;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in LUKS2 core operations.
///
/// Lookups that miss are not errors; they return `None`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error outside of a header commit.
    #[error("storage error: {0}")]
    Storage(#[from] luks2_storage::StorageError),

    /// A required input was empty or absent.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the bad argument.
        message: String,
    },

    /// Growing an in-memory collection failed.
    #[error("out of memory")]
    OutOfMemory,

    /// A single header slot failed structural or checksum validation.
    #[error("corrupt header: {message}")]
    CorruptHeader {
        /// Description of the corruption.
        message: String,
    },

    /// Neither header slot survived validation.
    #[error("no valid header: primary: {primary}; secondary: {secondary}")]
    IntegrityFailure {
        /// Why the primary slot was rejected.
        primary: String,
        /// Why the secondary slot was rejected.
        secondary: String,
    },

    /// The metadata document is malformed or breaks a schema invariant.
    #[error("invalid metadata: {message}")]
    InvalidMetadata {
        /// Description of the problem.
        message: String,
    },

    /// The serialized document does not fit the document area.
    #[error("metadata too large: {size} bytes, document area holds {capacity}")]
    MetadataTooLarge {
        /// Serialized document size in bytes.
        size: usize,
        /// Usable document area in bytes.
        capacity: usize,
    },

    /// Writing a header slot failed.
    #[error("failed to write {slot} header: {source}")]
    WriteFailed {
        /// The slot being written.
        slot: SlotKind,
        /// The underlying storage failure.
        #[source]
        source: luks2_storage::StorageError,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a corrupt header error.
    pub fn corrupt_header(message: impl Into<String>) -> Self {
        Self::CorruptHeader {
            message: message.into(),
        }
    }

    /// Creates an invalid metadata error.
    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a write failure for `slot`.
    pub fn write_failed(slot: SlotKind, source: luks2_storage::StorageError) -> Self {
        Self::WriteFailed { slot, source }
    }

    /// Returns true if the error means the volume must not be used.
    ///
    /// Integrity failures and unparseable metadata are fatal for a load;
    /// write failures leave the volume needing a fresh load.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IntegrityFailure { .. } | Self::InvalidMetadata { .. } | Self::WriteFailed { .. }
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_metadata(err.to_string())
    }
}
