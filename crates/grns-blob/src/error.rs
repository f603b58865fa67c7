//! Blob store error types.

/// Errors that can occur during blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No blob with the given id exists.
    #[error("blob not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// The id is not a well-formed hex SHA-256.
    #[error("invalid blob id: {id}")]
    InvalidId {
        /// The rejected id.
        id: String,
    },

    /// The bytes on disk no longer hash to the blob's id.
    #[error("blob {id} is corrupt (content hashes to {actual})")]
    Corrupt {
        /// The expected id.
        id: String,
        /// The hash of the bytes actually on disk.
        actual: String,
    },

    /// An underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the blob crate.
pub type Result<T> = std::result::Result<T, BlobError>;

impl BlobError {
    /// Creates a [`BlobError::NotFound`] for the given id.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a [`BlobError::InvalidId`] for the given id.
    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId { id: id.into() }
    }

    /// Creates a [`BlobError::Corrupt`] for the given id.
    pub fn corrupt(id: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            actual: actual.into(),
        }
    }

    /// Returns `true` if this is a [`BlobError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
