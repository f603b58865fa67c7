//! Storage error types.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g., "task", "attachment").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// An entity with the given id already exists.
    #[error("task already exists: {id}")]
    DuplicateId {
        /// The duplicated id.
        id: String,
    },

    /// Adding a dependency edge would create a cycle.
    #[error("dependency {child_id} -> {parent_id} would create a cycle")]
    CycleDetected {
        /// The child end of the rejected edge.
        child_id: String,
        /// The parent end of the rejected edge.
        parent_id: String,
    },

    /// A uniqueness or precondition constraint was violated.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the violated constraint.
        message: String,
    },

    /// A validation constraint was violated.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// Failed to establish or maintain a database connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A transaction operation failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A schema migration failed.
    #[error("migration {version} failed: {reason}")]
    Migration {
        /// Version of the migration that failed.
        version: i64,
        /// Underlying error description.
        reason: String,
    },

    /// A raw SQLite query error.
    #[error("query error: {0}")]
    Query(#[from] rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    // -- Constructors --------------------------------------------------------

    /// Creates a [`StorageError::NotFound`] for the given entity kind and id.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a [`StorageError::Conflict`] with the given message.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a [`StorageError::Validation`] with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    // -- Predicates ----------------------------------------------------------

    /// Returns `true` if this is a [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for duplicate-id, cycle, and generic conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::DuplicateId { .. } | Self::CycleDetected { .. } | Self::Conflict { .. }
        )
    }
}
