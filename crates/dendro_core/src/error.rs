//! Error types for dendro core.

use crate::types::{NodeId, RevisionNumber};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in dendro core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] dendro_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No resource with the given name exists.
    #[error("resource not found: {name}")]
    ResourceNotFound {
        /// Name of the missing resource.
        name: String,
    },

    /// The requested revision has not been committed.
    #[error("revision not found: {revision}")]
    RevisionNotFound {
        /// The revision that was requested.
        revision: RevisionNumber,
    },

    /// A write addressed a node that is neither present nor newly created.
    #[error("node not found: {node}")]
    NodeNotFound {
        /// The node that was addressed.
        node: NodeId,
    },

    /// A write transaction is already active on the resource.
    ///
    /// The caller decides whether and when to retry; the engine never
    /// blocks or retries on its own.
    #[error("write conflict: another write transaction is active")]
    WriteConflict,

    /// The transaction has already been committed, aborted, or closed.
    #[error("transaction is closed")]
    TransactionClosed,

    /// The resource was dropped or its database was closed.
    #[error("resource is closed")]
    ResourceClosed,

    /// The database handle has been closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Another process holds the database directory lock.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// A hash query was made on a resource whose hash strategy is `None`.
    #[error("hashing is disabled for this resource")]
    HashUnsupported,

    /// Stored data failed verification.
    ///
    /// Never repaired silently; always surfaced to the caller.
    #[error("corruption detected: {message}")]
    CorruptionDetected {
        /// Description of the corruption.
        message: String,
    },

    /// Invalid file format or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a resource-not-found error.
    pub fn resource_not_found(name: impl Into<String>) -> Self {
        Self::ResourceNotFound { name: name.into() }
    }

    /// Creates a revision-not-found error.
    #[must_use]
    pub fn revision_not_found(revision: RevisionNumber) -> Self {
        Self::RevisionNotFound { revision }
    }

    /// Creates a node-not-found error.
    #[must_use]
    pub fn node_not_found(node: NodeId) -> Self {
        Self::NodeNotFound { node }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::CorruptionDetected {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
