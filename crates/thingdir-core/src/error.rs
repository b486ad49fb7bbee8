//! Directory error taxonomy
//!
//! Store operations return `DirError`. The server maps each variant to a wire
//! `ErrorKind` without changing its meaning, and the client re-surfaces that
//! kind to its caller.

use thiserror::Error;

use crate::protocol::ErrorKind;
use crate::query::QueryError;
use crate::storage::StorageError;

/// Errors returned by directory operations
#[derive(Error, Debug)]
pub enum DirError {
    /// The document does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Strict create on an ID that is already taken
    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    /// Malformed pagination, payload or ID
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Authentication failed or the authorizer denied a write
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The filter expression could not be parsed
    #[error("Query syntax error: {0}")]
    QuerySyntax(#[from] QueryError),

    /// File I/O or serialization failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Unexpected encoding failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DirError {
    /// Protocol-level classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DirError::NotFound(_) => ErrorKind::NotFound,
            DirError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            DirError::BadRequest(_) | DirError::QuerySyntax(_) => ErrorKind::BadRequest,
            DirError::Unauthorized(_) => ErrorKind::Unauthorized,
            DirError::Storage(_) | DirError::Internal(_) => ErrorKind::InternalError,
        }
    }
}

/// Result type for directory operations
pub type DirResult<T> = Result<T, DirError>;
