//! Errors raised by graph and link operations

use thiserror::Error;

use crate::NodeKind;

/// Errors from graph store and link manager operations
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown node kind: {0}")]
    UnknownKind(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid {kind} value: {value:?}")]
    InvalidValue { kind: NodeKind, value: String },

    /// Creation failed; the cause is logged, never returned to the caller
    #[error("Link could not be created")]
    Rejected,

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// How the CRUD surface should reject a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Malformed or unacceptable input (400)
    BadRequest,
    /// Unknown kind or missing node/link (404)
    NotFound,
    /// Storage failure (500)
    Internal,
}

impl GraphError {
    /// Map this error to a client-facing rejection class
    pub fn rejection(&self) -> Rejection {
        match self {
            GraphError::Validation(_) | GraphError::InvalidValue { .. } | GraphError::Rejected => {
                Rejection::BadRequest
            }
            GraphError::UnknownKind(_) | GraphError::NotFound(_) => Rejection::NotFound,
            GraphError::Io(_) | GraphError::Serialization(_) => Rejection::Internal,
        }
    }
}
