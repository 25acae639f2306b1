//! Errors from feed ingestion

use std::path::PathBuf;
use thiserror::Error;
use vigil_core::GraphError;
use vigil_misp::TransportError;

/// Errors setting up a feed instance
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Instance {0} has no url configured")]
    MissingUrl(String),

    #[error("Instance {0} has no API key configured")]
    MissingKey(String),

    #[error("Instance endpoint: {0}")]
    Endpoint(#[from] TransportError),
}

/// Errors reading or writing the cursor file
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("Cursor file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cursor file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Could not encode cursors: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Per-attribute enrichment failure. Logged and skipped, never fatal.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Attribute has no owning event id")]
    MissingEventId,

    #[error(transparent)]
    Graph(#[from] GraphError),
}
