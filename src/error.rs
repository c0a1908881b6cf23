//! Error types for acq-catalog

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while cataloging an acquisition session
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("setup parameters have not been computed; call store_setup_params first")]
    SetupParamsNotComputed,

    #[error("unique metadata has not been computed; call store_unique_metadata first")]
    UniqueMetaNotComputed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
