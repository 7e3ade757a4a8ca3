use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::TargetId;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("unknown target id: {0}")]
    InvalidTargetId(String),

    #[error("{target} requires {requires} (run the upstream target first)")]
    PrerequisiteMissing {
        target: TargetId,
        requires: &'static str,
    },

    #[error("RDE API request failed: {0}")]
    Http(String),

    #[error("RDE API returned status {status}: {message}")]
    ApiStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to persist fetch metadata: {0}")]
    MetadataPersistence(String),

    #[error("failed to read selection config at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse selection config: {0}")]
    ConfigParse(String),
}
