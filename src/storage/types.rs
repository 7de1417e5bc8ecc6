//! Storage types

use serde::{Deserialize, Serialize};

/// One entry in a device's image manifest.
///
/// Type and version are parsed from filenames of the form
/// `{type}_v{major}.{minor}.{patch}{suffix}`, e.g. `dev-x_v1.0.0.bin.zz`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    /// Image type, the filename prefix up to the first `_`.
    #[serde(rename = "type")]
    pub image_type: String,

    /// Version string, e.g. `1.0.0`.
    pub version: String,

    /// Stored filename.
    pub filename: String,
}

/// Error type for image store operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("file not found")]
    NotFound,

    #[error("invalid path component: {0}")]
    InvalidPath(String),

    #[error("invalid config file: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
