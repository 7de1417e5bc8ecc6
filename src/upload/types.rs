//! Chunked-upload types

use std::fmt;

use axum::http::StatusCode;

/// Required length of a device serial, in hex characters.
pub const SERIAL_LEN: usize = 8;

// ============================================================================
// Upload Key
// ============================================================================

/// Identity of one logical in-flight upload: `(serial, filename)`.
///
/// At most one upload session exists per key at any time; the registry
/// enforces this. Displays as `serial/filename`, which is the form used in
/// log lines and response text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadKey {
    serial: String,
    filename: String,
}

impl UploadKey {
    /// Build a key from an already-validated serial and filename.
    /// The serial is lowercased so that case variants select one session.
    pub fn new(serial: &str, filename: &str) -> Self {
        Self {
            serial: serial.to_lowercase(),
            filename: filename.to_string(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl fmt::Display for UploadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.serial, self.filename)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Chunked-upload error taxonomy.
///
/// Validation and sequencing errors map to 400 and terminate the session;
/// storage failures map to 500 and terminate the session. Timeout and
/// finalize-time hash mismatches are logged server-side only and never
/// appear here.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("bad serial number")]
    InvalidSerial,

    #[error("bad file name")]
    InvalidFilename,

    #[error("no upload in progress for chunk {0}")]
    NoSession(u64),

    #[error("bad chunk number {got} (expected {expected})")]
    OutOfSequence { expected: u64, got: u64 },

    #[error("upload already in progress")]
    ConflictingSession,

    #[error("chunk too large (maximum is {max})")]
    ChunkTooLarge { max: u64 },

    #[error("file too large (maximum is {max})")]
    FileTooLarge { max: u64 },

    #[error("empty chunk received")]
    EmptyChunk,

    #[error("storage error: {0}")]
    Storage(String),
}

impl UploadError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<crate::storage::StorageError> for UploadError {
    fn from(e: crate::storage::StorageError) -> Self {
        match e {
            crate::storage::StorageError::InvalidPath(_) => Self::InvalidFilename,
            other => Self::Storage(other.to_string()),
        }
    }
}
