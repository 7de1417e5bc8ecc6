//! Chunk Validator
//!
//! Pure checks on an incoming chunk request: serial format, filename safety,
//! and the streaming size ceilings. Sequencing checks (chunk index against
//! the session's expected index) live with the session state machine, which
//! owns the values they compare against.

use crate::upload::types::{UploadError, SERIAL_LEN};

/// Validate a device serial: fixed-length hexadecimal, case-insensitive.
pub fn validate_serial(serial: &str) -> Result<(), UploadError> {
    if serial.len() == SERIAL_LEN && serial.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(UploadError::InvalidSerial)
    }
}

/// Validate an upload filename: a single path component, no traversal.
pub fn validate_filename(filename: &str) -> Result<(), UploadError> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0')
    {
        return Err(UploadError::InvalidFilename);
    }
    Ok(())
}

/// Check the streaming ceilings for one arriving body frame.
///
/// `chunk_bytes` is the chunk's size so far including this frame;
/// `prior_bytes` is everything the session wrote for earlier chunks.
pub fn check_ceilings(
    prior_bytes: u64,
    chunk_bytes: u64,
    max_chunk_size: u64,
    max_file_size: u64,
) -> Result<(), UploadError> {
    if chunk_bytes > max_chunk_size {
        return Err(UploadError::ChunkTooLarge {
            max: max_chunk_size,
        });
    }
    if prior_bytes + chunk_bytes > max_file_size {
        return Err(UploadError::FileTooLarge { max: max_file_size });
    }
    Ok(())
}
