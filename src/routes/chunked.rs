//! Chunked upload route
//!
//! `PUT /{serial}/{filename}/chunked?chunk={n}&final={0|1}&hash={hex?}`
//!
//! One request per chunk, body = raw chunk bytes. Chunk 0 starts a session;
//! each chunk must carry the session's next expected index; the `final`
//! chunk triggers the hash-chain finalizer and tears the session down.
//! Bytes are hashed and written as they stream in, so no chunk is ever
//! buffered whole.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::state::AppState;
use crate::upload::{hash_chain, validate, SessionHandle, UploadError, UploadKey, UploadSession};

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    /// Zero-based chunk index; must match the session's expected index.
    chunk: u64,
    /// Nonzero marks the last chunk of the upload.
    #[serde(rename = "final", default)]
    final_flag: u8,
    /// Expected hash-chain value, checked at finalize time.
    hash: Option<String>,
}

impl ChunkQuery {
    fn is_final(&self) -> bool {
        self.final_flag != 0
    }
}

/// PUT /{serial}/{filename}/chunked
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((serial, filename)): Path<(String, String)>,
    Query(query): Query<ChunkQuery>,
    body: Body,
) -> Response {
    let key = UploadKey::new(&serial, &filename);
    match handle_chunk(&state, &key, &query, body).await {
        Ok(()) => (
            StatusCode::OK,
            format!("UPLOAD: {key}: (chunked) success"),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(file = %key, chunk = query.chunk, error = %e, "chunked upload failed");
            (
                e.status_code(),
                format!("UPLOAD: {key}: (chunked) failure, {e}"),
            )
                .into_response()
        }
    }
}

async fn handle_chunk(
    state: &AppState,
    key: &UploadKey,
    query: &ChunkQuery,
    body: Body,
) -> Result<(), UploadError> {
    validate::validate_serial(key.serial())?;
    validate::validate_filename(key.filename())?;

    let registry = state.registry();

    if query.chunk == 0 {
        let path = state.store().prepare(key.serial(), key.filename()).await?;
        let entry = registry.begin(key.clone(), path)?;
        let mut session = entry.lock().await;
        tracing::info!(file = %key, "chunked upload commenced");
        if let Err(e) = session.open_writer().await {
            registry.close(&entry, &mut session);
            return Err(e);
        }
        receive_chunk(state, &entry, &mut session, query, body).await
    } else {
        let entry = registry
            .resume(key)
            .ok_or(UploadError::NoSession(query.chunk))?;
        let mut session = entry.lock().await;
        if session.is_closed() {
            // The watchdog abandoned the session while this request waited.
            return Err(UploadError::NoSession(query.chunk));
        }
        if session.next_chunk() != query.chunk {
            let err = UploadError::OutOfSequence {
                expected: session.next_chunk(),
                got: query.chunk,
            };
            registry.close(&entry, &mut session);
            return Err(err);
        }
        receive_chunk(state, &entry, &mut session, query, body).await
    }
}

/// Stream one chunk's bytes into the session, then advance the state
/// machine: record the chunk, reschedule the watchdog or finalize.
async fn receive_chunk(
    state: &AppState,
    entry: &SessionHandle,
    session: &mut UploadSession,
    query: &ChunkQuery,
    body: Body,
) -> Result<(), UploadError> {
    let registry = state.registry();
    let limits = &state.config().limits;
    let key = session.key().clone();

    let mut stream = body.into_data_stream();
    let mut hasher = Sha256::new();
    let mut chunk_bytes: u64 = 0;
    let mut failure: Option<UploadError> = None;

    while let Some(frame) = stream.next().await {
        let data = match frame {
            Ok(data) => data,
            Err(e) => {
                failure = Some(UploadError::Storage(e.to_string()));
                break;
            }
        };
        chunk_bytes += data.len() as u64;
        if let Err(e) = validate::check_ceilings(
            session.bytes_written(),
            chunk_bytes,
            limits.max_chunk_size,
            limits.max_file_size,
        ) {
            failure = Some(e);
            break;
        }
        if let Err(e) = session.write_frame(&data).await {
            failure = Some(e);
            break;
        }
        hasher.update(&data);
    }

    // A mid-stream abort records no chunk hash and terminates the session;
    // whatever bytes already reached the destination stay on disk.
    if let Some(e) = failure {
        registry.close(entry, session);
        return Err(e);
    }
    if let Err(e) = session.flush().await {
        registry.close(entry, session);
        return Err(e);
    }

    if chunk_bytes == 0 {
        // A zero-byte final marker is permitted only after at least one
        // data-carrying chunk; everything else is an empty chunk.
        if !query.is_final() || session.chunk_hashes().is_empty() {
            // Delete before closing: the key must stay registered while the
            // unlink is in flight, or it could hit a successor's file.
            if query.is_final() && session.chunk_hashes().is_empty() {
                remove_file_logged(&key, session.path()).await;
            }
            registry.close(entry, session);
            return Err(UploadError::EmptyChunk);
        }
        tracing::info!(
            file = %key,
            chunk = query.chunk,
            is_final = query.is_final(),
            "chunked receive (marker)"
        );
    } else {
        let chunk_hash = hex::encode(hasher.finalize());
        tracing::info!(
            file = %key,
            chunk = query.chunk,
            is_final = query.is_final(),
            bytes = chunk_bytes,
            hash = %chunk_hash,
            "chunked receive"
        );
        session.record_chunk(chunk_hash, chunk_bytes);
    }

    if query.is_final() {
        finalize(state, entry, session, query.hash.as_deref()).await;
    } else {
        registry.reschedule(entry, session);
    }
    Ok(())
}

/// Reduce the ordered chunk hashes and reconcile against the client's
/// expected value. Runs after the success response is already determined:
/// a mismatch deletes the file and is logged, never reported to the client.
async fn finalize(
    state: &AppState,
    entry: &SessionHandle,
    session: &mut UploadSession,
    expected: Option<&str>,
) {
    let key = session.key().clone();
    let bytes = session.bytes_written();
    let computed = hash_chain::fold_chunk_hashes(session.chunk_hashes());

    // Empty hash history cannot reach this point; the empty-chunk check
    // rejects a final marker with no prior data.
    if let Some(file_hash) = computed {
        match expected {
            Some(expected) if expected != file_hash => {
                tracing::warn!(
                    file = %key,
                    bytes,
                    hash = %file_hash,
                    expected = %expected,
                    "chunked finalize failed, hash mismatch"
                );
                // The mismatched file goes away while the key is still
                // registered, so a restarted upload cannot lose its file
                // to this unlink.
                remove_file_logged(&key, session.path()).await;
            }
            _ => {
                tracing::info!(file = %key, bytes, hash = %file_hash, "chunked finalize success");
            }
        }
    }
    state.registry().close(entry, session);
}

async fn remove_file_logged(key: &UploadKey, path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::error!(file = %key, error = %e, "could not delete partial file");
        }
    }
}
