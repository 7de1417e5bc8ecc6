//! Image download and single-request upload routes
//!
//! Stateless request/response mappings over the image store. The
//! single-request upload never touches chunked session state.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;

use crate::state::AppState;
use crate::storage::StorageError;
use crate::upload::hash_chain::sha256_hex;
use crate::upload::{validate, UploadKey};

/// GET /{serial}/{filename}
///
/// Streams the stored file or 404s.
pub async fn download(
    State(state): State<AppState>,
    Path((serial, filename)): Path<(String, String)>,
) -> Response {
    let key = UploadKey::new(&serial, &filename);
    if validate::validate_serial(key.serial()).is_err() {
        return (
            StatusCode::BAD_REQUEST,
            format!("DOWNLOAD: {key}: failure, bad serial number"),
        )
            .into_response();
    }

    let file = match state.store().open(key.serial(), key.filename()).await {
        Ok(file) => file,
        Err(StorageError::NotFound) => {
            return (
                StatusCode::NOT_FOUND,
                format!("DOWNLOAD: {key}: failure, file not found"),
            )
                .into_response();
        }
        Err(StorageError::InvalidPath(_)) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("DOWNLOAD: {key}: failure, bad file name"),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!(file = %key, error = %e, "download failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Storage error").into_response();
        }
    };

    let size = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            tracing::error!(file = %key, error = %e, "download failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Storage error").into_response();
        }
    };

    tracing::info!(file = %key, bytes = size, "download success");

    let body = Body::from_stream(ReaderStream::new(file));
    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, size)
        .body(body)
    {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(file = %key, error = %e, "download failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Storage error").into_response()
        }
    }
}

/// PUT /{serial}/{filename}
///
/// Accepts one whole-file body, hashes it, and overwrites/creates the file.
pub async fn upload(
    State(state): State<AppState>,
    Path((serial, filename)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let key = UploadKey::new(&serial, &filename);
    if validate::validate_serial(key.serial()).is_err() {
        return (
            StatusCode::BAD_REQUEST,
            format!("UPLOAD: {key}: failure, bad serial number"),
        )
            .into_response();
    }
    if validate::validate_filename(key.filename()).is_err() {
        return (
            StatusCode::BAD_REQUEST,
            format!("UPLOAD: {key}: failure, bad file name"),
        )
            .into_response();
    }
    if body.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            format!("UPLOAD: {key}: failure, file not provided"),
        )
            .into_response();
    }

    let hash = sha256_hex(&body);
    if let Err(e) = state.store().write(key.serial(), key.filename(), &body).await {
        tracing::error!(file = %key, error = %e, "upload failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Storage error").into_response();
    }

    tracing::info!(file = %key, bytes = body.len(), hash = %hash, "upload success");
    (StatusCode::OK, format!("UPLOAD: {key}: success")).into_response()
}
