//! HTTP routes
//!
//! Route layout (device serials are 8 hex characters):
//! - `GET  /health` - liveness probe
//! - `GET  /config?mac=...` - per-device configuration lookup
//! - `GET  /{serial}/images.json?type=...` - image manifest for a device
//! - `GET  /{serial}/{filename}` - download a stored image
//! - `PUT  /{serial}/{filename}` - single-request whole-file upload
//! - `PUT  /{serial}/{filename}/chunked?chunk=&final=&hash=` - chunked upload

pub mod chunked;
pub mod config;
pub mod files;
pub mod images;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let max_upload = state.config().limits.max_upload_size;

    Router::new()
        .route("/health", get(health_check))
        .route("/config", get(config::device_config))
        .route("/:serial/images.json", get(images::manifest))
        .route(
            "/:serial/:filename",
            get(files::download)
                .put(files::upload)
                .layer(DefaultBodyLimit::max(max_upload)),
        )
        .route(
            "/:serial/:filename/chunked",
            // Chunk bodies are streamed; the validator's ceilings replace
            // the framework's whole-body limit.
            put(chunked::upload_chunk).layer(DefaultBodyLimit::disable()),
        )
        .fallback(|| async { (StatusCode::NOT_FOUND, "not found") })
        .with_state(state)
}
