//! Image manifest route

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::state::AppState;
use crate::upload::validate;

#[derive(Debug, Deserialize)]
pub struct ManifestQuery {
    /// Restrict the manifest to one image type.
    #[serde(rename = "type")]
    image_type: Option<String>,
}

/// GET /{serial}/images.json?type={t}
///
/// Lists the newest stored image per type for a device, with type and
/// version parsed from the stored filenames.
pub async fn manifest(
    State(state): State<AppState>,
    Path(serial): Path<String>,
    Query(query): Query<ManifestQuery>,
) -> Response {
    if validate::validate_serial(&serial).is_err() {
        return (
            StatusCode::BAD_REQUEST,
            format!("MANIFEST: {serial}: failure, bad serial number"),
        )
            .into_response();
    }

    let mut manifest = match state.store().list_images(&serial).await {
        Ok(manifest) => manifest,
        Err(e) => {
            tracing::error!(serial = %serial, error = %e, "manifest listing failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Storage error").into_response();
        }
    };

    if let Some(image_type) = &query.image_type {
        manifest.retain(|entry| &entry.image_type == image_type);
    }

    tracing::info!(
        serial = %serial,
        items = manifest.len(),
        image_type = query.image_type.as_deref().unwrap_or("unspecified"),
        "manifest request"
    );
    Json(manifest).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::{Config, StorageConfig};
    use crate::routes;
    use crate::state::AppState;
    use crate::storage::ImageEntry;

    #[tokio::test]
    async fn manifest_lists_and_filters_by_type() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            storage: StorageConfig {
                data_dir: dir.path().to_path_buf(),
                images_dir: dir.path().join("images"),
            },
            ..Config::default()
        };
        let state = AppState::new(config).await.unwrap();
        state.store().write("deadbeef", "dev-x_v1.0.0.bin.zz", b"a").await.unwrap();
        state.store().write("deadbeef", "dev-x_v1.1.0.bin.zz", b"b").await.unwrap();
        state.store().write("deadbeef", "dev-y_v2.0.0.bin.zz", b"c").await.unwrap();
        let app = routes::router(state);

        let get = Request::builder()
            .uri("/deadbeef/images.json")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let manifest: Vec<ImageEntry> = serde_json::from_slice(&body).unwrap();
        assert_eq!(manifest.len(), 2);

        let get = Request::builder()
            .uri("/deadbeef/images.json?type=dev-x")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(get).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let manifest: Vec<ImageEntry> = serde_json::from_slice(&body).unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].version, "1.1.0");
    }
}
