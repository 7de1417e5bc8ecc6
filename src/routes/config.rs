//! Per-device configuration route

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeviceConfigQuery {
    mac: Option<String>,
}

/// GET /config?mac={mac}
///
/// Looks the device up in `{data_dir}/config.json` and returns its entry.
pub async fn device_config(
    State(state): State<AppState>,
    Query(query): Query<DeviceConfigQuery>,
) -> Response {
    let Some(mac) = query.mac.as_deref().filter(|mac| !mac.is_empty()) else {
        tracing::error!("config request failed, no mac address provided");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "MAC address required" })),
        )
            .into_response();
    };

    match state.store().device_config(mac).await {
        Ok(Some(entry)) => {
            tracing::info!(mac = %mac, "config request success");
            Json(entry).into_response()
        }
        Ok(None) => {
            tracing::info!(mac = %mac, "config request failed, no entry");
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "MAC address unknown" })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(mac = %mac, error = %e, "config request failed, error reading config file");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            )
                .into_response()
        }
    }
}
