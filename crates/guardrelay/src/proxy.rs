//! The proxy write endpoint.
//!
//! A device posts `{deviceId, path, data}` and the relay overwrites `path`
//! with `data`. Any alert records the write creates are handed to the alert
//! trigger.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::server::AppState;

/// Plain-text body of the missing-field response.
pub const MISSING_FIELDS: &str = "Missing required fields";

/// A validated proxy write.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyWrite {
    /// Device issuing the write.
    pub device_id: String,
    /// Store path to overwrite.
    pub path: String,
    /// Value to store.
    pub data: Value,
}

impl ProxyWrite {
    /// Validate a request body.
    ///
    /// Returns `None` when any of the three fields is missing, `null`,
    /// `false`, `0` or `""`, or when `deviceId` or `path` is not a string.
    #[must_use]
    pub fn from_body(body: &Value) -> Option<Self> {
        let device_id = non_empty_str(body.get("deviceId"))?;
        let path = non_empty_str(body.get("path"))?;
        let data = body.get("data").filter(|v| is_truthy(v))?;

        Some(Self {
            device_id: device_id.to_string(),
            path: path.to_string(),
            data: data.clone(),
        })
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Response body for completed writes.
#[derive(Debug, Serialize)]
pub struct WriteResult {
    /// Whether the write succeeded.
    pub success: bool,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handle `POST` on the proxy route.
pub async fn handle_write(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let Some(write) = ProxyWrite::from_body(&body) else {
        warn!("Proxy write rejected: missing required fields");
        return (StatusCode::BAD_REQUEST, MISSING_FIELDS).into_response();
    };

    match state.storage.set(&write.path, &write.data) {
        Ok(created) => {
            info!(
                device_id = %write.device_id,
                path = %write.path,
                alerts = created.len(),
                "Proxy write stored"
            );
            if !created.is_empty() {
                if let Err(e) = state.trigger.fire(created).await {
                    error!(error = %e, "Failed to queue alert notifications");
                }
            }
            (
                StatusCode::OK,
                Json(WriteResult {
                    success: true,
                    error: None,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(device_id = %write.device_id, path = %write.path, error = %e, "Error in proxy");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WriteResult {
                    success: false,
                    error: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}
