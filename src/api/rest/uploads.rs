use std::sync::Arc;

use axum::{
    extract::{rejection::PathRejection, Extension, Path},
    http::{header, HeaderMap},
    Json,
};
use bytes::Bytes;

use crate::{infrastructure::state::AppState, services::invoices::InvoiceService};

use super::{rejection, to_response, ApiError};

/// Target of locally issued upload links; plays the part of the object
/// store's "bytes received" notification.
pub async fn receive_upload(
    Extension(state): Extension<Arc<AppState>>,
    key: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Path(key) = key.map_err(rejection)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream");
    let service = InvoiceService::new(state);
    let invoice = service
        .receive_upload(&key, body, content_type)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "invoice": invoice })))
}
