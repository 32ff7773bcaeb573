use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Extension, Path, Query,
    },
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::Deserialize;

use crate::{
    domain::models::ExtractedFields,
    infrastructure::state::AppState,
    services::{
        errors::ServiceError,
        invoices::{InvoiceService, NewInvoice},
    },
};

use super::{rejection, to_response, ApiError};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices).post(upload_invoice))
        .route("/upload-link", post(generate_upload_link))
        .route("/:owner_id/:invoice_id/uploaded", post(confirm_upload))
        .route("/:owner_id/:invoice_id/process", post(process_invoice))
        .route("/:owner_id/:invoice_id/extraction", post(apply_extraction))
        .route("/:owner_id/:invoice_id/failure", post(mark_failed))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnerQuery {
    #[serde(default)]
    owner_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest {
    #[serde(flatten)]
    invoice: NewInvoice,
    file_content: String,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadLinkRequest {
    #[serde(flatten)]
    invoice: NewInvoice,
    content_type: String,
}

#[derive(Debug, Deserialize)]
struct FailureRequest {
    reason: String,
}

async fn list_invoices(
    Extension(state): Extension<Arc<AppState>>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(query) = query.map_err(rejection)?;
    let service = InvoiceService::new(state);
    let invoices = service
        .list_invoices(&query.owner_id)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "invoices": invoices })))
}

async fn upload_invoice(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(payload) = payload.map_err(rejection)?;
    let content = STANDARD
        .decode(payload.file_content.trim())
        .map_err(|err| {
            to_response(ServiceError::Validation(format!(
                "fileContent is not base64: {err}"
            )))
        })?;
    let content_type = payload
        .content_type
        .as_deref()
        .unwrap_or("application/pdf");
    let service = InvoiceService::new(state);
    let invoice = service
        .upload_invoice(&payload.invoice, Bytes::from(content), content_type)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "invoice": invoice })))
}

async fn generate_upload_link(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<UploadLinkRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(payload) = payload.map_err(rejection)?;
    let service = InvoiceService::new(state);
    let link = service
        .generate_upload_link(&payload.invoice, &payload.content_type)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "uploadLink": link })))
}

async fn confirm_upload(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Path((owner_id, invoice_id)) = path.map_err(rejection)?;
    let service = InvoiceService::new(state);
    let invoice = service
        .confirm_upload(&owner_id, &invoice_id)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "invoice": invoice })))
}

async fn process_invoice(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Path((owner_id, invoice_id)) = path.map_err(rejection)?;
    let service = InvoiceService::new(state);
    let invoice = service
        .process_invoice(&owner_id, &invoice_id)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "invoice": invoice })))
}

async fn apply_extraction(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
    fields: Result<Json<ExtractedFields>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Path((owner_id, invoice_id)) = path.map_err(rejection)?;
    let Json(fields) = fields.map_err(rejection)?;
    let service = InvoiceService::new(state);
    let invoice = service
        .apply_extraction_result(&owner_id, &invoice_id, &fields)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "invoice": invoice })))
}

async fn mark_failed(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
    payload: Result<Json<FailureRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Path((owner_id, invoice_id)) = path.map_err(rejection)?;
    let Json(payload) = payload.map_err(rejection)?;
    let service = InvoiceService::new(state);
    let invoice = service
        .mark_failed(&owner_id, &invoice_id, &payload.reason)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "invoice": invoice })))
}
