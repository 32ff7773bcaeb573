use axum::{
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};

use crate::{
    api::rest::{invoices::router as invoices_router, reports::router as reports_router},
    services::errors::ServiceError,
};

pub mod health;
pub mod invoices;
pub mod reports;
pub mod uploads;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/uploads/*key", put(uploads::receive_upload))
        .nest("/invoices", invoices_router())
        .nest("/reports", reports_router())
}

pub type ApiError = (StatusCode, Json<serde_json::Value>);

/// Maps an extractor rejection (bad JSON, path or query) onto the common
/// error body.
pub(crate) fn rejection(err: impl std::fmt::Display) -> ApiError {
    to_response(ServiceError::Validation(err.to_string()))
}

pub(crate) fn to_response(err: ServiceError) -> ApiError {
    if let ServiceError::Internal(message) = &err {
        tracing::error!(error = %message, "request failed");
    }
    (
        err.status_code(),
        Json(serde_json::json!({ "errorKind": err.kind(), "message": err.to_string() })),
    )
}
