use axum::http::StatusCode;
use thiserror::Error;

use crate::infrastructure::records::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found")]
    NotFound,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("external service error: {0}")]
    ExternalService(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Name reported to callers as `errorKind`.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::NotFound => "NotFoundError",
            ServiceError::Validation(_) => "ValidationError",
            ServiceError::Conflict(_) => "ConflictError",
            ServiceError::ExternalService(_) => "ExternalServiceError",
            ServiceError::Internal(_) => "InternalError",
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServiceError::NotFound,
            StoreError::PreconditionFailed { .. } | StoreError::Duplicate => {
                ServiceError::Conflict(err.to_string())
            }
            StoreError::Backend(message) => ServiceError::Internal(message),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}
