use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    routing::get,
    Json, Router,
};

use crate::{
    domain::report::FinancialReport,
    infrastructure::state::AppState,
    services::reports::{ReportQuery, ReportService},
};

use super::{rejection, to_response, ApiError};

pub fn router() -> Router {
    Router::new().route("/", get(get_report))
}

async fn get_report(
    Extension(state): Extension<Arc<AppState>>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Json<FinancialReport>, ApiError> {
    let Query(query) = query.map_err(rejection)?;
    let service = ReportService::new(state);
    let report = service
        .get_report(&query.owner_id, query.period.as_deref())
        .await
        .map_err(to_response)?;
    Ok(Json(report))
}
