//! Financial report queries: one partitioned fetch, one aggregation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::{
    domain::report::{aggregate, FinancialReport, Period},
    infrastructure::state::AppState,
};

use super::errors::ServiceError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub period: Option<String>,
}

pub struct ReportService {
    pub state: Arc<AppState>,
}

impl ReportService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Report for `owner_id`; `period` defaults to all time.
    pub async fn get_report(
        &self,
        owner_id: &str,
        period: Option<&str>,
    ) -> Result<FinancialReport, ServiceError> {
        self.get_report_at(owner_id, period, Utc::now()).await
    }

    /// Same as [`Self::get_report`] with the reference instant fixed by the caller.
    pub async fn get_report_at(
        &self,
        owner_id: &str,
        period: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<FinancialReport, ServiceError> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(ServiceError::Validation("ownerId is required".to_string()));
        }
        let period = match period.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => value.parse::<Period>().map_err(ServiceError::Validation)?,
            None => Period::default(),
        };

        let records = self.state.records.query_by_owner(owner_id).await?;
        let report = aggregate(&records, &period, now);
        info!(
            %owner_id,
            period = %report.period.selector,
            fetched = records.len(),
            counted = report.total_invoices,
            "financial report computed"
        );
        Ok(report)
    }
}
