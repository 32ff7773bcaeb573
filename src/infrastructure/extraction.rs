//! Client side of the managed document extraction service.
//!
//! The service is a black box: it receives the location of a stored document
//! and answers with whatever it could read. Nothing it returns is trusted
//! until the lifecycle service has normalised it.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    domain::models::{DocumentLocation, ExtractedFields, RawAmount},
    infrastructure::config::ExtractionConfig,
};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("document extraction is not configured")]
    Disabled,
    #[error("extraction request failed: {0}")]
    Request(String),
    #[error("extraction service answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("extraction response unusable: {0}")]
    Malformed(String),
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, location: &DocumentLocation) -> Result<ExtractedFields, ExtractionError>;
}

pub fn build_extraction_service(
    config: &ExtractionConfig,
) -> anyhow::Result<Arc<dyn ExtractionService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledExtraction)),
        "http" => {
            let Some(endpoint) = config.endpoint.clone() else {
                anyhow::bail!("http extraction provider requires an endpoint");
            };
            let client = reqwest::Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .build()?;
            info!(%endpoint, "using http document extraction");
            Ok(Arc::new(HttpExtractionService {
                client,
                endpoint,
                api_key: config.api_key.clone(),
            }))
        }
        other => anyhow::bail!("unsupported extraction provider: {other}"),
    }
}

/// Used when no extraction backend is configured; every document fails.
pub struct DisabledExtraction;

#[async_trait]
impl ExtractionService for DisabledExtraction {
    async fn extract(&self, _location: &DocumentLocation) -> Result<ExtractedFields, ExtractionError> {
        Err(ExtractionError::Disabled)
    }
}

pub struct HttpExtractionService {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[async_trait]
impl ExtractionService for HttpExtractionService {
    async fn extract(&self, location: &DocumentLocation) -> Result<ExtractedFields, ExtractionError> {
        let mut request = self.client.post(&self.endpoint).json(location);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                ExtractionError::Request("request timed out".to_string())
            } else {
                ExtractionError::Request(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| ExtractionError::Malformed(err.to_string()))?;
        debug!(key = %location.key, "extraction response received");
        parse_extraction_response(payload)
    }
}

/// Accepts either the flat `{amount, date, vendorName, currency}` shape or an
/// expense-analysis document carrying typed summary fields.
pub fn parse_extraction_response(payload: Value) -> Result<ExtractedFields, ExtractionError> {
    if let Some(fields) = summary_fields(&payload) {
        return Ok(fields_from_summary(fields));
    }
    if !payload.is_object() {
        return Err(ExtractionError::Malformed(
            "expected a JSON object".to_string(),
        ));
    }
    serde_json::from_value(payload).map_err(|err| ExtractionError::Malformed(err.to_string()))
}

fn summary_fields(payload: &Value) -> Option<&Vec<Value>> {
    payload
        .get("summaryFields")
        .or_else(|| {
            payload
                .get("ExpenseDocuments")
                .and_then(|documents| documents.get(0))
                .and_then(|document| document.get("SummaryFields"))
        })
        .and_then(Value::as_array)
}

fn field_text<'a>(field: &'a Value, flat: &str, nested: &str) -> Option<&'a str> {
    field
        .get(flat)
        .and_then(Value::as_str)
        .or_else(|| field.get(nested).and_then(|v| v.get("Text")).and_then(Value::as_str))
}

fn fields_from_summary(items: &[Value]) -> ExtractedFields {
    let mut total = None;
    let mut amount_paid = None;
    let mut fields = ExtractedFields::default();

    for item in items {
        let Some(kind) = field_text(item, "type", "Type") else {
            continue;
        };
        let Some(value) = field_text(item, "value", "ValueDetection") else {
            continue;
        };
        match kind {
            "TOTAL" => total = Some(value.to_string()),
            "AMOUNT_PAID" => amount_paid = Some(value.to_string()),
            "INVOICE_RECEIPT_DATE" => fields.date = Some(value.to_string()),
            "VENDOR_NAME" => fields.vendor_name = Some(value.to_string()),
            _ => {}
        }
    }

    fields.amount = total.or(amount_paid).map(RawAmount::from);
    fields
}
