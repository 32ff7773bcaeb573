//! Invoice intake and extraction lifecycle.
//!
//! Every status change goes through [`RecordStore::conditional_update`] with
//! the transition's allowed source states, so the terminal-state guard is
//! enforced by the store rather than by reading first and writing later.
//! Redelivered events resolve to the already stored outcome instead of an
//! error wherever the outcome is identical.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    domain::{
        lifecycle::{allowed_sources, matches_completion, RecordUpdate},
        models::{
            DocumentLocation, ExtractedFields, InvoiceKind, InvoiceRecord, InvoiceStatus, RawAmount,
            NOT_FOUND,
        },
        normalize::{parse_stored_date, NormalizedExtraction},
    },
    infrastructure::{
        extraction::ExtractionError,
        records::StoreError,
        state::AppState,
        storage::{object_key, parse_object_key},
    },
};

use super::errors::ServiceError;

/// Fields the caller supplies when registering a new invoice document.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoice {
    #[validate(custom = "validate_owner_id")]
    pub owner_id: String,
    #[validate(custom = "validate_not_blank")]
    pub file_name: String,
    #[serde(default)]
    pub kind: Option<InvoiceKind>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Whether the document bytes arrive with the request or later through an
/// upload link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    Attached,
    Deferred,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadLink {
    pub invoice_id: String,
    pub object_key: String,
    pub upload_url: String,
    pub expires_in_seconds: u64,
    pub record: InvoiceRecord,
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

fn validate_owner_id(value: &str) -> Result<(), ValidationError> {
    validate_not_blank(value)?;
    if value.contains('/') {
        return Err(ValidationError::new("owner_id_contains_slash"));
    }
    Ok(())
}

fn require(name: &str, value: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(ServiceError::Validation(format!("{name} is required")));
    }
    Ok(())
}

pub struct InvoiceService {
    pub state: Arc<AppState>,
}

impl InvoiceService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Registers a new invoice with a fresh id. `Attached` records start as
    /// `UPLOADED`, `Deferred` ones as `PENDING_UPLOAD`.
    pub async fn create_record(
        &self,
        request: &NewInvoice,
        intake: Intake,
    ) -> Result<InvoiceRecord, ServiceError> {
        let record = self.build_record(request, intake)?;
        self.state.records.put(&record).await?;
        info!(
            owner_id = %record.owner_id,
            invoice_id = %record.invoice_id,
            status = %record.status,
            "invoice record created"
        );
        Ok(record)
    }

    fn build_record(&self, request: &NewInvoice, intake: Intake) -> Result<InvoiceRecord, ServiceError> {
        request.validate()?;
        let rules = &self.state.config.invoices;
        let owner_id = request.owner_id.trim().to_string();
        let file_name = request.file_name.trim().to_string();
        let invoice_id = Uuid::new_v4().to_string();
        let category = request
            .category
            .as_deref()
            .map(str::trim)
            .filter(|category| !category.is_empty())
            .unwrap_or(rules.default_category.as_str())
            .to_string();

        Ok(InvoiceRecord {
            object_key: object_key(&owner_id, &invoice_id, &file_name),
            owner_id,
            invoice_id,
            status: match intake {
                Intake::Attached => InvoiceStatus::Uploaded,
                Intake::Deferred => InvoiceStatus::PendingUpload,
            },
            kind: request.kind.unwrap_or_default(),
            category,
            amount: RawAmount::zero(),
            invoice_date: NOT_FOUND.to_string(),
            uploaded_at: Some(Utc::now()),
            vendor_name: None,
            currency: rules.default_currency.clone(),
            error_detail: None,
            file_name,
            processed_at: None,
        })
    }

    /// Stores the document bytes, registers the invoice as `UPLOADED` and,
    /// when configured, runs extraction straight away.
    pub async fn upload_invoice(
        &self,
        request: &NewInvoice,
        content: Bytes,
        content_type: &str,
    ) -> Result<InvoiceRecord, ServiceError> {
        self.check_content(&content)?;
        let record = self.build_record(request, Intake::Attached)?;

        self.state
            .storage
            .put(&record.object_key, content, content_type)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        if let Err(err) = self.state.records.put(&record).await {
            if let Err(cleanup) = self.state.storage.delete(&record.object_key).await {
                warn!(error = ?cleanup, key = %record.object_key, "failed to remove orphaned document");
            }
            return Err(err.into());
        }
        info!(
            owner_id = %record.owner_id,
            invoice_id = %record.invoice_id,
            "invoice uploaded"
        );

        if self.state.config.extraction.process_on_upload {
            return self
                .process_invoice(&record.owner_id, &record.invoice_id)
                .await;
        }
        Ok(record)
    }

    /// Registers a `PENDING_UPLOAD` invoice and returns where its bytes go.
    pub async fn generate_upload_link(
        &self,
        request: &NewInvoice,
        content_type: &str,
    ) -> Result<UploadLink, ServiceError> {
        require("contentType", content_type)?;
        let record = self.build_record(request, Intake::Deferred)?;
        let ttl = self.state.config.upload_link_ttl();
        let upload_url = self
            .state
            .storage
            .upload_url(&record.object_key, content_type, ttl)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        self.state.records.put(&record).await?;
        info!(
            owner_id = %record.owner_id,
            invoice_id = %record.invoice_id,
            "upload link issued"
        );

        Ok(UploadLink {
            invoice_id: record.invoice_id.clone(),
            object_key: record.object_key.clone(),
            upload_url,
            expires_in_seconds: ttl.as_secs(),
            record,
        })
    }

    /// Marks the bytes of a deferred upload as received. Repeats are no-ops.
    pub async fn confirm_upload(
        &self,
        owner_id: &str,
        invoice_id: &str,
    ) -> Result<InvoiceRecord, ServiceError> {
        require("ownerId", owner_id)?;
        require("invoiceId", invoice_id)?;
        let update = RecordUpdate::status(InvoiceStatus::Uploaded);
        match self
            .state
            .records
            .conditional_update(
                owner_id,
                invoice_id,
                &update,
                allowed_sources(InvoiceStatus::Uploaded),
            )
            .await
        {
            Ok(record) => {
                info!(%owner_id, %invoice_id, from = "PENDING_UPLOAD", to = "UPLOADED", "invoice transitioned");
                Ok(record)
            }
            Err(StoreError::PreconditionFailed { .. }) => {
                Ok(self.state.records.get(owner_id, invoice_id).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Handles bytes arriving at a key handed out by [`Self::generate_upload_link`].
    pub async fn receive_upload(
        &self,
        key: &str,
        content: Bytes,
        content_type: &str,
    ) -> Result<InvoiceRecord, ServiceError> {
        let (owner_id, invoice_id) = parse_object_key(key)
            .ok_or_else(|| ServiceError::Validation(format!("unrecognised object key: {key}")))?;
        self.check_content(&content)?;
        let record = self.state.records.get(owner_id, invoice_id).await?;
        if record.object_key != key {
            return Err(ServiceError::Validation(format!(
                "object key does not belong to invoice {invoice_id}"
            )));
        }

        self.state
            .storage
            .put(key, content, content_type)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let record = self.confirm_upload(owner_id, invoice_id).await?;
        if self.state.config.extraction.process_on_upload && record.status == InvoiceStatus::Uploaded {
            return self.process_invoice(owner_id, invoice_id).await;
        }
        Ok(record)
    }

    pub async fn start_processing(
        &self,
        owner_id: &str,
        invoice_id: &str,
    ) -> Result<InvoiceRecord, ServiceError> {
        let update = RecordUpdate::status(InvoiceStatus::Processing);
        let record = self
            .state
            .records
            .conditional_update(
                owner_id,
                invoice_id,
                &update,
                allowed_sources(InvoiceStatus::Processing),
            )
            .await?;
        info!(%owner_id, %invoice_id, from = "UPLOADED", to = "PROCESSING", "invoice transitioned");
        Ok(record)
    }

    /// Runs extraction for an uploaded invoice and records the outcome.
    ///
    /// Extraction failures and timeouts end in `FAILED` and are returned as a
    /// normal result; only terminal or not-yet-uploaded invoices are refused.
    pub async fn process_invoice(
        &self,
        owner_id: &str,
        invoice_id: &str,
    ) -> Result<InvoiceRecord, ServiceError> {
        require("ownerId", owner_id)?;
        require("invoiceId", invoice_id)?;
        let record = self.state.records.get(owner_id, invoice_id).await?;
        let record = match record.status {
            InvoiceStatus::Completed | InvoiceStatus::Failed => {
                warn!(%owner_id, %invoice_id, status = %record.status, "refusing to reprocess invoice");
                return Err(ServiceError::Conflict(format!(
                    "invoice is already {}",
                    record.status
                )));
            }
            InvoiceStatus::PendingUpload => {
                return Err(ServiceError::Conflict(
                    "invoice document has not been uploaded".to_string(),
                ));
            }
            InvoiceStatus::Uploaded => self.start_processing(owner_id, invoice_id).await?,
            InvoiceStatus::Processing => record,
        };

        let location = DocumentLocation {
            bucket: self.state.config.storage.bucket.clone(),
            key: record.object_key.clone(),
        };
        let limit = self.state.config.extraction_timeout();
        let outcome = tokio::time::timeout(limit, self.state.extraction.extract(&location))
            .await
            .unwrap_or(Err(ExtractionError::Timeout(limit)));

        match outcome {
            Ok(fields) => self.apply_extraction_result(owner_id, invoice_id, &fields).await,
            Err(err) => {
                let failure = ServiceError::ExternalService(err.to_string());
                warn!(
                    %owner_id,
                    %invoice_id,
                    error_kind = failure.kind(),
                    error = %failure,
                    "document extraction failed"
                );
                self.mark_failed(owner_id, invoice_id, &err.to_string()).await
            }
        }
    }

    /// Normalises extracted fields and completes the invoice.
    ///
    /// Redelivering the same result for a completed invoice returns the stored
    /// record unchanged. Malformed results fail the invoice instead.
    pub async fn apply_extraction_result(
        &self,
        owner_id: &str,
        invoice_id: &str,
        fields: &ExtractedFields,
    ) -> Result<InvoiceRecord, ServiceError> {
        require("ownerId", owner_id)?;
        require("invoiceId", invoice_id)?;
        let default_currency = &self.state.config.invoices.default_currency;
        let extraction = match NormalizedExtraction::from_fields(fields, default_currency) {
            Ok(extraction) => extraction,
            Err(err) => {
                warn!(%owner_id, %invoice_id, error = %err, "malformed extraction result");
                return self
                    .mark_failed(owner_id, invoice_id, &format!("malformed extraction result: {err}"))
                    .await;
            }
        };

        let update = RecordUpdate::completion(&extraction, Utc::now());
        match self
            .state
            .records
            .conditional_update(
                owner_id,
                invoice_id,
                &update,
                allowed_sources(InvoiceStatus::Completed),
            )
            .await
        {
            Ok(record) => {
                info!(%owner_id, %invoice_id, to = "COMPLETED", "invoice transitioned");
                Ok(record)
            }
            Err(StoreError::PreconditionFailed { actual, .. }) => {
                let current = self.state.records.get(owner_id, invoice_id).await?;
                if matches_completion(&current, &extraction) {
                    info!(%owner_id, %invoice_id, "duplicate extraction result ignored");
                    return Ok(current);
                }
                warn!(%owner_id, %invoice_id, status = %actual, "extraction result rejected");
                Err(ServiceError::Conflict(format!(
                    "invoice is {}",
                    current.status
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Fails the invoice. The first recorded reason wins on repeats; a
    /// completed invoice is never overwritten.
    pub async fn mark_failed(
        &self,
        owner_id: &str,
        invoice_id: &str,
        reason: &str,
    ) -> Result<InvoiceRecord, ServiceError> {
        require("ownerId", owner_id)?;
        require("invoiceId", invoice_id)?;
        require("reason", reason)?;
        let update = RecordUpdate::failure(reason.trim(), Utc::now());
        match self
            .state
            .records
            .conditional_update(
                owner_id,
                invoice_id,
                &update,
                allowed_sources(InvoiceStatus::Failed),
            )
            .await
        {
            Ok(record) => {
                info!(%owner_id, %invoice_id, to = "FAILED", %reason, "invoice transitioned");
                Ok(record)
            }
            Err(StoreError::PreconditionFailed {
                actual: InvoiceStatus::Failed,
                ..
            }) => Ok(self.state.records.get(owner_id, invoice_id).await?),
            Err(StoreError::PreconditionFailed { actual, .. }) => {
                warn!(%owner_id, %invoice_id, status = %actual, "refusing to fail invoice");
                Err(ServiceError::Conflict(format!("invoice is {actual}")))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// All of one owner's invoices, most recent first.
    pub async fn list_invoices(&self, owner_id: &str) -> Result<Vec<InvoiceRecord>, ServiceError> {
        require("ownerId", owner_id)?;
        let mut records = self.state.records.query_by_owner(owner_id).await?;
        records.sort_by(|a, b| {
            let key = |record: &InvoiceRecord| {
                parse_stored_date(&record.invoice_date)
                    .or_else(|| record.uploaded_at.map(|at| at.date_naive()))
            };
            key(b)
                .cmp(&key(a))
                .then_with(|| b.uploaded_at.cmp(&a.uploaded_at))
                .then_with(|| a.invoice_id.cmp(&b.invoice_id))
        });
        Ok(records)
    }

    fn check_content(&self, content: &Bytes) -> Result<(), ServiceError> {
        if content.is_empty() {
            return Err(ServiceError::Validation("document is empty".to_string()));
        }
        let limit = self.state.config.invoices.max_upload_bytes;
        if content.len() as u64 > limit {
            return Err(ServiceError::Validation(format!(
                "document exceeds {limit} bytes"
            )));
        }
        Ok(())
    }
}
