//! Invoice status transitions.
//!
//! ```text
//! PENDING_UPLOAD -> UPLOADED -> PROCESSING -> COMPLETED | FAILED
//!                   UPLOADED ---------------> COMPLETED | FAILED
//! ```
//!
//! `COMPLETED` and `FAILED` are terminal. Stores enforce these rules through
//! the `expected` status set passed to a conditional update, so two racing
//! writers can never both observe the pre-transition state.

use chrono::{DateTime, Utc};

use crate::domain::{
    models::{InvoiceRecord, InvoiceStatus, RawAmount},
    normalize::NormalizedExtraction,
};

/// Statuses from which `target` may be entered.
pub fn allowed_sources(target: InvoiceStatus) -> &'static [InvoiceStatus] {
    match target {
        InvoiceStatus::PendingUpload => &[],
        InvoiceStatus::Uploaded => &[InvoiceStatus::PendingUpload],
        InvoiceStatus::Processing => &[InvoiceStatus::Uploaded],
        InvoiceStatus::Completed | InvoiceStatus::Failed => {
            &[InvoiceStatus::Uploaded, InvoiceStatus::Processing]
        }
    }
}

pub fn can_transition(from: InvoiceStatus, to: InvoiceStatus) -> bool {
    allowed_sources(to).contains(&from)
}

/// Field changes written together with a status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub status: InvoiceStatus,
    pub amount: Option<RawAmount>,
    pub invoice_date: Option<String>,
    pub vendor_name: Option<String>,
    pub currency: Option<String>,
    pub error_detail: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl RecordUpdate {
    pub fn status(status: InvoiceStatus) -> Self {
        Self {
            status,
            amount: None,
            invoice_date: None,
            vendor_name: None,
            currency: None,
            error_detail: None,
            processed_at: None,
        }
    }

    pub fn completion(extraction: &NormalizedExtraction, at: DateTime<Utc>) -> Self {
        Self {
            amount: Some(RawAmount::from_decimal(extraction.amount)),
            invoice_date: Some(extraction.invoice_date.clone()),
            vendor_name: Some(extraction.vendor_name.clone()),
            currency: Some(extraction.currency.clone()),
            processed_at: Some(at),
            ..Self::status(InvoiceStatus::Completed)
        }
    }

    pub fn failure(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            error_detail: Some(reason.into()),
            processed_at: Some(at),
            ..Self::status(InvoiceStatus::Failed)
        }
    }

    pub fn apply(&self, record: &mut InvoiceRecord) {
        record.status = self.status;
        if let Some(amount) = &self.amount {
            record.amount = amount.clone();
        }
        if let Some(date) = &self.invoice_date {
            record.invoice_date = date.clone();
        }
        if let Some(vendor) = &self.vendor_name {
            record.vendor_name = Some(vendor.clone());
        }
        if let Some(currency) = &self.currency {
            record.currency = currency.clone();
        }
        if let Some(detail) = &self.error_detail {
            record.error_detail = Some(detail.clone());
        }
        if let Some(at) = self.processed_at {
            record.processed_at = Some(at);
        }
    }
}

/// Whether a completed record already holds exactly this extraction, which
/// makes a redelivered completion a no-op.
pub fn matches_completion(record: &InvoiceRecord, extraction: &NormalizedExtraction) -> bool {
    record.status == InvoiceStatus::Completed
        && record.amount.to_decimal() == Some(extraction.amount)
        && record.invoice_date == extraction.invoice_date
        && record.vendor_name.as_deref() == Some(extraction.vendor_name.as_str())
        && record.currency == extraction.currency
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    use crate::domain::models::{InvoiceKind, NOT_FOUND};

    fn uploaded() -> InvoiceRecord {
        InvoiceRecord {
            owner_id: "owner-1".into(),
            invoice_id: "inv-1".into(),
            status: InvoiceStatus::Uploaded,
            kind: InvoiceKind::Expense,
            category: "General".into(),
            amount: RawAmount::zero(),
            invoice_date: NOT_FOUND.into(),
            uploaded_at: Some(Utc::now()),
            vendor_name: None,
            currency: "ILS".into(),
            error_detail: None,
            file_name: "a.pdf".into(),
            object_key: "owner-1/inv-1_a.pdf".into(),
            processed_at: None,
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for target in [
            InvoiceStatus::PendingUpload,
            InvoiceStatus::Uploaded,
            InvoiceStatus::Processing,
            InvoiceStatus::Completed,
            InvoiceStatus::Failed,
        ] {
            assert!(!can_transition(InvoiceStatus::Completed, target));
            assert!(!can_transition(InvoiceStatus::Failed, target));
        }
    }

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(can_transition(InvoiceStatus::PendingUpload, InvoiceStatus::Uploaded));
        assert!(can_transition(InvoiceStatus::Uploaded, InvoiceStatus::Processing));
        assert!(can_transition(InvoiceStatus::Uploaded, InvoiceStatus::Completed));
        assert!(can_transition(InvoiceStatus::Processing, InvoiceStatus::Failed));
        assert!(!can_transition(InvoiceStatus::PendingUpload, InvoiceStatus::Completed));
        assert!(!can_transition(InvoiceStatus::Processing, InvoiceStatus::Uploaded));
    }

    #[test]
    fn completion_update_writes_normalized_fields() {
        let extraction = NormalizedExtraction {
            amount: Decimal::new(1050, 1),
            invoice_date: "18/12/2025".into(),
            vendor_name: "Acme".into(),
            currency: "USD".into(),
        };
        let mut record = uploaded();

        RecordUpdate::completion(&extraction, Utc::now()).apply(&mut record);

        assert_eq!(record.status, InvoiceStatus::Completed);
        assert_eq!(record.amount.as_str(), "105");
        assert!(matches_completion(&record, &extraction));
        assert!(record.error_detail.is_none());
    }
}
