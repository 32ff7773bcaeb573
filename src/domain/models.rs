use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Sentinel stored in place of a date or vendor the extraction could not read.
pub const NOT_FOUND: &str = "Not found";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    PendingUpload,
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::PendingUpload => "PENDING_UPLOAD",
            InvoiceStatus::Uploaded => "UPLOADED",
            InvoiceStatus::Processing => "PROCESSING",
            InvoiceStatus::Completed => "COMPLETED",
            InvoiceStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Completed | InvoiceStatus::Failed)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING_UPLOAD" => Ok(InvoiceStatus::PendingUpload),
            "UPLOADED" => Ok(InvoiceStatus::Uploaded),
            "PROCESSING" => Ok(InvoiceStatus::Processing),
            "COMPLETED" => Ok(InvoiceStatus::Completed),
            "FAILED" => Ok(InvoiceStatus::Failed),
            other => Err(format!("unsupported invoice status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceKind {
    Income,
    #[default]
    Expense,
}

impl InvoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceKind::Income => "INCOME",
            InvoiceKind::Expense => "EXPENSE",
        }
    }
}

impl FromStr for InvoiceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INCOME" => Ok(InvoiceKind::Income),
            "EXPENSE" => Ok(InvoiceKind::Expense),
            other => Err(format!("unsupported invoice kind: {other}")),
        }
    }
}

/// Amount exactly as persisted.
///
/// Rows written by older handlers may hold arbitrary text here, so the value is
/// kept verbatim and only interpreted by readers that can tolerate garbage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RawAmount(String);

impl RawAmount {
    pub fn zero() -> Self {
        Self("0".to_string())
    }

    pub fn from_decimal(value: Decimal) -> Self {
        Self(value.normalize().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the stored text. Negative or non-numeric values yield `None`.
    pub fn to_decimal(&self) -> Option<Decimal> {
        let trimmed = self.0.trim();
        let value = Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .ok()?;
        (!value.is_sign_negative()).then_some(value)
    }
}

impl From<&str> for RawAmount {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RawAmount {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for RawAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(serde_json::Number),
            Text(String),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Number(number) => RawAmount(number.to_string()),
            Wire::Text(text) => RawAmount(text),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRecord {
    pub owner_id: String,
    pub invoice_id: String,
    pub status: InvoiceStatus,
    pub kind: InvoiceKind,
    pub category: String,
    pub amount: RawAmount,
    /// `DD/MM/YYYY` or [`NOT_FOUND`].
    pub invoice_date: String,
    /// Always set for records created by this service; legacy rows may lack it.
    pub uploaded_at: Option<DateTime<Utc>>,
    pub vendor_name: Option<String>,
    pub currency: String,
    pub error_detail: Option<String>,
    pub file_name: String,
    pub object_key: String,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Best-effort fields returned by the document extraction service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    #[serde(default)]
    pub amount: Option<RawAmount>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub vendor_name: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Location of a stored document handed to the extraction service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentLocation {
    pub bucket: Option<String>,
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_amount_accepts_numbers_and_text() {
        let number: RawAmount = serde_json::from_str("120.5").unwrap();
        let text: RawAmount = serde_json::from_str("\"not-a-number\"").unwrap();

        assert_eq!(number.to_decimal(), Some(Decimal::new(1205, 1)));
        assert_eq!(text.to_decimal(), None);
    }

    #[test]
    fn raw_amount_rejects_negative_values() {
        assert_eq!(RawAmount::from("-4").to_decimal(), None);
        assert_eq!(RawAmount::zero().to_decimal(), Some(Decimal::ZERO));
    }

    #[test]
    fn status_round_trips_through_storage_text() {
        for status in [
            InvoiceStatus::PendingUpload,
            InvoiceStatus::Uploaded,
            InvoiceStatus::Processing,
            InvoiceStatus::Completed,
            InvoiceStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<InvoiceStatus>(), Ok(status));
        }
        assert!("archived".parse::<InvoiceStatus>().is_err());
    }

    #[test]
    fn kind_defaults_to_expense() {
        assert_eq!(InvoiceKind::default(), InvoiceKind::Expense);
        assert_eq!("income".parse::<InvoiceKind>(), Ok(InvoiceKind::Income));
    }
}
