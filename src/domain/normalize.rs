//! Normalisation of the loosely formatted fields produced by document
//! extraction, and parsing of the stored forms the report aggregation reads.
//!
//! Stored invoice dates always use `DD/MM/YYYY` with zero padding, or the
//! [`NOT_FOUND`] sentinel when nothing usable was extracted.

use chrono::{DateTime, Datelike, NaiveDate};
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::models::{ExtractedFields, NOT_FOUND};

pub const STORED_DATE_FORMAT: &str = "%d/%m/%Y";

/// Accepted shapes for extracted dates, tried in order. Two-digit years are
/// deliberately absent.
const EXTRACTED_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %b %Y",
    "%d %b, %Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %B, %Y",
];

/// Separators legacy rows used between day, month and year.
const STORED_DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d.%m.%Y", "%d-%m-%Y"];

/// Normalises whatever date text extraction produced into `DD/MM/YYYY`.
///
/// Unreadable input never fails; it becomes [`NOT_FOUND`].
pub fn normalize_invoice_date(raw: Option<&str>) -> String {
    let Some(text) = raw.map(str::trim).filter(|text| !text.is_empty()) else {
        return NOT_FOUND.to_string();
    };
    if text.eq_ignore_ascii_case(NOT_FOUND) {
        return NOT_FOUND.to_string();
    }

    match parse_extracted_date(text) {
        Some(date) => {
            let formatted = date.format(STORED_DATE_FORMAT).to_string();
            debug!(raw = text, normalized = %formatted, "normalized invoice date");
            formatted
        }
        None => {
            warn!(raw = text, "could not parse extracted invoice date");
            NOT_FOUND.to_string()
        }
    }
}

fn parse_extracted_date(text: &str) -> Option<NaiveDate> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.date_naive());
    }
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    EXTRACTED_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&collapsed, format).ok())
        .filter(|date| date.year() >= 1000)
}

/// Parses a stored invoice date. Returns `None` for the sentinel or garbage.
pub fn parse_stored_date(stored: &str) -> Option<NaiveDate> {
    let text = stored.trim();
    if text.is_empty() || text.eq_ignore_ascii_case(NOT_FOUND) {
        return None;
    }
    STORED_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("extraction returned no amount")]
    Missing,
    #[error("unreadable amount: {0}")]
    Unreadable(String),
    #[error("amount {0} exceeds the largest accepted invoice amount")]
    TooLarge(String),
}

/// Largest single invoice amount accepted from extraction.
pub fn max_invoice_amount() -> Decimal {
    Decimal::new(1_000_000_000_000, 0)
}

/// Strips currency symbols and thousands separators, keeping digits and `.`.
pub fn normalize_amount(raw: Option<&str>) -> Result<Decimal, AmountError> {
    let text = raw.map(str::trim).filter(|text| !text.is_empty());
    let Some(text) = text else {
        return Err(AmountError::Missing);
    };
    if text.starts_with('-') {
        return Err(AmountError::Unreadable(text.to_string()));
    }
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let amount =
        Decimal::from_str(&cleaned).map_err(|_| AmountError::Unreadable(text.to_string()))?;
    if amount > max_invoice_amount() {
        return Err(AmountError::TooLarge(text.to_string()));
    }
    Ok(amount)
}

/// Picks the currency from symbols in the amount text, then from the
/// extracted code, then the configured default.
pub fn detect_currency(amount_text: Option<&str>, extracted: Option<&str>, default: &str) -> String {
    if let Some(text) = amount_text {
        if text.contains('$') {
            return "USD".to_string();
        }
        if text.contains('€') {
            return "EUR".to_string();
        }
        if text.contains('₪') {
            return "ILS".to_string();
        }
    }
    extracted
        .map(str::trim)
        .filter(|code| code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()))
        .map(str::to_ascii_uppercase)
        .unwrap_or_else(|| default.to_string())
}

/// Extraction output after validation, ready to be written to a record.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedExtraction {
    pub amount: Decimal,
    pub invoice_date: String,
    pub vendor_name: String,
    pub currency: String,
}

impl NormalizedExtraction {
    pub fn from_fields(fields: &ExtractedFields, default_currency: &str) -> Result<Self, AmountError> {
        let amount_text = fields.amount.as_ref().map(|amount| amount.as_str());
        let amount = normalize_amount(amount_text)?;
        let vendor_name = fields
            .vendor_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(NOT_FOUND)
            .to_string();
        Ok(Self {
            amount,
            invoice_date: normalize_invoice_date(fields.date.as_deref()),
            vendor_name,
            currency: detect_currency(amount_text, fields.currency.as_deref(), default_currency),
        })
    }
}
