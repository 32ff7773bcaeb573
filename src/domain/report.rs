//! Financial report aggregation over one owner's invoices.
//!
//! Only `COMPLETED` invoices count. Each one is bucketed by its effective
//! date: the stored invoice date when readable, else the upload instant, else
//! the instant the report was requested. A bad record never fails the batch.

use std::{cmp::Ordering, collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::{error, warn};

use crate::domain::{
    models::{InvoiceKind, InvoiceRecord, InvoiceStatus},
    normalize::parse_stored_date,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    Current,
    #[default]
    All,
    Month { year: i32, month: u32 },
}

impl Period {
    pub fn includes(&self, date: NaiveDate, today: NaiveDate) -> bool {
        match *self {
            Period::All => true,
            Period::Current => date.year() == today.year() && date.month() == today.month(),
            Period::Month { year, month } => date.year() == year && date.month() == month,
        }
    }

    pub fn describe(&self, today: NaiveDate) -> PeriodSummary {
        match *self {
            Period::All => PeriodSummary {
                selector: "all".to_string(),
                year: None,
                month: None,
            },
            Period::Current => PeriodSummary {
                selector: "current".to_string(),
                year: Some(today.year()),
                month: Some(today.month()),
            },
            Period::Month { year, month } => PeriodSummary {
                selector: format!("{year:04}-{month:02}"),
                year: Some(year),
                month: Some(month),
            },
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        match value.to_ascii_lowercase().as_str() {
            "current" => return Ok(Period::Current),
            "all" => return Ok(Period::All),
            _ => {}
        }
        let invalid = || format!("period must be 'current', 'all' or YYYY-MM, got '{value}'");
        let (year, month) = value.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Period::Month { year, month })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    pub selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
}

/// Monthly bucket key, rendered as `{month}/{year}` without padding.
///
/// Orders most recent month first so report maps iterate newest to oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    fn index(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month)
    }
}

impl Ord for MonthKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other.index().cmp(&self.index())
    }
}

impl PartialOrd for MonthKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.month, self.year)
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Bucket {
    pub income: Decimal,
    pub expense: Decimal,
    pub count: usize,
}

impl Bucket {
    /// This bucket with one more invoice, or `None` if a total would overflow.
    fn plus(&self, kind: InvoiceKind, amount: Decimal) -> Option<Self> {
        let mut next = self.clone();
        match kind {
            InvoiceKind::Income => next.income = self.income.checked_add(amount)?,
            InvoiceKind::Expense => next.expense = self.expense.checked_add(amount)?,
        }
        next.count += 1;
        Some(next)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_income: Decimal,
    pub total_expense: Decimal,
    pub net_profit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialReport {
    pub period: PeriodSummary,
    pub total_invoices: usize,
    pub monthly: BTreeMap<MonthKey, Bucket>,
    pub yearly: BTreeMap<i32, Bucket>,
    /// Expense invoices only.
    pub by_category: BTreeMap<String, Decimal>,
    pub summary: ReportSummary,
    /// Invoices whose stored amount could not be read or would overflow a
    /// total; they count as zero.
    pub unreadable_amounts: usize,
    /// Invoices bucketed by the request time because no stored date was usable.
    pub undated_invoices: usize,
}

impl FinancialReport {
    pub fn empty(period: &Period, now: DateTime<Utc>) -> Self {
        Self {
            period: period.describe(now.date_naive()),
            total_invoices: 0,
            monthly: BTreeMap::new(),
            yearly: BTreeMap::new(),
            by_category: BTreeMap::new(),
            summary: ReportSummary::default(),
            unreadable_amounts: 0,
            undated_invoices: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationDataError {
    #[error("invoice {invoice_id} has unreadable amount {raw:?}")]
    UnreadableAmount { invoice_id: String, raw: String },
    #[error("invoice {invoice_id} amount {amount} overflows the report totals")]
    AmountOverflow { invoice_id: String, amount: Decimal },
    #[error("invoice {invoice_id} has neither a readable invoice date nor an upload time")]
    Undated { invoice_id: String },
}

/// Date used for bucketing, plus the data problem when the last resort was
/// needed.
fn effective_date(
    record: &InvoiceRecord,
    now: DateTime<Utc>,
) -> (NaiveDate, Option<AggregationDataError>) {
    if let Some(date) = parse_stored_date(&record.invoice_date) {
        return (date, None);
    }
    if let Some(uploaded_at) = record.uploaded_at {
        return (uploaded_at.date_naive(), None);
    }
    (
        now.date_naive(),
        Some(AggregationDataError::Undated {
            invoice_id: record.invoice_id.clone(),
        }),
    )
}

fn record_amount(record: &InvoiceRecord) -> Result<Decimal, AggregationDataError> {
    record
        .amount
        .to_decimal()
        .ok_or_else(|| AggregationDataError::UnreadableAmount {
            invoice_id: record.invoice_id.clone(),
            raw: record.amount.as_str().to_string(),
        })
}

/// Totals touched by one invoice, computed before any of them is written so
/// an overflowing amount leaves the report unchanged.
struct Tally {
    monthly: Bucket,
    yearly: Bucket,
    summary: ReportSummary,
    category: Option<Decimal>,
}

impl Tally {
    fn of(
        report: &FinancialReport,
        record: &InvoiceRecord,
        month: MonthKey,
        amount: Decimal,
    ) -> Option<Self> {
        let monthly = report
            .monthly
            .get(&month)
            .cloned()
            .unwrap_or_default()
            .plus(record.kind, amount)?;
        let yearly = report
            .yearly
            .get(&month.year)
            .cloned()
            .unwrap_or_default()
            .plus(record.kind, amount)?;
        let mut summary = report.summary.clone();
        let category = match record.kind {
            InvoiceKind::Income => {
                summary.total_income = summary.total_income.checked_add(amount)?;
                None
            }
            InvoiceKind::Expense => {
                summary.total_expense = summary.total_expense.checked_add(amount)?;
                let current = report
                    .by_category
                    .get(&record.category)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                Some(current.checked_add(amount)?)
            }
        };
        Some(Self {
            monthly,
            yearly,
            summary,
            category,
        })
    }

    fn commit(self, report: &mut FinancialReport, record: &InvoiceRecord, month: MonthKey) {
        report.monthly.insert(month, self.monthly);
        report.yearly.insert(month.year, self.yearly);
        report.summary = self.summary;
        if let Some(total) = self.category {
            report.by_category.insert(record.category.clone(), total);
        }
    }
}

/// Builds the report for `period` as seen at `now`.
///
/// `now` is read once by the caller so month boundaries cannot shift while
/// the records are being walked.
pub fn aggregate(records: &[InvoiceRecord], period: &Period, now: DateTime<Utc>) -> FinancialReport {
    let today = now.date_naive();
    let mut report = FinancialReport::empty(period, now);

    for record in records
        .iter()
        .filter(|record| record.status == InvoiceStatus::Completed)
    {
        let (date, date_problem) = effective_date(record, now);
        if !period.includes(date, today) {
            continue;
        }
        if let Some(problem) = date_problem {
            error!(owner_id = %record.owner_id, error = %problem, "falling back to request time for invoice date");
            report.undated_invoices += 1;
        }

        let amount = match record_amount(record) {
            Ok(amount) => amount,
            Err(problem) => {
                warn!(owner_id = %record.owner_id, error = %problem, "counting invoice amount as zero");
                report.unreadable_amounts += 1;
                Decimal::ZERO
            }
        };

        let month = MonthKey::of(date);
        let tally = match Tally::of(&report, record, month, amount) {
            Some(tally) => tally,
            None => {
                let problem = AggregationDataError::AmountOverflow {
                    invoice_id: record.invoice_id.clone(),
                    amount,
                };
                warn!(owner_id = %record.owner_id, error = %problem, "counting invoice amount as zero");
                report.unreadable_amounts += 1;
                let Some(tally) = Tally::of(&report, record, month, Decimal::ZERO) else {
                    continue;
                };
                tally
            }
        };
        tally.commit(&mut report, record, month);
        report.total_invoices += 1;
    }

    report.summary.net_profit = report.summary.total_income - report.summary.total_expense;
    report
}
