use async_trait::async_trait;
use sqlx::{postgres::PgRow, Row};

use crate::{
    domain::{
        lifecycle::RecordUpdate,
        models::{InvoiceKind, InvoiceRecord, InvoiceStatus, RawAmount},
    },
    infrastructure::db::PgPool,
};

use super::{RecordStore, StoreError};

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn put(&self, record: &InvoiceRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO invoices (owner_id, invoice_id, status, kind, category, amount, invoice_date, uploaded_at, vendor_name, currency, error_detail, file_name, object_key, processed_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
             ON CONFLICT (owner_id, invoice_id) DO NOTHING",
        )
        .bind(&record.owner_id)
        .bind(&record.invoice_id)
        .bind(record.status.as_str())
        .bind(record.kind.as_str())
        .bind(&record.category)
        .bind(record.amount.as_str())
        .bind(&record.invoice_date)
        .bind(record.uploaded_at)
        .bind(&record.vendor_name)
        .bind(&record.currency)
        .bind(&record.error_detail)
        .bind(&record.file_name)
        .bind(&record.object_key)
        .bind(record.processed_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate);
        }
        Ok(())
    }

    async fn get(&self, owner_id: &str, invoice_id: &str) -> Result<InvoiceRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM invoices WHERE owner_id = $1 AND invoice_id = $2")
            .bind(owner_id)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => map_record(row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn query_by_owner(&self, owner_id: &str) -> Result<Vec<InvoiceRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM invoices WHERE owner_id = $1 ORDER BY invoice_id")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(map_record).collect()
    }

    async fn conditional_update(
        &self,
        owner_id: &str,
        invoice_id: &str,
        update: &RecordUpdate,
        expected: &[InvoiceStatus],
    ) -> Result<InvoiceRecord, StoreError> {
        let expected_names: Vec<&str> = expected.iter().map(InvoiceStatus::as_str).collect();
        let row = sqlx::query(
            "UPDATE invoices SET
                status = $1,
                amount = COALESCE($2, amount),
                invoice_date = COALESCE($3, invoice_date),
                vendor_name = COALESCE($4, vendor_name),
                currency = COALESCE($5, currency),
                error_detail = COALESCE($6, error_detail),
                processed_at = COALESCE($7, processed_at)
             WHERE owner_id = $8 AND invoice_id = $9 AND status = ANY($10)
             RETURNING *",
        )
        .bind(update.status.as_str())
        .bind(update.amount.as_ref().map(RawAmount::as_str))
        .bind(update.invoice_date.as_deref())
        .bind(update.vendor_name.as_deref())
        .bind(update.currency.as_deref())
        .bind(update.error_detail.as_deref())
        .bind(update.processed_at)
        .bind(owner_id)
        .bind(invoice_id)
        .bind(expected_names)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = row {
            return map_record(row);
        }

        let actual = sqlx::query_scalar::<_, String>(
            "SELECT status FROM invoices WHERE owner_id = $1 AND invoice_id = $2",
        )
        .bind(owner_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match actual {
            None => Err(StoreError::NotFound),
            Some(status) => Err(StoreError::PreconditionFailed {
                actual: status.parse().map_err(StoreError::Backend)?,
                expected: expected.to_vec(),
            }),
        }
    }
}

fn map_record(row: PgRow) -> Result<InvoiceRecord, StoreError> {
    let status = row
        .try_get::<String, _>("status")
        .map_err(map_sqlx_error)?
        .parse::<InvoiceStatus>()
        .map_err(StoreError::Backend)?;
    let kind = row
        .try_get::<String, _>("kind")
        .map_err(map_sqlx_error)?
        .parse::<InvoiceKind>()
        .map_err(StoreError::Backend)?;
    Ok(InvoiceRecord {
        owner_id: row.try_get("owner_id").map_err(map_sqlx_error)?,
        invoice_id: row.try_get("invoice_id").map_err(map_sqlx_error)?,
        status,
        kind,
        category: row.try_get("category").map_err(map_sqlx_error)?,
        amount: RawAmount::from(
            row.try_get::<String, _>("amount")
                .map_err(map_sqlx_error)?,
        ),
        invoice_date: row.try_get("invoice_date").map_err(map_sqlx_error)?,
        uploaded_at: row.try_get("uploaded_at").map_err(map_sqlx_error)?,
        vendor_name: row.try_get("vendor_name").map_err(map_sqlx_error)?,
        currency: row.try_get("currency").map_err(map_sqlx_error)?,
        error_detail: row.try_get("error_detail").map_err(map_sqlx_error)?,
        file_name: row.try_get("file_name").map_err(map_sqlx_error)?,
        object_key: row.try_get("object_key").map_err(map_sqlx_error)?,
        processed_at: row.try_get("processed_at").map_err(map_sqlx_error)?,
    })
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
