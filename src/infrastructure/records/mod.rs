//! Keyed invoice record storage, partitioned by owner.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;

use crate::{
    domain::{
        lifecycle::RecordUpdate,
        models::{InvoiceRecord, InvoiceStatus},
    },
    infrastructure::{config::RecordStoreConfig, db::PgPool},
};

pub mod postgres;

pub use postgres::PgRecordStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invoice record not found")]
    NotFound,
    #[error("invoice record is {actual}, expected one of {expected:?}")]
    PreconditionFailed {
        actual: InvoiceStatus,
        expected: Vec<InvoiceStatus>,
    },
    #[error("invoice record already exists")]
    Duplicate,
    #[error("record store failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new record. Fails with [`StoreError::Duplicate`] if the key exists.
    async fn put(&self, record: &InvoiceRecord) -> Result<(), StoreError>;

    async fn get(&self, owner_id: &str, invoice_id: &str) -> Result<InvoiceRecord, StoreError>;

    /// Every record in one owner's partition.
    async fn query_by_owner(&self, owner_id: &str) -> Result<Vec<InvoiceRecord>, StoreError>;

    /// Applies `update` atomically, only while the stored status is one of
    /// `expected`.
    async fn conditional_update(
        &self,
        owner_id: &str,
        invoice_id: &str,
        update: &RecordUpdate,
        expected: &[InvoiceStatus],
    ) -> Result<InvoiceRecord, StoreError>;
}

pub fn build_record_store(
    config: &RecordStoreConfig,
    pool: Option<PgPool>,
) -> anyhow::Result<Arc<dyn RecordStore>> {
    match config.provider.as_str() {
        "postgres" => {
            let Some(pool) = pool else {
                anyhow::bail!("postgres record store requires a database pool");
            };
            Ok(Arc::new(PgRecordStore::new(pool)))
        }
        "memory" => Ok(Arc::new(MemoryRecordStore::default())),
        other => anyhow::bail!("unsupported record store provider: {other}"),
    }
}

/// Process-local store. The write lock makes each conditional update atomic.
#[derive(Default)]
pub struct MemoryRecordStore {
    partitions: RwLock<BTreeMap<String, BTreeMap<String, InvoiceRecord>>>,
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, record: &InvoiceRecord) -> Result<(), StoreError> {
        let mut partitions = self.partitions.write();
        let partition = partitions.entry(record.owner_id.clone()).or_default();
        if partition.contains_key(&record.invoice_id) {
            return Err(StoreError::Duplicate);
        }
        partition.insert(record.invoice_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, owner_id: &str, invoice_id: &str) -> Result<InvoiceRecord, StoreError> {
        self.partitions
            .read()
            .get(owner_id)
            .and_then(|partition| partition.get(invoice_id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn query_by_owner(&self, owner_id: &str) -> Result<Vec<InvoiceRecord>, StoreError> {
        Ok(self
            .partitions
            .read()
            .get(owner_id)
            .map(|partition| partition.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn conditional_update(
        &self,
        owner_id: &str,
        invoice_id: &str,
        update: &RecordUpdate,
        expected: &[InvoiceStatus],
    ) -> Result<InvoiceRecord, StoreError> {
        let mut partitions = self.partitions.write();
        let record = partitions
            .get_mut(owner_id)
            .and_then(|partition| partition.get_mut(invoice_id))
            .ok_or(StoreError::NotFound)?;
        if !expected.contains(&record.status) {
            return Err(StoreError::PreconditionFailed {
                actual: record.status,
                expected: expected.to_vec(),
            });
        }
        update.apply(record);
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::domain::models::{InvoiceKind, RawAmount, NOT_FOUND};

    fn record(owner_id: &str, invoice_id: &str) -> InvoiceRecord {
        InvoiceRecord {
            owner_id: owner_id.into(),
            invoice_id: invoice_id.into(),
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
            object_key: format!("{owner_id}/{invoice_id}_a.pdf"),
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn query_is_scoped_to_one_owner() {
        let store = MemoryRecordStore::default();
        store.put(&record("alice", "1")).await.unwrap();
        store.put(&record("alice", "2")).await.unwrap();
        store.put(&record("bob", "3")).await.unwrap();

        let alice = store.query_by_owner("alice").await.unwrap();

        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|record| record.owner_id == "alice"));
        assert!(store.query_by_owner("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn put_refuses_existing_key() {
        let store = MemoryRecordStore::default();
        store.put(&record("alice", "1")).await.unwrap();

        let result = store.put(&record("alice", "1")).await;

        assert!(matches!(result, Err(StoreError::Duplicate)));
    }

    #[tokio::test]
    async fn conditional_update_checks_stored_status() {
        let store = MemoryRecordStore::default();
        store.put(&record("alice", "1")).await.unwrap();
        let failure = RecordUpdate::failure("unreadable", Utc::now());

        let updated = store
            .conditional_update("alice", "1", &failure, &[InvoiceStatus::Uploaded])
            .await
            .unwrap();
        let rejected = store
            .conditional_update("alice", "1", &failure, &[InvoiceStatus::Uploaded])
            .await;

        assert_eq!(updated.status, InvoiceStatus::Failed);
        assert!(matches!(
            rejected,
            Err(StoreError::PreconditionFailed {
                actual: InvoiceStatus::Failed,
                ..
            })
        ));
        assert!(matches!(
            store.get("alice", "missing").await,
            Err(StoreError::NotFound)
        ));
    }
}
