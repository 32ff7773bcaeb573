use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{fs, io::AsyncWriteExt};

use crate::infrastructure::config::StorageConfig;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    /// Address a client can send the document bytes to for `key`.
    async fn upload_url(&self, key: &str, content_type: &str, ttl: Duration)
        -> anyhow::Result<String>;
}

pub fn build_storage(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalStorage::new(config.local_path.clone())?)),
        "memory" => Ok(Arc::new(MemoryStorage::default())),
        other => anyhow::bail!("unsupported storage provider: {other}"),
    }
}

pub fn local_storage_root(path: Option<&str>) -> PathBuf {
    PathBuf::from(path.unwrap_or("./uploads"))
}

/// Object key for an invoice document: `{owner}/{invoice}_{file name}`.
pub fn object_key(owner_id: &str, invoice_id: &str, file_name: &str) -> String {
    let file_name = file_name.replace(['/', '\\'], "_");
    format!("{owner_id}/{invoice_id}_{file_name}")
}

/// Recovers `(owner, invoice)` from a key produced by [`object_key`].
pub fn parse_object_key(key: &str) -> Option<(&str, &str)> {
    let (owner_id, rest) = key.trim_start_matches('/').split_once('/')?;
    let (invoice_id, file_name) = rest.split_once('_')?;
    if owner_id.is_empty() || invoice_id.is_empty() || file_name.is_empty() {
        return None;
    }
    Some((owner_id, invoice_id))
}

struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    fn new(path: Option<String>) -> anyhow::Result<Self> {
        let root = local_storage_root(path.as_deref());
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            anyhow::bail!("refusing object key outside storage root: {key}");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        if fs::try_exists(&path).await? {
            fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn upload_url(
        &self,
        key: &str,
        _content_type: &str,
        _ttl: Duration,
    ) -> anyhow::Result<String> {
        self.resolve(key)?;
        Ok(format!("/api/uploads/{key}"))
    }
}

#[derive(Default)]
struct MemoryStorage {
    objects: RwLock<HashMap<String, Bytes>>,
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> anyhow::Result<()> {
        self.objects.write().insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn upload_url(
        &self,
        key: &str,
        _content_type: &str,
        ttl: Duration,
    ) -> anyhow::Result<String> {
        Ok(format!("memory://{key}?expires_in={}", ttl.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_round_trip() {
        let key = object_key("user-7", "1f0c", "scan/march.pdf");

        assert_eq!(key, "user-7/1f0c_scan_march.pdf");
        assert_eq!(parse_object_key(&key), Some(("user-7", "1f0c")));
        assert_eq!(parse_object_key("user-7/no-separator.pdf"), None);
        assert_eq!(parse_object_key("flat.pdf"), None);
    }

    #[tokio::test]
    async fn local_storage_writes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(Some(dir.path().to_string_lossy().to_string())).unwrap();

        storage
            .put("owner/inv_a.pdf", Bytes::from_static(b"%PDF"), "application/pdf")
            .await
            .unwrap();

        let written = std::fs::read(dir.path().join("owner/inv_a.pdf")).unwrap();
        assert_eq!(written, b"%PDF");

        storage.delete("owner/inv_a.pdf").await.unwrap();
        assert!(!dir.path().join("owner/inv_a.pdf").exists());
    }

    #[tokio::test]
    async fn local_storage_bytes_are_readable_once_put_returns() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(Some(dir.path().to_string_lossy().to_string())).unwrap();

        for round in 0..25u8 {
            let body = vec![round; 64 * 1024];
            storage
                .put("owner/inv_b.pdf", Bytes::from(body.clone()), "application/pdf")
                .await
                .unwrap();

            let written = std::fs::read(dir.path().join("owner/inv_b.pdf")).unwrap();
            assert_eq!(written, body, "round {round}");
        }
    }

    #[tokio::test]
    async fn local_storage_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(Some(dir.path().to_string_lossy().to_string())).unwrap();

        let result = storage
            .put("../escape.pdf", Bytes::from_static(b"x"), "application/pdf")
            .await;

        assert!(result.is_err());
    }
}
