use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::row::StoreError;

#[derive(Debug, Clone, Default)]
pub struct BlobMetadata {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// `put/get/delete/list/copy/signed_url`. Used for periodic durable
/// snapshots of the embedded database and for backups.
#[async_trait]
pub trait BlobSink: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, meta: BlobMetadata) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
    async fn copy(&self, src: &str, dst: &str) -> Result<(), StoreError>;
    async fn signed_url(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
}

/// Filesystem-backed [`BlobSink`]: each key maps to one file under
/// `root`. Sufficient for single-node backups; multi-region replication is
/// out of scope.
pub struct FileBlobSink {
    root: PathBuf,
    guard: Mutex<()>,
}

impl FileBlobSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            guard: Mutex::new(()),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl BlobSink for FileBlobSink {
    async fn put(&self, key: &str, bytes: Vec<u8>, _meta: BlobMetadata) -> Result<(), StoreError> {
        let _lock = self.guard.lock().await;
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.path_for(prefix);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(StoreError::Backend(e.to_string())),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            if let Some(name) = entry.file_name().to_str() {
                out.push(format!("{}/{}", prefix.trim_end_matches('/'), name));
            }
        }
        Ok(out)
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        let bytes = self
            .get(src)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("no such key: {src}")))?;
        self.put(dst, bytes, BlobMetadata::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let dir = tempdir();
        let sink = FileBlobSink::new(&dir);
        sink.put("snapshots/a.db", b"data".to_vec(), BlobMetadata::default())
            .await
            .unwrap();
        assert_eq!(
            sink.get("snapshots/a.db").await.unwrap(),
            Some(b"data".to_vec())
        );
        assert!(sink.delete("snapshots/a.db").await.unwrap());
        assert_eq!(sink.get("snapshots/a.db").await.unwrap(), None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("llmgate-blob-test-{}", std::process::id()));
        p
    }
}
