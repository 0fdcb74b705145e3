use super::{insert_record, rank_similar, MemoryRecord, MemoryStore};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Store persisted as a single JSON document on disk.
///
/// Reads are served from memory; every `put` rewrites the file through a
/// temporary sibling and a rename so a crash never leaves a torn file.
pub struct FileStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, MemoryRecord>>,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (or create on first write) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                AppError::Storage(format!("failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        info!("Opened memory file {:?} ({} records)", path, records.len());

        Ok(Self {
            path,
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
        })
    }

    async fn flush(&self, snapshot: String) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Storage(format!("failed to create {:?}: {}", parent, e)))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, snapshot)
            .await
            .map_err(|e| AppError::Storage(format!("failed to write {:?}: {}", tmp, e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AppError::Storage(format!("failed to replace {:?}: {}", self.path, e)))?;

        debug!("Flushed memory file {:?}", self.path);
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for FileStore {
    async fn put(&self, record: MemoryRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = {
            let mut records = self.records.write();
            insert_record(&mut records, record)?;
            serde_json::to_string_pretty(&*records)?
        };
        self.flush(snapshot).await
    }

    async fn get(&self, key: &str) -> Result<Option<MemoryRecord>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn similar(&self, query_text: &str, k: usize) -> Result<Vec<MemoryRecord>> {
        Ok(rank_similar(self.records.read().values(), query_text, k))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<MemoryRecord>> {
        Ok(self
            .records
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, r)| r.clone())
            .collect())
    }
}
