/// One JSON document per record under a base directory

use super::RecordStore;
use crate::core::Record;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const EXTENSION: &str = "json";

/// File backend, storing `<key>.json` files
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `base_dir`, creating the directory if absent
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> StorageResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    /// Path of the document for `key`; keys that would escape the base
    /// directory are rejected
    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || key.contains('/')
            || key.contains('\\')
            || key.contains("..")
            || key.contains('\0')
        {
            return Err(StorageError::invalid_key(key));
        }
        Ok(self.base_dir.join(format!("{}.{}", key, EXTENSION)))
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn store(&self, key: &str, record: &Record) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let content = serde_json::to_vec_pretty(record)?;

        // Write aside and rename so a reader never sees a half-written file
        let tmp_path = path.with_extension(format!("{}.tmp", EXTENSION));
        fs::write(&tmp_path, &content).await?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> StorageResult<Option<Record>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self) -> StorageResult<HashSet<String>> {
        let mut keys = HashSet::new();
        let mut dir = fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(key) = name.strip_suffix(".json") {
                if !key.is_empty() {
                    keys.insert(key.to_string());
                }
            }
        }

        Ok(keys)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    fn backend_name(&self) -> &'static str {
        "FileStore"
    }
}
