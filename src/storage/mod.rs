/// Record storage: backend contract, backends, and the tiered manager
///
/// Every backend reports failures through `StorageResult`. The tiered
/// manager is the boundary where those failures are logged and absorbed
/// into `false`/absent, so nothing below it ever reaches a caller as an
/// error. Only the not-found wrappers (`get`, `remove`) raise.

pub mod file;
pub mod memory;
pub mod remote;
pub mod resp;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use remote::RemoteStore;

use crate::config::{ConfigError, StorageConfig};
use crate::core::Record;
use crate::error::{CoreError, CoreResult, ErrorSeverity, StorageError, StorageResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Contract implemented identically by every record store backend
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Upsert `record` under `key`, all-or-nothing
    async fn store(&self, key: &str, record: &Record) -> StorageResult<()>;

    /// Current record for `key`; a missing key is `Ok(None)`
    async fn retrieve(&self, key: &str) -> StorageResult<Option<Record>>;

    /// Remove `key`, reporting whether it existed
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Snapshot of the stored keys
    async fn list_keys(&self) -> StorageResult<HashSet<String>>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Concrete backend name reported in statistics
    fn backend_name(&self) -> &'static str;
}

/// Primary backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
    Redis,
    File,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Memory => "memory",
            StorageType::Redis => "redis",
            StorageType::File => "file",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageType::Memory),
            "redis" => Ok(StorageType::Redis),
            "file" => Ok(StorageType::File),
            other => Err(ConfigError::ValidationError(format!(
                "Unsupported storage type: {}",
                other
            ))),
        }
    }
}

/// Observational summary of the storage tiers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStatistics {
    pub total_records: usize,
    pub storage_type: StorageType,
    pub primary_backend: &'static str,
    pub secondary_backend: Option<&'static str>,
}

/// Primary backend plus an optional file backup tier.
///
/// All operations are serialized by one manager-wide lock, so calls for the
/// same key are linearized across both tiers.
pub struct TieredStorage {
    storage_type: StorageType,
    primary: Box<dyn RecordStore>,
    secondary: Option<Box<dyn RecordStore>>,
    lock: Mutex<()>,
}

impl TieredStorage {
    pub fn new(
        storage_type: StorageType,
        primary: Box<dyn RecordStore>,
        secondary: Option<Box<dyn RecordStore>>,
    ) -> Self {
        Self {
            storage_type,
            primary,
            secondary,
            lock: Mutex::new(()),
        }
    }

    /// Build the configured primary and, unless the primary is already the
    /// file backend, a file backup tier.
    ///
    /// Invalid sizes, an unreachable remote KV or an unusable directory fail
    /// here; after construction no storage error surfaces to callers.
    pub async fn from_config(config: &StorageConfig) -> CoreResult<Self> {
        config.validate()?;

        let primary: Box<dyn RecordStore> = match config.storage_type {
            StorageType::Memory => {
                Box::new(MemoryStore::new(config.cache_size, config.cache_ttl()))
            }
            StorageType::Redis => Box::new(RemoteStore::connect(&config.redis).await?),
            StorageType::File => Box::new(FileStore::new(&config.file_path).await?),
        };

        let secondary: Option<Box<dyn RecordStore>> = match config.storage_type {
            StorageType::File => None,
            _ => Some(Box::new(FileStore::new(&config.file_path).await?)),
        };

        info!(
            "Storage initialized: primary={} secondary={}",
            primary.backend_name(),
            secondary.as_ref().map_or("none", |s| s.backend_name())
        );

        Ok(Self::new(config.storage_type, primary, secondary))
    }

    pub fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    /// Write to the primary, then best-effort to the backup.
    ///
    /// Returns the primary's outcome; a backup failure is only logged.
    pub async fn store(&self, key: &str, record: &Record) -> bool {
        let _guard = self.lock.lock().await;

        if let Err(e) = self.primary.store(key, record).await {
            log_absorbed(&format!("Primary store of {}", key), &e);
            return false;
        }

        if let Some(secondary) = &self.secondary {
            if let Err(e) = secondary.store(key, record).await {
                log_absorbed(&format!("Backup store of {}", key), &e);
            }
        }

        true
    }

    /// Read the primary, falling back to the backup and repairing the
    /// primary from it on a hit
    pub async fn retrieve(&self, key: &str) -> Option<Record> {
        let _guard = self.lock.lock().await;

        match self.primary.retrieve(key).await {
            Ok(Some(record)) => return Some(record),
            Ok(None) => {}
            Err(e) => log_absorbed(&format!("Primary retrieve of {}", key), &e),
        }

        let secondary = self.secondary.as_ref()?;
        let record = match secondary.retrieve(key).await {
            Ok(found) => found?,
            Err(e) => {
                log_absorbed(&format!("Backup retrieve of {}", key), &e);
                return None;
            }
        };

        match self.primary.store(key, &record).await {
            Ok(()) => info!("Repaired primary from backup for {}", key),
            Err(e) => log_absorbed(&format!("Repair of {} from backup", key), &e),
        }

        Some(record)
    }

    /// Delete from both tiers, returning whether the primary held the key
    pub async fn delete(&self, key: &str) -> bool {
        let _guard = self.lock.lock().await;

        let existed = match self.primary.delete(key).await {
            Ok(existed) => existed,
            Err(e) => {
                log_absorbed(&format!("Primary delete of {}", key), &e);
                false
            }
        };

        if let Some(secondary) = &self.secondary {
            if let Err(e) = secondary.delete(key).await {
                log_absorbed(&format!("Backup delete of {}", key), &e);
            }
        }

        existed
    }

    /// Keys of the primary tier only; backup-only keys are not listed
    pub async fn list_keys(&self) -> HashSet<String> {
        let _guard = self.lock.lock().await;

        self.primary.list_keys().await.unwrap_or_else(|e| {
            log_absorbed("Listing primary keys", &e);
            HashSet::new()
        })
    }

    /// Primary-only existence check
    pub async fn exists(&self, key: &str) -> bool {
        let _guard = self.lock.lock().await;

        self.primary.exists(key).await.unwrap_or_else(|e| {
            log_absorbed(&format!("Primary exists check of {}", key), &e);
            false
        })
    }

    /// `retrieve` that raises `NotFound` for an absent key
    pub async fn get(&self, key: &str) -> CoreResult<Record> {
        self.retrieve(key)
            .await
            .ok_or_else(|| CoreError::record_not_found(key))
    }

    /// `delete` that raises `NotFound` when the primary did not hold the key
    pub async fn remove(&self, key: &str) -> CoreResult<()> {
        if self.delete(key).await {
            Ok(())
        } else {
            Err(CoreError::record_not_found(key))
        }
    }

    pub async fn statistics(&self) -> StorageStatistics {
        StorageStatistics {
            total_records: self.list_keys().await.len(),
            storage_type: self.storage_type,
            primary_backend: self.primary.backend_name(),
            secondary_backend: self.secondary.as_ref().map(|s| s.backend_name()),
        }
    }
}

/// Log a backend failure the manager absorbs, at a level set by its severity
fn log_absorbed(context: &str, err: &StorageError) {
    let recoverable = err.is_recoverable();
    match err.severity() {
        ErrorSeverity::Error => error!(recoverable, "{} failed: {}", context, err),
        ErrorSeverity::Warning => warn!(recoverable, "{} failed: {}", context, err),
        ErrorSeverity::Info => debug!(recoverable, "{} rejected: {}", context, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Metadata;
    use crate::error::StorageError;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FailingStore;

    #[async_trait]
    impl RecordStore for FailingStore {
        async fn store(&self, _key: &str, _record: &Record) -> StorageResult<()> {
            Err(StorageError::connection("down"))
        }
        async fn retrieve(&self, _key: &str) -> StorageResult<Option<Record>> {
            Err(StorageError::connection("down"))
        }
        async fn delete(&self, _key: &str) -> StorageResult<bool> {
            Err(StorageError::connection("down"))
        }
        async fn list_keys(&self) -> StorageResult<HashSet<String>> {
            Err(StorageError::connection("down"))
        }
        async fn exists(&self, _key: &str) -> StorageResult<bool> {
            Err(StorageError::connection("down"))
        }
        fn backend_name(&self) -> &'static str {
            "FailingStore"
        }
    }

    fn record(key: &str) -> Record {
        Record::new(key, "Carol", vec![0.5, 0.25, -0.125], Metadata::new())
    }

    async fn memory_over_file(dir: &TempDir) -> TieredStorage {
        TieredStorage::new(
            StorageType::Memory,
            Box::new(MemoryStore::new(100, Duration::from_secs(3600))),
            Some(Box::new(FileStore::new(dir.path()).await.unwrap())),
        )
    }

    #[tokio::test]
    async fn test_store_writes_both_tiers() {
        let dir = TempDir::new().unwrap();
        let storage = memory_over_file(&dir).await;
        let r = record("k1");

        assert!(storage.store("k1", &r).await);
        assert_eq!(storage.retrieve("k1").await, Some(r.clone()));

        let backup = FileStore::new(dir.path()).await.unwrap();
        assert_eq!(backup.retrieve("k1").await.unwrap(), Some(r));
    }

    #[tokio::test]
    async fn test_retrieve_repairs_primary_from_backup() {
        let dir = TempDir::new().unwrap();
        let storage = memory_over_file(&dir).await;
        let r = record("cold");

        // Present only in the backup tier
        FileStore::new(dir.path()).await.unwrap().store("cold", &r).await.unwrap();
        assert!(!storage.exists("cold").await);
        assert!(storage.list_keys().await.is_empty());

        assert_eq!(storage.retrieve("cold").await, Some(r));
        assert!(storage.exists("cold").await);
        assert!(storage.list_keys().await.contains("cold"));
    }

    #[tokio::test]
    async fn test_delete_reports_primary_outcome() {
        let dir = TempDir::new().unwrap();
        let storage = memory_over_file(&dir).await;
        let backup = FileStore::new(dir.path()).await.unwrap();

        // Backup-only key: primary says it did not exist, backup copy is still removed
        backup.store("k1", &record("k1")).await.unwrap();
        assert!(!storage.delete("k1").await);
        assert!(!backup.exists("k1").await.unwrap());

        storage.store("k2", &record("k2")).await;
        assert!(storage.delete("k2").await);
        assert_eq!(storage.retrieve("k2").await, None);
    }

    fn writer_record(writer: usize) -> Record {
        let name = format!("writer-{}", writer);
        Record::new("shared", name, vec![writer as f32; 64], Metadata::new())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access_sees_whole_records() {
        let dir = TempDir::new().unwrap();
        let storage = std::sync::Arc::new(memory_over_file(&dir).await);
        storage.store("shared", &writer_record(0)).await;

        let mut tasks = Vec::new();
        for writer in 1..=8 {
            let storage = storage.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..20 {
                    assert!(storage.store("shared", &writer_record(writer)).await);
                }
            }));
        }
        for _ in 0..4 {
            let storage = storage.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let record = storage.retrieve("shared").await.unwrap();
                    let writer: usize = record.display_name["writer-".len()..].parse().unwrap();
                    assert_eq!(record.embedding, vec![writer as f32; 64]);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Every store reached both tiers before the next one started
        let primary = storage.retrieve("shared").await.unwrap();
        let backup = FileStore::new(dir.path()).await.unwrap();
        assert_eq!(backup.retrieve("shared").await.unwrap(), Some(primary));
    }

    #[tokio::test]
    async fn test_backup_failure_is_swallowed() {
        let storage = TieredStorage::new(
            StorageType::Memory,
            Box::new(MemoryStore::new(10, Duration::from_secs(60))),
            Some(Box::new(FailingStore)),
        );
        let r = record("k1");

        assert!(storage.store("k1", &r).await);
        assert_eq!(storage.retrieve("k1").await, Some(r));
        assert_eq!(storage.retrieve("missing").await, None);
        assert!(storage.delete("k1").await);
    }

    #[tokio::test]
    async fn test_primary_failure_is_absorbed() {
        let dir = TempDir::new().unwrap();
        let storage = TieredStorage::new(
            StorageType::Redis,
            Box::new(FailingStore),
            Some(Box::new(FileStore::new(dir.path()).await.unwrap())),
        );

        assert!(!storage.store("k1", &record("k1")).await);
        assert!(!storage.exists("k1").await);
        assert!(storage.list_keys().await.is_empty());
        assert!(!storage.delete("k1").await);
        assert!(storage.get("k1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_not_found_wrappers() {
        let dir = TempDir::new().unwrap();
        let storage = memory_over_file(&dir).await;

        assert!(storage.get("nope").await.unwrap_err().is_not_found());
        assert!(storage.remove("nope").await.unwrap_err().is_not_found());

        storage.store("k1", &record("k1")).await;
        assert_eq!(storage.get("k1").await.unwrap().key, "k1");
        assert!(storage.remove("k1").await.is_ok());
    }

    #[tokio::test]
    async fn test_from_config_file_primary_has_no_backup() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            storage_type: StorageType::File,
            file_path: dir.path().to_string_lossy().to_string(),
            ..Default::default()
        };

        let storage = TieredStorage::from_config(&config).await.unwrap();
        storage.store("k1", &record("k1")).await;

        let stats = storage.statistics().await;
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.storage_type, StorageType::File);
        assert_eq!(stats.primary_backend, "FileStore");
        assert_eq!(stats.secondary_backend, None);
    }

    #[tokio::test]
    async fn test_from_config_remote_primary() {
        let dir = TempDir::new().unwrap();
        let (addr, _db) = remote::tests::spawn_fake_server(None).await;
        let config = StorageConfig {
            storage_type: StorageType::Redis,
            file_path: dir.path().to_string_lossy().to_string(),
            redis: remote::tests::config_for(addr),
            ..Default::default()
        };

        let storage = TieredStorage::from_config(&config).await.unwrap();
        let r = record("k1");
        assert!(storage.store("k1", &r).await);
        assert_eq!(storage.retrieve("k1").await, Some(r));

        let stats = storage.statistics().await;
        assert_eq!(stats.primary_backend, "RemoteStore");
        assert_eq!(stats.secondary_backend, Some("FileStore"));
    }

    #[tokio::test]
    async fn test_from_config_unreachable_remote_fails() {
        let dir = TempDir::new().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = StorageConfig {
            storage_type: StorageType::Redis,
            file_path: dir.path().to_string_lossy().to_string(),
            redis: remote::tests::config_for(addr),
            ..Default::default()
        };

        let result = TieredStorage::from_config(&config).await;
        assert!(matches!(result, Err(CoreError::Storage(_))));
    }

    #[tokio::test]
    async fn test_from_config_rejects_zero_capacity() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            file_path: dir.path().to_string_lossy().to_string(),
            cache_size: 0,
            ..Default::default()
        };

        let result = TieredStorage::from_config(&config).await;
        assert!(matches!(
            result,
            Err(CoreError::Config(ConfigError::ValidationError(_)))
        ));
    }

    #[test]
    fn test_storage_type_parsing() {
        assert_eq!("Redis".parse::<StorageType>().unwrap(), StorageType::Redis);
        assert_eq!(StorageType::File.to_string(), "file");
        assert!(matches!(
            "tape".parse::<StorageType>(),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
