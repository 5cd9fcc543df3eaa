/// Record registration and verification over the storage tiers
pub mod embedding;

pub use embedding::{cosine_similarity, EmbeddingService};

use crate::core::{Metadata, Record, RecordStatus};
use crate::error::{CoreError, CoreResult};
use crate::storage::{StorageStatistics, TieredStorage};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info};

/// Outcome of matching a candidate embedding against stored records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    /// Best scoring active record, if any record was scored
    pub matched_key: Option<String>,
    /// Best score, 0 when nothing was scored
    pub score: f32,
    pub all_scores: HashMap<String, f32>,
    /// `score >= threshold` with at least one scored record
    pub is_verified: bool,
    /// Wall time spent producing this result, embedding included
    pub processing_time: Duration,
    /// When the result was produced
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordStatistics {
    pub total_records: usize,
    pub active_records: usize,
    pub inactive_records: usize,
    pub storage: StorageStatistics,
}

/// Register, verify and manage records
pub struct RecordService {
    storage: Arc<TieredStorage>,
    embedder: Option<Arc<dyn EmbeddingService>>,
}

impl RecordService {
    pub fn new(storage: Arc<TieredStorage>) -> Self {
        Self {
            storage,
            embedder: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingService>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn storage(&self) -> &Arc<TieredStorage> {
        &self.storage
    }

    /// Store a new active record and return its key.
    ///
    /// Without an explicit key one is derived from the name and metadata.
    /// An existing record under the same key is overwritten.
    pub async fn register(
        &self,
        display_name: &str,
        embedding: Vec<f32>,
        metadata: Metadata,
        key: Option<String>,
    ) -> CoreResult<String> {
        let key = match key {
            Some(key) => key,
            None => derive_key(display_name, &metadata)?,
        };

        let record = Record::new(key.clone(), display_name, embedding, metadata);
        if !self.storage.store(&key, &record).await {
            return Err(CoreError::internal(format!("failed to persist record {}", key)));
        }

        info!("Registered record {} ({})", key, display_name);
        Ok(key)
    }

    /// Embed `audio` through the embedding service, then register it
    pub async fn register_audio(
        &self,
        display_name: &str,
        audio: &[u8],
        metadata: Metadata,
        key: Option<String>,
    ) -> CoreResult<String> {
        let embedding = self.embedder()?.embed(audio).await?;
        self.register(display_name, embedding, metadata, key).await
    }

    /// Score `candidate` against one record or every listed record.
    ///
    /// Only active records are scored.
    pub async fn verify(
        &self,
        candidate: &[f32],
        threshold: f32,
        key: Option<&str>,
    ) -> VerificationResult {
        let started = Instant::now();
        let keys: Vec<String> = match key {
            Some(key) => vec![key.to_string()],
            None => self.storage.list_keys().await.into_iter().collect(),
        };

        let mut all_scores = HashMap::new();
        for key in keys {
            let Some(record) = self.storage.retrieve(&key).await else {
                continue;
            };
            if !record.is_active() {
                continue;
            }
            all_scores.insert(key, self.similarity(candidate, &record.embedding));
        }

        // Highest score wins; equal scores resolve to the smaller key
        let best = all_scores
            .iter()
            .max_by(|(ka, sa), (kb, sb)| sa.total_cmp(sb).then_with(|| kb.cmp(ka)))
            .map(|(k, s)| (k.clone(), *s));

        let (matched_key, score) = match best {
            Some((matched, score)) => (Some(matched), score),
            None => (None, 0.0),
        };
        let result = VerificationResult {
            is_verified: matched_key.is_some() && score >= threshold,
            matched_key,
            score,
            all_scores,
            processing_time: started.elapsed(),
            timestamp: SystemTime::now(),
        };

        debug!(
            "Verification scored {} records, best {:?} ({:.4})",
            result.all_scores.len(),
            result.matched_key,
            result.score
        );
        result
    }

    /// Embed `audio`, then verify it
    pub async fn verify_audio(
        &self,
        audio: &[u8],
        threshold: f32,
        key: Option<&str>,
    ) -> CoreResult<VerificationResult> {
        let started = Instant::now();
        let candidate = self.embedder()?.embed(audio).await?;
        let mut result = self.verify(&candidate, threshold, key).await;
        result.processing_time = started.elapsed();
        Ok(result)
    }

    pub async fn get(&self, key: &str) -> CoreResult<Record> {
        self.storage.get(key).await
    }

    pub async fn delete(&self, key: &str) -> CoreResult<()> {
        self.storage.remove(key).await?;
        info!("Deleted record {}", key);
        Ok(())
    }

    /// Change a record's status, bumping `updated_at` and `version`
    pub async fn update_status(&self, key: &str, status: RecordStatus) -> CoreResult<Record> {
        let mut record = self.storage.get(key).await?;
        record.set_status(status);

        if !self.storage.store(key, &record).await {
            return Err(CoreError::internal(format!("failed to persist record {}", key)));
        }
        Ok(record)
    }

    /// Records in the primary tier, optionally filtered by status, ordered by key
    pub async fn list(&self, status: Option<RecordStatus>) -> Vec<Record> {
        let mut keys: Vec<String> = self.storage.list_keys().await.into_iter().collect();
        keys.sort();

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.storage.retrieve(&key).await {
                if status.map_or(true, |s| record.status == s) {
                    records.push(record);
                }
            }
        }
        records
    }

    pub async fn statistics(&self) -> RecordStatistics {
        let records = self.list(None).await;
        let active_records = records.iter().filter(|r| r.is_active()).count();

        RecordStatistics {
            total_records: records.len(),
            active_records,
            inactive_records: records.len() - active_records,
            storage: self.storage.statistics().await,
        }
    }

    fn embedder(&self) -> CoreResult<&Arc<dyn EmbeddingService>> {
        self.embedder
            .as_ref()
            .ok_or_else(|| CoreError::embedding("no embedding service configured"))
    }

    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match &self.embedder {
            Some(embedder) => embedder.similarity(a, b),
            None => cosine_similarity(a, b),
        }
    }
}

/// Derive a record key: the first 16 hex chars of the MD5 of
/// `<display_name>_<metadata as key-sorted JSON>`.
///
/// The JSON uses `", "` / `": "` separators and `\uXXXX` escapes for
/// non-ASCII text, so keys stay stable across producers.
pub fn derive_key(display_name: &str, metadata: &Metadata) -> CoreResult<String> {
    let sorted: BTreeMap<&String, &serde_json::Value> = metadata.iter().collect();

    let mut json = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut json, SpacedAsciiFormatter);
    serde::Serialize::serialize(&sorted, &mut serializer)
        .map_err(|e| CoreError::internal(format!("failed to encode metadata: {}", e)))?;

    let mut content = Vec::with_capacity(display_name.len() + 1 + json.len());
    content.extend_from_slice(display_name.as_bytes());
    content.push(b'_');
    content.extend_from_slice(&json);

    let digest = format!("{:x}", md5::compute(&content));
    Ok(digest[..16].to_string())
}

/// Compact JSON with spaced separators and ASCII-only strings
struct SpacedAsciiFormatter;

impl serde_json::ser::Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}
