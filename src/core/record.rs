/// Versioned identity records held by the storage tiers
use super::Metadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Lifecycle status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Inactive,
    Expired,
    Blocked,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Inactive => "inactive",
            RecordStatus::Expired => "expired",
            RecordStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(RecordStatus::Active),
            "inactive" => Ok(RecordStatus::Inactive),
            "expired" => Ok(RecordStatus::Expired),
            "blocked" => Ok(RecordStatus::Blocked),
            other => Err(format!("Unknown record status: {}", other)),
        }
    }
}

/// A stored identity profile.
///
/// The embedding is opaque to the store and must survive every
/// serialization boundary bit-for-bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub display_name: String,
    pub embedding: Vec<f32>,
    pub status: RecordStatus,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub metadata: Metadata,
    pub version: u64,
}

impl Record {
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            key: key.into(),
            display_name: display_name.into(),
            embedding,
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
            metadata,
            version: 1,
        }
    }

    /// Change the status, bumping `updated_at` and `version`
    pub fn set_status(&mut self, status: RecordStatus) {
        self.status = status;
        self.touch();
    }

    /// Mark the record as modified now; `updated_at` never goes below `created_at`
    pub fn touch(&mut self) {
        self.updated_at = SystemTime::now().max(self.created_at);
        self.version += 1;
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}
