use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const MANIFEST_VERSION: &str = "1.0";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Unchanged,
    New,
    Modified,
    Moved,
    Deleted,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    /// Hex BLAKE3 digest; empty until the worker pool fills it in.
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub status: FileStatus,
}

impl FileRecord {
    pub fn has_hash(&self) -> bool {
        !self.content_hash.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirInfo {
    pub path: PathBuf,
    pub name: String,
    pub mod_time: DateTime<Utc>,
    pub file_count: u64,
    pub total_size: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub series_id: String,
    /// Id of the last episode produced for the series (`E001`, ...), empty before the first.
    #[serde(default)]
    pub episode_id: String,
    #[serde(default)]
    pub files: BTreeMap<PathBuf, FileRecord>,
    #[serde(default)]
    pub directories: BTreeMap<PathBuf, DirInfo>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Content hash -> canonical path owning that content.
    #[serde(default)]
    pub hash_to_file: BTreeMap<String, PathBuf>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::empty()
    }
}

impl Manifest {
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            created_at: Utc::now(),
            series_id: String::new(),
            episode_id: String::new(),
            files: BTreeMap::new(),
            directories: BTreeMap::new(),
            metadata: BTreeMap::new(),
            hash_to_file: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn knows_hash(&self, hash: &str) -> bool {
        self.hash_to_file.contains_key(hash)
    }

    /// Ordinal of the last episode recorded, 0 when none.
    pub fn last_episode_ordinal(&self) -> u32 {
        self.episode_id.trim_start_matches('E').parse().unwrap_or(0)
    }

    /// Every hashed record has an index entry, and every index entry points at
    /// a record carrying that hash.
    pub fn hash_index_consistent(&self) -> bool {
        let owners_ok = self.hash_to_file.iter().all(|(h, p)| {
            self.files.get(p).map(|r| &r.content_hash == h).unwrap_or(false)
        });
        let records_ok =
            self.files.values().filter(|r| r.has_hash()).all(|r| self.knows_hash(&r.content_hash));
        owners_ok && records_ok
    }
}

pub fn episode_name(ordinal: u32) -> String {
    format!("E{:03}", ordinal)
}
