//! Episode packaging: greedy size-bounded batching and the per-batch
//! archive step.

use crate::archive::Archiver;
use crate::error::{Error, Result};
use crate::manifest::{episode_name, FileRecord};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    Planned,
    Packaging,
    Completed,
    Failed,
}

/// One planned group of files, in input order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub files: Vec<PathBuf>,
    pub size: u64,
}

impl Batch {
    fn seal(&mut self) -> Batch {
        std::mem::replace(self, Batch { files: Vec::new(), size: 0 })
    }

    /// A single file larger than the episode ceiling.
    pub fn is_oversize(&self, max_episode_bytes: u64) -> bool {
        self.size > max_episode_bytes
    }
}

/// Left-to-right greedy packing. A batch is sealed when the next file would
/// push it past `max_episode_bytes`; a file larger than the ceiling gets a
/// batch of its own. Fails with `LimitExceeded` when the whole input exceeds
/// `max_total_bytes`.
pub fn plan(files: &[FileRecord], max_episode_bytes: u64, max_total_bytes: u64) -> Result<Vec<Batch>> {
    let total = files.iter().fold(0u64, |acc, f| acc.saturating_add(f.size));
    if total > max_total_bytes {
        return Err(Error::LimitExceeded { requested: total, limit: max_total_bytes });
    }

    let mut batches = Vec::new();
    let mut cur = Batch { files: Vec::new(), size: 0 };
    for f in files {
        if !cur.files.is_empty() && cur.size.saturating_add(f.size) > max_episode_bytes {
            batches.push(cur.seal());
        }
        cur.files.push(f.path.clone());
        cur.size += f.size;
        if cur.size > max_episode_bytes {
            batches.push(cur.seal());
        }
    }
    if !cur.files.is_empty() {
        batches.push(cur);
    }
    Ok(batches)
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub ordinal: u32,
    pub id: String,
    pub status: EpisodeStatus,
    pub file_count: usize,
    pub estimated_size: u64,
    /// On-disk archive size once completed; the estimate until then.
    pub size: u64,
    pub archive_path: PathBuf,
    #[serde(skip)]
    pub files: Vec<PathBuf>,
}

impl Episode {
    pub fn new(ordinal: u32, batch: Batch, archive_path: PathBuf) -> Self {
        Self {
            ordinal,
            id: episode_name(ordinal),
            status: EpisodeStatus::Planned,
            file_count: batch.files.len(),
            estimated_size: batch.size,
            size: batch.size,
            archive_path,
            files: batch.files,
        }
    }

    /// Run the archive step for this episode: planned -> packaging ->
    /// completed | failed. Any file already at `archive_path` is removed
    /// first so the archive only ever holds this batch.
    pub fn execute(
        &mut self,
        archiver: &dyn Archiver,
        root: &Path,
        password: Option<&str>,
    ) -> Result<()> {
        self.status = EpisodeStatus::Packaging;
        info!(episode = %self.id, files = self.file_count, bytes = self.estimated_size, "packaging");
        // Leftover from a run that never saved its manifest; 7z would append to it.
        if self.archive_path.exists() {
            warn!(path = %self.archive_path.display(), "replacing stale archive");
            if let Err(e) = std::fs::remove_file(&self.archive_path) {
                self.status = EpisodeStatus::Failed;
                return Err(Error::io(&self.archive_path, e));
            }
        }
        if let Err(e) = archiver.pack(&self.files, &self.archive_path, root, password) {
            self.status = EpisodeStatus::Failed;
            return Err(Error::Packaging { episode: self.id.clone(), message: e.to_string() });
        }
        self.status = EpisodeStatus::Completed;
        match std::fs::metadata(&self.archive_path) {
            Ok(m) => self.size = m.len(),
            Err(e) => warn!(path = %self.archive_path.display(), "cannot stat archive, keeping estimate: {}", e),
        }
        Ok(())
    }
}
