//! Orchestrator: sequences load, scan, diff, hash, plan, package and save.

use crate::archive::Archiver;
use crate::config::EngineConfig;
use crate::episode::{self, Batch, Episode};
use crate::error::{Error, PhaseExt, Phase, RunError};
use crate::index::{self, ScanOptions, Snapshot};
use crate::manifest::{episode_name, FileRecord, FileStatus, Manifest};
use crate::progress::{CancelToken, Progress, Stage};
use crate::store::{self, RunLock};
use crate::worker::{HashPool, WorkerResult};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub new: usize,
    pub modified: usize,
    pub deleted: usize,
    /// Bytes of new and modified files.
    pub total_bytes: u64,
}

impl ChangeSummary {
    pub fn of(suspects: &Snapshot) -> Self {
        let mut s = Self::default();
        for rec in suspects.values() {
            match rec.status {
                FileStatus::New | FileStatus::Moved => {
                    s.new += 1;
                    s.total_bytes += rec.size;
                }
                FileStatus::Modified => {
                    s.modified += 1;
                    s.total_bytes += rec.size;
                }
                FileStatus::Deleted => s.deleted += 1,
                FileStatus::Unchanged => {}
            }
        }
        s
    }

    pub fn is_empty(&self) -> bool {
        self.new == 0 && self.modified == 0 && self.deleted == 0
    }
}

/// Preview of a backup: no hashing, no packaging, nothing persisted.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Preparation {
    pub summary: ChangeSummary,
    /// Size-only estimate; dedup during execution can only shrink it.
    pub episodes: Vec<Episode>,
    pub within_limit: bool,
    #[serde(skip)]
    pub suspects: Snapshot,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub series_id: String,
    pub summary: ChangeSummary,
    pub episodes: Vec<Episode>,
    pub files_packed: usize,
    pub metadata_only: usize,
    pub hash_failures: Vec<PathBuf>,
    #[serde(skip)]
    pub manifest: Manifest,
}

pub struct Engine {
    config: EngineConfig,
    archiver: Arc<dyn Archiver>,
    progress: Progress,
    cancel: CancelToken,
}

// Stops the progress ticker on every exit path.
struct Ticker<'a>(&'a Progress);

impl Drop for Ticker<'_> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

pub fn archive_file_name(series_id: &str, episode_id: &str) -> String {
    format!("{}-{}.7z", series_id, episode_id)
}

impl Engine {
    pub fn new(config: EngineConfig, archiver: Arc<dyn Archiver>) -> Self {
        Self { config, archiver, progress: Progress::default(), cancel: CancelToken::new() }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn check_cancel(&self, phase: Phase) -> Result<(), RunError> {
        if self.cancel.is_cancelled() {
            return Err(RunError::new(phase, Error::Cancelled));
        }
        Ok(())
    }

    fn load_scan_diff(&self, root: &Path) -> Result<(Manifest, Snapshot, Snapshot), RunError> {
        let previous = store::load(root);
        let opts = ScanOptions::with_exclude(&self.config.exclude).phase(Phase::Scan)?;
        let current = index::scan(root, &opts, &self.progress, &self.cancel).phase(Phase::Scan)?;
        let suspects = index::diff(&current, &previous);
        info!(current = current.len(), suspects = suspects.len(), "diff complete");
        Ok((previous, current, suspects))
    }

    /// Cheap preview: load, scan, diff and a size-only episode estimate.
    pub fn prepare(&self, workspace: &Path) -> Result<Preparation, RunError> {
        let root = index::absolute(workspace).phase(Phase::Load)?;
        self.progress.start(self.config.progress_interval);
        let _ticker = Ticker(&self.progress);

        let (previous, _, suspects) = self.load_scan_diff(&root)?;
        let summary = ChangeSummary::of(&suspects);
        let candidates: Vec<FileRecord> =
            suspects.values().filter(|r| r.status != FileStatus::Deleted).cloned().collect();
        let batches =
            episode::plan(&candidates, self.config.max_episode_bytes, u64::MAX).phase(Phase::Plan)?;
        let episodes = number_episodes(&previous, batches, |_| PathBuf::new());
        let within_limit = summary.total_bytes <= self.config.max_total_bytes;
        info!(
            new = summary.new,
            modified = summary.modified,
            deleted = summary.deleted,
            bytes = summary.total_bytes,
            episodes = episodes.len(),
            "preparation finished"
        );
        Ok(Preparation { summary, episodes, within_limit, suspects })
    }

    /// Full run. The manifest is saved only after every episode completes.
    pub fn execute(
        &self,
        workspace: &Path,
        delivery: &Path,
        password: Option<&str>,
    ) -> Result<Execution, RunError> {
        let root = index::absolute(workspace).phase(Phase::Load)?;
        let delivery = index::absolute(delivery).phase(Phase::Load)?;
        let _lock = RunLock::acquire(&root).phase(Phase::Load)?;
        self.progress.start(self.config.progress_interval);
        let _ticker = Ticker(&self.progress);

        let (previous, current, suspects) = self.load_scan_diff(&root)?;
        let summary = ChangeSummary::of(&suspects);
        if summary.total_bytes > self.config.max_total_bytes {
            return Err(RunError::new(
                Phase::Diff,
                Error::LimitExceeded {
                    requested: summary.total_bytes,
                    limit: self.config.max_total_bytes,
                },
            ));
        }
        self.check_cancel(Phase::Hash)?;

        let pool = HashPool::new(self.config.concurrency, self.config.small_file_threshold_bytes)
            .phase(Phase::Hash)?;
        let result = pool.run(suspects, &previous, &self.progress, &self.cancel).phase(Phase::Hash)?;

        let batches = episode::plan(
            &result.files_to_pack,
            self.config.max_episode_bytes,
            self.config.max_total_bytes,
        )
        .phase(Phase::Plan)?;
        let series_id = if previous.series_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            previous.series_id.clone()
        };
        let mut episodes = number_episodes(&previous, batches, |id| {
            delivery.join(archive_file_name(&series_id, id))
        });

        let mut next = assemble(&previous, current, &result, &series_id, &root);

        // Archives need the directory; the manifest copy only wants it.
        if let Err(e) = std::fs::create_dir_all(&delivery) {
            if !episodes.is_empty() {
                return Err(RunError::new(Phase::Package, Error::io(&delivery, e)));
            }
            warn!(path = %delivery.display(), "cannot create delivery directory: {}", e);
        }
        self.progress.set_stage(Stage::Packaging, result.pack_bytes());
        for ep in episodes.iter_mut() {
            self.check_cancel(Phase::Package)?;
            if let Err(e) = ep.execute(self.archiver.as_ref(), &root, password) {
                if ep.archive_path.exists() {
                    let _ = std::fs::remove_file(&ep.archive_path);
                }
                warn!(episode = %ep.id, "halting: {}", e);
                return Err(RunError::new(Phase::Package, e));
            }
            self.progress.add(ep.estimated_size);
            self.progress.emit();
        }

        if let Some(last) = episodes.last() {
            next.episode_id = last.id.clone();
        }
        let hash_failures: Vec<PathBuf> = result.failures.iter().filter_map(failed_path).collect();
        next.metadata.insert("episodes".into(), json!(episodes.iter().map(|e| &e.id).collect::<Vec<_>>()));
        next.metadata.insert("packedBytes".into(), json!(result.pack_bytes()));
        next.metadata.insert("filesPacked".into(), json!(result.files_to_pack.len()));
        next.metadata.insert("metadataOnly".into(), json!(result.metadata_only.len()));
        next.metadata.insert("hashFailures".into(), json!(hash_failures.len()));
        next.metadata.insert(
            "tool".into(),
            json!(format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
        );

        store::save(&root, Some(&delivery), &mut next).phase(Phase::Save)?;
        info!(series = %series_id, episodes = episodes.len(), "backup complete");

        Ok(Execution {
            series_id,
            summary,
            episodes,
            files_packed: result.files_to_pack.len(),
            metadata_only: result.metadata_only.len(),
            hash_failures,
            manifest: next,
        })
    }
}

/// Number batches as episodes continuing the series recorded in `previous`.
fn number_episodes(
    previous: &Manifest,
    batches: Vec<Batch>,
    archive_path: impl Fn(&str) -> PathBuf,
) -> Vec<Episode> {
    let first = previous.last_episode_ordinal() + 1;
    batches
        .into_iter()
        .enumerate()
        .map(|(i, b)| {
            let ordinal = first + i as u32;
            let path = archive_path(&episode_name(ordinal));
            Episode::new(ordinal, b, path)
        })
        .collect()
}

fn failed_path(e: &Error) -> Option<PathBuf> {
    match e {
        Error::Hash { path, .. } => Some(path.clone()),
        _ => None,
    }
}

/// Next-generation manifest: seeded from a copy of the previous hash index,
/// overlaid with the current scan and this run's hashes. Files whose hash
/// could not be computed are left out so the next run sees them as new.
pub fn assemble(
    previous: &Manifest,
    current: Snapshot,
    result: &WorkerResult,
    series_id: &str,
    root: &Path,
) -> Manifest {
    let mut next = Manifest::empty();
    next.series_id = series_id.to_string();
    next.episode_id = previous.episode_id.clone();
    next.hash_to_file = previous.hash_to_file.clone();

    let fresh: HashMap<&Path, &FileRecord> = result
        .files_to_pack
        .iter()
        .chain(result.metadata_only.iter())
        .map(|r| (r.path.as_path(), r))
        .collect();
    let failed: HashSet<PathBuf> = result.failures.iter().filter_map(failed_path).collect();

    for (path, mut rec) in current {
        if let Some(h) = fresh.get(path.as_path()) {
            rec = (*h).clone();
        } else if failed.contains(&path) {
            continue;
        } else if let Some(prev) = previous.files.get(&path) {
            rec.content_hash = prev.content_hash.clone();
            rec.status = FileStatus::Unchanged;
        } else {
            continue;
        }
        next.files.insert(path, rec);
    }

    reconcile_hash_index(&mut next);
    next.directories = index::directory_aggregates(root, next.files.values());
    next
}

/// Drop index entries whose owner no longer carries the hash, then give every
/// hashed record an entry (smallest path wins for new or re-pointed hashes).
pub fn reconcile_hash_index(manifest: &mut Manifest) {
    let Manifest { files, hash_to_file, .. } = manifest;
    hash_to_file.retain(|h, p| files.get(p).map(|r| &r.content_hash == h).unwrap_or(false));
    let mut owners: BTreeMap<&str, &PathBuf> = BTreeMap::new();
    for (p, r) in files.iter() {
        if r.has_hash() {
            owners.entry(r.content_hash.as_str()).or_insert(p);
        }
    }
    for (h, p) in owners {
        hash_to_file.entry(h.to_string()).or_insert_with(|| p.clone());
    }
}
