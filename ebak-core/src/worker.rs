//! Hashing worker pool: content hashes for every live suspect, then the
//! must-package / metadata-only split against the previous hash index.

use crate::error::{Error, Result};
use crate::index::Snapshot;
use crate::manifest::{FileRecord, FileStatus, Manifest};
use crate::progress::{CancelToken, Progress, Stage};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, info, warn};

const SMALL_READ_BUF: usize = 64 * 1024;
const LARGE_READ_BUF: usize = 1 << 20;

#[derive(Debug, Default)]
pub struct WorkerResult {
    /// Content not stored anywhere yet; must go into an episode.
    pub files_to_pack: Vec<FileRecord>,
    /// Content already stored under another path; only the manifest entry changes.
    pub metadata_only: Vec<FileRecord>,
    /// Per-file hashing failures (`Error::Hash`). These files are in neither list.
    pub failures: Vec<Error>,
    pub total_processed: usize,
    pub total_size: u64,
    pub small_files: usize,
    pub large_files: usize,
}

impl WorkerResult {
    pub fn pack_bytes(&self) -> u64 {
        self.files_to_pack.iter().map(|f| f.size).sum()
    }
}

enum Outcome {
    Hashed,
    Failed(Error),
    Skipped,
}

/// Stream `path` through BLAKE3 with a fixed-size buffer and return the hex digest.
pub fn hash_file(path: &Path, buf_size: usize) -> io::Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; buf_size.max(1)];
    loop {
        let n = match f.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Fixed-size pool, sized once at construction.
pub struct HashPool {
    pool: rayon::ThreadPool,
    concurrency: usize,
    small_file_threshold: u64,
}

impl HashPool {
    pub fn new(concurrency: usize, small_file_threshold: u64) -> Result<Self> {
        let concurrency = concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("ebak-hash-{}", i))
            .build()?;
        Ok(Self { pool, concurrency, small_file_threshold })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn is_large(&self, rec: &FileRecord) -> bool {
        rec.size > self.small_file_threshold
    }

    /// Hash every non-deleted suspect and classify it. One file's I/O failure
    /// is recorded in `failures` and never aborts the pool. On cancellation
    /// every computed hash is discarded.
    pub fn run(
        &self,
        suspects: Snapshot,
        previous: &Manifest,
        progress: &Progress,
        cancel: &CancelToken,
    ) -> Result<WorkerResult> {
        let deleted_hashes: HashSet<String> = suspects
            .values()
            .filter(|r| r.status == FileStatus::Deleted && r.has_hash())
            .map(|r| r.content_hash.clone())
            .collect();

        let mut jobs: Vec<FileRecord> =
            suspects.into_values().filter(|r| r.status != FileStatus::Deleted).collect();
        // Large files first so they do not straggle at the tail.
        jobs.sort_by(|a, b| {
            self.is_large(b).cmp(&self.is_large(a)).then_with(|| a.path.cmp(&b.path))
        });
        let large_files = jobs.iter().filter(|r| self.is_large(r)).count();
        let small_files = jobs.len() - large_files;
        progress.set_stage(Stage::Hashing, jobs.iter().map(|r| r.size).sum());
        info!(files = jobs.len(), large_files, workers = self.concurrency, "hashing suspects");

        let threshold = self.small_file_threshold;
        let outcomes: Vec<Outcome> = self.pool.install(|| {
            jobs.par_iter_mut()
                .map(|rec| {
                    if cancel.is_cancelled() {
                        return Outcome::Skipped;
                    }
                    let buf = if rec.size > threshold { LARGE_READ_BUF } else { SMALL_READ_BUF };
                    match hash_file(&rec.path, buf) {
                        Ok(h) => {
                            rec.content_hash = h;
                            progress.add(rec.size);
                            Outcome::Hashed
                        }
                        Err(e) => Outcome::Failed(Error::Hash { path: rec.path.clone(), source: e }),
                    }
                })
                .collect()
        });
        progress.emit();

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut result = WorkerResult { small_files, large_files, ..Default::default() };
        let mut hashed = Vec::with_capacity(jobs.len());
        for (rec, outcome) in jobs.into_iter().zip(outcomes) {
            match outcome {
                Outcome::Hashed => hashed.push(rec),
                Outcome::Failed(e) => {
                    warn!("{}", e);
                    result.failures.push(e);
                }
                Outcome::Skipped => {}
            }
        }
        classify(hashed, previous, &deleted_hashes, &mut result);
        info!(
            pack = result.files_to_pack.len(),
            metadata_only = result.metadata_only.len(),
            failed = result.failures.len(),
            "hashing finished"
        );
        Ok(result)
    }
}

// Among records sharing a hash unknown to `previous`, the smallest path owns
// the content; sorting first makes membership independent of completion order.
fn classify(
    mut hashed: Vec<FileRecord>,
    previous: &Manifest,
    deleted_hashes: &HashSet<String>,
    result: &mut WorkerResult,
) {
    hashed.sort_by(|a, b| a.path.cmp(&b.path));
    let mut owned: HashSet<String> = HashSet::new();
    for mut rec in hashed {
        if rec.status == FileStatus::New && deleted_hashes.contains(&rec.content_hash) {
            debug!(path = %rec.path.display(), "content moved from a deleted path");
            rec.status = FileStatus::Moved;
        }
        result.total_processed += 1;
        result.total_size += rec.size;
        if previous.knows_hash(&rec.content_hash) || !owned.insert(rec.content_hash.clone()) {
            result.metadata_only.push(rec);
        } else {
            result.files_to_pack.push(rec);
        }
    }
}
