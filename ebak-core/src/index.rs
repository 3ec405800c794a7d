//! Workspace indexer: walk the tree into a snapshot, then diff it against the
//! previous manifest to find suspects.

use crate::error::{Error, Result};
use crate::manifest::{DirInfo, FileRecord, FileStatus, Manifest};
use crate::progress::{CancelToken, Progress, Stage};
use crate::store::CONTROL_DIR;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Files between two progress notifications while scanning.
const SCAN_REPORT_EVERY: u64 = 100;

pub type Snapshot = BTreeMap<PathBuf, FileRecord>;

/// What the walk prunes besides symlinks and the control directory.
#[derive(Clone, Debug, Default)]
pub struct ScanOptions {
    exclude: Option<GlobSet>,
}

impl ScanOptions {
    pub fn with_exclude(patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self::default());
        }
        let mut b = GlobSetBuilder::new();
        for p in patterns {
            let g = Glob::new(p)
                .map_err(|e| Error::InvalidPattern { pattern: p.clone(), source: e })?;
            b.add(g);
        }
        let set = b
            .build()
            .map_err(|e| Error::InvalidPattern { pattern: patterns.join(","), source: e })?;
        Ok(Self { exclude: Some(set) })
    }

    fn excluded(&self, root: &Path, path: &Path) -> bool {
        let Some(set) = &self.exclude else {
            return false;
        };
        match path.strip_prefix(root) {
            Ok(rel) => set.is_match(rel.to_string_lossy().replace('\\', "/")),
            Err(_) => false,
        }
    }
}

fn pruned(root: &Path, ent: &DirEntry, opts: &ScanOptions) -> bool {
    if ent.depth() == 0 {
        return false;
    }
    ent.path_is_symlink() || ent.file_name() == CONTROL_DIR || opts.excluded(root, ent.path())
}

fn walker<'a>(
    root: &'a Path,
    opts: &'a ScanOptions,
) -> impl Iterator<Item = walkdir::Result<DirEntry>> + 'a {
    WalkDir::new(root).follow_links(false).into_iter().filter_entry(move |e| !pruned(root, e, opts))
}

// Manifest keys are JSON strings and archive list files are line based.
fn unrecordable_name(path: &Path) -> Option<&'static str> {
    match path.to_str() {
        None => Some("name is not valid UTF-8"),
        Some(s) if s.contains(['\n', '\r']) => Some("name contains a line break"),
        Some(_) => None,
    }
}

pub(crate) fn absolute(root: &Path) -> Result<PathBuf> {
    if root.is_absolute() {
        return Ok(root.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| Error::io(root, e))?;
    Ok(cwd.join(root))
}

/// Walk `root` into a path -> record map. Every regular file becomes an
/// `Unchanged` record with an empty hash. Fails only when the root itself
/// cannot be read; unreadable entries below it are logged and skipped, as are
/// files whose names cannot be recorded (not UTF-8, or holding a line break).
pub fn scan(
    root: &Path,
    opts: &ScanOptions,
    progress: &Progress,
    cancel: &CancelToken,
) -> Result<Snapshot> {
    let root = absolute(root)?;
    std::fs::read_dir(&root).map_err(|e| Error::io(&root, e))?;
    info!(root = %root.display(), "scanning workspace");

    // Counting pass only pays off when somebody listens.
    let total = if progress.enabled() {
        walker(&root, opts).filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()).count()
            as u64
    } else {
        0
    };
    progress.set_stage(Stage::Scanning, total);

    let mut files = Snapshot::new();
    for ent in walker(&root, opts) {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let ent = match ent {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !ent.file_type().is_file() {
            continue;
        }
        if let Some(why) = unrecordable_name(ent.path()) {
            warn!(path = %ent.path().display(), "skipping file: {}", why);
            continue;
        }
        let meta = match ent.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %ent.path().display(), "no metadata: {}", e);
                continue;
            }
        };
        let mod_time = match meta.modified() {
            Ok(t) => DateTime::<Utc>::from(t),
            Err(e) => {
                warn!(path = %ent.path().display(), "no modification time: {}", e);
                continue;
            }
        };
        let path = ent.path().to_path_buf();
        files.insert(
            path.clone(),
            FileRecord {
                path,
                name: ent.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                mod_time,
                content_hash: String::new(),
                status: FileStatus::Unchanged,
            },
        );
        progress.add(1);
        if files.len() as u64 % SCAN_REPORT_EVERY == 0 {
            progress.emit();
        }
    }
    progress.emit();
    info!(files = files.len(), "scan finished");
    Ok(files)
}

fn metadata_changed(current: &FileRecord, previous: &FileRecord) -> bool {
    current.size != previous.size
        || current.mod_time != previous.mod_time
        || current.name != previous.name
}

/// Classify `current` against `previous` and return only the suspects:
/// new, modified, and deleted (synthesized from the previous record).
/// Pure: `current` and `previous` are left untouched.
pub fn diff(current: &Snapshot, previous: &Manifest) -> Snapshot {
    let mut suspects = Snapshot::new();

    if previous.is_empty() {
        for (path, rec) in current {
            suspects.insert(path.clone(), FileRecord { status: FileStatus::New, ..rec.clone() });
        }
        debug!(new = suspects.len(), "no previous manifest, everything is new");
        return suspects;
    }

    for (path, rec) in current {
        let status = match previous.files.get(path) {
            None => FileStatus::New,
            Some(prev) if metadata_changed(rec, prev) => FileStatus::Modified,
            Some(_) => continue,
        };
        suspects.insert(path.clone(), FileRecord { status, ..rec.clone() });
    }

    for (path, prev) in &previous.files {
        if !current.contains_key(path) {
            suspects.insert(path.clone(), FileRecord { status: FileStatus::Deleted, ..prev.clone() });
        }
    }
    suspects
}

/// Recursive per-directory totals for every directory strictly beneath
/// `root` that holds at least one indexed file.
pub fn directory_aggregates<'a, I>(root: &Path, files: I) -> BTreeMap<PathBuf, DirInfo>
where
    I: IntoIterator<Item = &'a FileRecord>,
{
    let mut dirs: BTreeMap<PathBuf, DirInfo> = BTreeMap::new();
    for rec in files {
        let mut cur = rec.path.parent();
        while let Some(dir) = cur {
            if dir == root || !dir.starts_with(root) {
                break;
            }
            let info = dirs.entry(dir.to_path_buf()).or_insert_with(|| DirInfo {
                path: dir.to_path_buf(),
                name: dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                mod_time: rec.mod_time,
                file_count: 0,
                total_size: 0,
            });
            info.file_count += 1;
            info.total_size += rec.size;
            if rec.mod_time > info.mod_time {
                info.mod_time = rec.mod_time;
            }
            cur = dir.parent();
        }
    }
    dirs
}
