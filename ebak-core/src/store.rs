//! Manifest Store: sole owner of manifest file I/O.
//!
//! The authoritative copy lives at `<workspace>/.ebak/manifest.json`. A
//! secondary copy is written next to the produced archives on a best-effort
//! basis.

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reserved control subdirectory inside every workspace. Never indexed.
pub const CONTROL_DIR: &str = ".ebak";
const MANIFEST_FILE: &str = "manifest.json";
const LOCK_FILE: &str = "lock";

pub fn control_dir(workspace: &Path) -> PathBuf {
    workspace.join(CONTROL_DIR)
}

pub fn manifest_path(workspace: &Path) -> PathBuf {
    control_dir(workspace).join(MANIFEST_FILE)
}

pub fn delivery_manifest_path(delivery: &Path, series_id: &str) -> PathBuf {
    delivery.join(format!("{}-manifest.json", series_id))
}

/// Load the last persisted manifest. Never fails: a missing, unreadable or
/// malformed file yields a fresh empty manifest.
pub fn load(workspace: &Path) -> Manifest {
    let path = manifest_path(workspace);
    if !path.exists() {
        debug!(path = %path.display(), "no manifest yet, starting fresh");
        return Manifest::empty();
    }
    match read_manifest(&path) {
        Ok(m) => {
            info!(files = m.files.len(), hashes = m.hash_to_file.len(), "loaded manifest");
            m
        }
        Err(e) => {
            warn!("{}; treating as first backup", e);
            Manifest::empty()
        }
    }
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let data = fs::read(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| Error::ManifestCorruption {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Persist `manifest` (stamping `created_at`) into the workspace control
/// directory, then best-effort into `delivery` when given.
pub fn save(workspace: &Path, delivery: Option<&Path>, manifest: &mut Manifest) -> Result<()> {
    manifest.created_at = Utc::now();
    let data = serde_json::to_vec_pretty(manifest)?;

    let dir = control_dir(workspace);
    fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
    let path = manifest_path(workspace);
    write_atomic(&path, &data)?;
    info!(path = %path.display(), files = manifest.files.len(), "saved manifest");

    if let Some(delivery) = delivery {
        let copy = delivery_manifest_path(delivery, &manifest.series_id);
        if let Err(e) = fs::write(&copy, &data) {
            warn!(path = %copy.display(), "could not copy manifest to delivery path: {}", e);
        }
    }
    Ok(())
}

// Write to a sibling temp file and rename so a crash never leaves a torn manifest.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    tmp.write_all(data).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| Error::io(path, e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

/// Exclusive lock on the workspace control directory, released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    pub fn acquire(workspace: &Path) -> Result<Self> {
        let dir = control_dir(workspace);
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        file.try_lock_exclusive().map_err(|e| Error::io(&path, e))?;
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
