//! The archive-invocation contract and its 7-Zip implementation.

use crate::path_safety::archive_rel_path;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("nothing to archive into {0:?}")]
    Empty(PathBuf),
    #[error("{file:?} is outside the workspace root {root:?}")]
    OutsideRoot { file: PathBuf, root: PathBuf },
    #[error("could not run archiver: {0}")]
    Spawn(#[source] io::Error),
    #[error("archiver exited with {status}: {output}")]
    Failed { status: String, output: String },
    #[error("archiver reported success but {0:?} was not produced")]
    Missing(PathBuf),
    #[error("{0:?} cannot be written to an archive list file")]
    UnlistableName(PathBuf),
}

/// Produce one self-contained archive at `target` from `files` (absolute
/// paths), storing them relative to `root`. A password must also encrypt
/// header metadata.
pub trait Archiver: Send + Sync {
    fn pack(
        &self,
        files: &[PathBuf],
        target: &Path,
        root: &Path,
        password: Option<&str>,
    ) -> Result<(), ArchiveError>;
}

/// Shells out to a `7z`-compatible binary (`7z`, `7za`, `7zr`).
#[derive(Clone, Debug)]
pub struct SevenZip {
    program: PathBuf,
}

impl Default for SevenZip {
    fn default() -> Self {
        Self::new("7z")
    }
}

impl SevenZip {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn args(target: &Path, list: &Path, password: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "a".to_string(),
            "-t7z".to_string(),
            "-y".to_string(),
            // list entries are literal names, not wildcards
            "-spd".to_string(),
            "-scsUTF-8".to_string(),
            target.to_string_lossy().into_owned(),
            format!("@{}", list.display()),
        ];
        if let Some(pw) = password.filter(|p| !p.is_empty()) {
            args.push(format!("-p{}", pw));
            args.push("-mhe=on".to_string());
        }
        args
    }
}

/// Write the 7-Zip list file: one root-relative path per line. Names that
/// would split across lines are refused.
fn write_list(files: &[PathBuf], root: &Path) -> Result<tempfile::NamedTempFile, ArchiveError> {
    let mut list = tempfile::Builder::new()
        .prefix("ebak-list-")
        .suffix(".txt")
        .tempfile()
        .map_err(ArchiveError::Spawn)?;
    for f in files {
        let rel = archive_rel_path(root, f).ok_or_else(|| ArchiveError::OutsideRoot {
            file: f.clone(),
            root: root.to_path_buf(),
        })?;
        let name = rel.to_str().ok_or_else(|| ArchiveError::UnlistableName(f.clone()))?;
        if name.contains(['\n', '\r']) {
            return Err(ArchiveError::UnlistableName(f.clone()));
        }
        writeln!(list, "{}", name).map_err(ArchiveError::Spawn)?;
    }
    list.flush().map_err(ArchiveError::Spawn)?;
    Ok(list)
}

impl Archiver for SevenZip {
    fn pack(
        &self,
        files: &[PathBuf],
        target: &Path,
        root: &Path,
        password: Option<&str>,
    ) -> Result<(), ArchiveError> {
        if files.is_empty() {
            return Err(ArchiveError::Empty(target.to_path_buf()));
        }
        let list = write_list(files, root)?;
        debug!(program = %self.program.display(), target = %target.display(), files = files.len(), "running archiver");
        let out = Command::new(&self.program)
            .args(Self::args(target, list.path(), password))
            .current_dir(root)
            .output()
            .map_err(ArchiveError::Spawn)?;
        if !out.status.success() {
            let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
            output.push_str(&String::from_utf8_lossy(&out.stderr));
            return Err(ArchiveError::Failed { status: out.status.to_string(), output });
        }
        if !target.exists() {
            return Err(ArchiveError::Missing(target.to_path_buf()));
        }
        Ok(())
    }
}
