use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Persisted manifest could not be parsed. Only ever logged: `store::load`
    /// degrades to an empty manifest instead of returning this.
    #[error("manifest {path:?} is corrupt: {reason}")]
    ManifestCorruption { path: PathBuf, reason: String },

    #[error("backup of {requested} bytes exceeds the configured ceiling of {limit} bytes")]
    LimitExceeded { requested: u64, limit: u64 },

    #[error("hashing {path:?} failed: {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("packaging episode {episode} failed: {message}")]
    Packaging { episode: String, message: String },

    #[error("invalid exclude pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("could not start hashing pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("manifest encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }
}

/// Stage of a preparation or execution run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Load,
    Scan,
    Diff,
    Hash,
    Plan,
    Package,
    Save,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Load => "load",
            Phase::Scan => "scan",
            Phase::Diff => "diff",
            Phase::Hash => "hash",
            Phase::Plan => "plan",
            Phase::Package => "package",
            Phase::Save => "save",
        };
        f.write_str(s)
    }
}

/// Terminal error of a whole run, tagged with the phase that failed.
#[derive(Debug, Error)]
#[error("{phase} phase failed: {source}")]
pub struct RunError {
    pub phase: Phase,
    #[source]
    pub source: Error,
}

impl RunError {
    pub fn new(phase: Phase, source: Error) -> Self {
        Self { phase, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, Error::Cancelled)
    }
}

/// Attach a phase to a library result.
pub(crate) trait PhaseExt<T> {
    fn phase(self, phase: Phase) -> Result<T, RunError>;
}

impl<T> PhaseExt<T> for Result<T> {
    fn phase(self, phase: Phase) -> Result<T, RunError> {
        self.map_err(|e| RunError::new(phase, e))
    }
}
