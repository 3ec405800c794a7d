use std::time::Duration;
use sysinfo::System;

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

pub const DEFAULT_MAX_EPISODE_BYTES: u64 = 2 * GIB;
const MIN_WORKERS: usize = 2;
const MAX_WORKERS: usize = 16;
const THRESHOLD_FLOOR: u64 = 64 * MIB;
const THRESHOLD_CAP: u64 = 4 * GIB;

/// Engine tuning, injected at construction. Every field may be overridden
/// independently of the host-derived defaults.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Size of the hashing pool.
    pub concurrency: usize,
    /// Files above this size are staged as "large" by the worker pool.
    pub small_file_threshold_bytes: u64,
    pub max_episode_bytes: u64,
    /// Ceiling on the bytes a single execution may package. `u64::MAX` = unlimited.
    pub max_total_bytes: u64,
    /// Glob patterns, relative to the workspace root, pruned by the indexer.
    pub exclude: Vec<String>,
    pub progress_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: MIN_WORKERS,
            small_file_threshold_bytes: THRESHOLD_FLOOR,
            max_episode_bytes: DEFAULT_MAX_EPISODE_BYTES,
            max_total_bytes: u64::MAX,
            exclude: Vec::new(),
            progress_interval: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Defaults with concurrency and staging threshold probed from the host.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            concurrency: default_concurrency(cpu_parallelism()),
            small_file_threshold_bytes: staging_threshold(sys.available_memory(), sys.total_memory()),
            ..Self::default()
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_small_file_threshold(mut self, bytes: u64) -> Self {
        self.small_file_threshold_bytes = bytes;
        self
    }

    pub fn with_max_episode_bytes(mut self, bytes: u64) -> Self {
        self.max_episode_bytes = bytes.max(1);
        self
    }

    pub fn with_max_total_bytes(mut self, bytes: u64) -> Self {
        self.max_total_bytes = bytes;
        self
    }

    pub fn with_exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

fn cpu_parallelism() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Twice the CPU count, clamped to [2, 16].
pub fn default_concurrency(cpus: usize) -> usize {
    cpus.saturating_mul(2).clamp(MIN_WORKERS, MAX_WORKERS)
}

/// `max(64 MiB, min(50% available, 15% total, 4 GiB))`.
pub fn staging_threshold(available: u64, total: u64) -> u64 {
    let half_available = available / 2;
    let slice_of_total = (total as f64 * 0.15) as u64;
    half_available.min(slice_of_total).min(THRESHOLD_CAP).max(THRESHOLD_FLOOR)
}
