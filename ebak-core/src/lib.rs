pub mod archive;
pub mod config;
pub mod engine;
pub mod episode;
pub mod error;
pub mod index;
pub mod manifest;
pub mod path_safety;
pub mod progress;
pub mod store;
pub mod worker;

pub use archive::{ArchiveError, Archiver, SevenZip};
pub use config::EngineConfig;
pub use engine::{ChangeSummary, Engine, Execution, Preparation};
pub use error::{Error, Phase, RunError};
pub use manifest::{FileRecord, FileStatus, Manifest};
