//! Error types for DailyMirror

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the backup core.
///
/// Per-file and per-pair problems are normally turned into status lines by
/// the engine and the orchestrator; only the variants that escape those
/// guards end a session as `Failed`.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Source folder '{}' not found", .0.display())]
    SourceMissing(PathBuf),

    #[error("Failed to create directory '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session log unavailable at '{}': {source}", path.display())]
    SessionLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid backup pair: {0}")]
    InvalidPair(String),

    #[error("Backup pair not found: {0}")]
    PairNotFound(uuid::Uuid),

    #[error("A backup pair for '{}' already exists", .0.display())]
    DuplicatePair(PathBuf),

    #[error("A backup session is already running")]
    AlreadyRunning,

    #[error("No backup target selected")]
    NoTargetRoot,

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// Result type alias for DailyMirror operations
pub type Result<T> = std::result::Result<T, BackupError>;
