use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: u64,
    pub modified: SystemTime,
    pub is_file: bool,
}

impl FileMetadata {
    pub fn from_std(meta: &std::fs::Metadata) -> std::io::Result<Self> {
        Ok(Self {
            size: meta.len(),
            modified: meta.modified()?,
            is_file: meta.is_file(),
        })
    }
}

/// Why a source file has to be copied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CopyReason {
    /// Nothing (or a directory) sits at the destination path.
    Missing,
    /// Source was modified after the destination copy.
    Newer,
    /// Same or older timestamp, different length.
    SizeChanged,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CopyDecision {
    Copy(CopyReason),
    UpToDate,
}

impl CopyDecision {
    /// Compare a source file against whatever is at its destination path.
    pub fn decide(source: &FileMetadata, target: Option<&FileMetadata>) -> Self {
        match target {
            None => CopyDecision::Copy(CopyReason::Missing),
            Some(target) if !target.is_file => CopyDecision::Copy(CopyReason::Missing),
            Some(target) if source.modified > target.modified => CopyDecision::Copy(CopyReason::Newer),
            Some(target) if source.size != target.size => CopyDecision::Copy(CopyReason::SizeChanged),
            Some(_) => CopyDecision::UpToDate,
        }
    }

    pub fn needs_copy(&self) -> bool {
        matches!(self, CopyDecision::Copy(_))
    }
}

/// Destination entry with no counterpart under the source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletionCandidate {
    /// Path relative to the destination root.
    pub path: PathBuf,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedCopy {
    pub path: PathBuf,
    pub decision: CopyDecision,
    pub size: u64,
}

/// What a mirror pass would do, computed without touching the destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorPlan {
    pub total_files: usize,
    pub copies: Vec<PlannedCopy>,
    pub up_to_date: usize,
    pub deletions: Vec<DeletionCandidate>,
    pub bytes_to_copy: u64,
}

impl MirrorPlan {
    pub fn is_in_sync(&self) -> bool {
        self.copies.is_empty() && self.deletions.is_empty()
    }
}

/// Progress and outcome notifications emitted during one mirror pass.
///
/// Paths are relative to the source (copy phase) or destination (delete
/// phase) root.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    Copying { path: PathBuf },
    Copied { path: PathBuf, bytes: u64 },
    UpToDate { path: PathBuf },
    CopyFailed { path: PathBuf, message: String },
    /// Emitted exactly once for every source file visited, whatever happened to it.
    FileProcessed,
    Deleted { path: PathBuf, kind: EntryKind },
    DeleteFailed { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MirrorReport {
    pub files_visited: u64,
    pub files_copied: u64,
    pub files_up_to_date: u64,
    pub files_failed: u64,
    pub entries_deleted: u64,
    pub delete_failures: u64,
    pub bytes_copied: u64,
    pub cancelled: bool,
}

/// File name shown in status lines; falls back to the whole path.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
