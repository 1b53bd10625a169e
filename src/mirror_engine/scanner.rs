//! Recursive file inventory used as the progress denominator.
//!
//! Counts are taken once before a pair is mirrored and may be stale by the
//! time copying starts; callers treat them as estimates.

use crate::error::{BackupError, Result};
use crate::mirror_engine::types::EntryKind;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanCount {
    Counted(u64),
    SourceMissing,
    /// The root exists but cannot be listed (not a directory, permission denied, ...).
    Unreadable(String),
}

impl ScanCount {
    /// Number of files, with missing or unreadable roots contributing zero.
    pub fn files(&self) -> u64 {
        match self {
            ScanCount::Counted(n) => *n,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub root: PathBuf,
    /// Relative paths of every regular file.
    pub files: Vec<PathBuf>,
    /// Relative paths of every sub-directory.
    pub directories: Vec<PathBuf>,
    pub total_bytes: u64,
}

enum RootProblem {
    Missing,
    Unreadable(String),
}

fn check_root(dir: &Path) -> std::result::Result<(), RootProblem> {
    match std::fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(RootProblem::Unreadable(format!("'{}' is not a directory", dir.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(RootProblem::Missing),
        Err(e) => Err(RootProblem::Unreadable(e.to_string())),
    }
}

/// Kind of a walked entry. Symlinks are followed one level so a link to a
/// file counts as a file and a link to a directory as a directory; links
/// to anything else yield `None`. A dangling link is an error.
pub(crate) fn entry_kind(entry: &walkdir::DirEntry) -> std::io::Result<Option<EntryKind>> {
    let file_type = entry.file_type();
    if file_type.is_file() {
        return Ok(Some(EntryKind::File));
    }
    if file_type.is_dir() {
        return Ok(Some(EntryKind::Directory));
    }
    if file_type.is_symlink() {
        let meta = std::fs::metadata(entry.path())?;
        if meta.is_file() {
            return Ok(Some(EntryKind::File));
        }
        if meta.is_dir() {
            return Ok(Some(EntryKind::Directory));
        }
    }
    Ok(None)
}

/// Count every file below `dir`, recursively.
///
/// Never fails: a missing root is reported as [`ScanCount::SourceMissing`]
/// and entries that cannot be read below the root are skipped.
pub fn count_files(dir: &Path) -> ScanCount {
    match check_root(dir) {
        Ok(()) => {}
        Err(RootProblem::Missing) => return ScanCount::SourceMissing,
        Err(RootProblem::Unreadable(message)) => return ScanCount::Unreadable(message),
    }

    let count = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| matches!(entry_kind(e), Ok(Some(EntryKind::File))))
        .count();

    ScanCount::Counted(count as u64)
}

/// Full listing of `dir` with relative paths.
pub fn scan(dir: &Path) -> Result<Inventory> {
    match check_root(dir) {
        Ok(()) => {}
        Err(RootProblem::Missing) => return Err(BackupError::SourceMissing(dir.to_path_buf())),
        Err(RootProblem::Unreadable(message)) => {
            return Err(BackupError::Io(std::io::Error::new(ErrorKind::Other, message)))
        }
    }

    let mut inventory = Inventory {
        root: dir.to_path_buf(),
        ..Default::default()
    };

    for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        match entry_kind(&entry) {
            Ok(Some(EntryKind::File)) => {
                inventory.total_bytes += std::fs::metadata(entry.path()).map(|m| m.len()).unwrap_or(0);
                inventory.files.push(relative.to_path_buf());
            }
            Ok(Some(EntryKind::Directory)) => inventory.directories.push(relative.to_path_buf()),
            _ => {}
        }
    }

    Ok(inventory)
}
