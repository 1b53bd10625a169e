//! Validation of user-supplied pairs, paths and target roots.
//!
//! Everything here runs before a value reaches the pair list or the
//! settings file, so the backup core can assume well-formed input.

use crate::pair_store::BackupPair;
use anyhow::{bail, Result};
use std::path::{Component, Path};

const MAX_PATH_LENGTH: usize = 4096;
const MAX_DESTINATION_LENGTH: usize = 255;

/// Validate a path argument coming from the command line or a form field.
pub fn validate_path_argument(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        bail!("Path cannot be empty");
    }

    if path.len() > MAX_PATH_LENGTH {
        bail!("Path too long: {} bytes (max: {})", path.len(), MAX_PATH_LENGTH);
    }

    if path.contains('\0') {
        bail!("Path contains null byte");
    }

    if path.contains('\n') || path.contains('\r') {
        bail!("Path contains control characters");
    }

    Ok(())
}

/// Source folders must be absolute and have a folder name to back up under.
pub fn validate_source(source: &Path) -> Result<()> {
    validate_path_argument(&source.to_string_lossy())?;

    if !source.is_absolute() {
        bail!("Source folder must be an absolute path: '{}'", source.display());
    }

    if crate::path_naming::leaf_name(source).is_none() {
        bail!("Source folder has no folder name: '{}'", source.display());
    }

    Ok(())
}

/// The destination label is a single name, never a path that walks upward.
pub fn validate_destination(destination: &str) -> Result<()> {
    let trimmed = destination.trim();

    if trimmed.is_empty() {
        bail!("Destination cannot be empty");
    }

    if trimmed.len() > MAX_DESTINATION_LENGTH {
        bail!(
            "Destination too long: {} chars (max: {})",
            trimmed.len(),
            MAX_DESTINATION_LENGTH
        );
    }

    if trimmed.contains('\0') {
        bail!("Destination contains null byte");
    }

    if Path::new(trimmed)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        bail!("Destination contains path traversal: '{}'", trimmed);
    }

    Ok(())
}

/// A target root is where dated session folders are created.
pub fn validate_target_root(target: &Path) -> Result<()> {
    validate_path_argument(&target.to_string_lossy())?;

    if !target.is_absolute() {
        bail!("Backup target must be an absolute path: '{}'", target.display());
    }

    Ok(())
}

pub fn validate_pair(pair: &BackupPair) -> Result<()> {
    validate_source(&pair.source)?;
    validate_destination(&pair.destination)?;
    Ok(())
}
