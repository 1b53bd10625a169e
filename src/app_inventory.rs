//! Installed-application names for the `AppsList.txt` manifest.

use anyhow::Result;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source of installed application names.
///
/// Implementations may block; callers run them off the async runtime.
pub trait AppInventory: Send + Sync {
    fn installed_apps(&self) -> Result<Vec<String>>;
}

/// Reads `Name=` from freedesktop `.desktop` entries.
pub struct DesktopEntryInventory {
    dirs: Vec<PathBuf>,
}

impl DesktopEntryInventory {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// System and per-user application directories.
    pub fn system() -> Self {
        let mut dirs = vec![
            PathBuf::from("/usr/share/applications"),
            PathBuf::from("/usr/local/share/applications"),
        ];
        if let Some(data) = dirs::data_dir() {
            dirs.push(data.join("applications"));
        }
        Self::new(dirs)
    }

    fn read_dir_entries(dir: &Path, names: &mut Vec<String>) {
        let Ok(entries) = fs::read_dir(dir) else {
            debug!(dir = %dir.display(), "application directory not readable");
            return;
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("desktop") {
                continue;
            }
            if let Ok(contents) = fs::read_to_string(&path) {
                if let Some(name) = desktop_entry_name(&contents) {
                    names.push(name);
                }
            }
        }
    }
}

impl AppInventory for DesktopEntryInventory {
    fn installed_apps(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for dir in &self.dirs {
            Self::read_dir_entries(dir, &mut names);
        }
        Ok(normalize_app_names(names))
    }
}

/// First `Name=` key of the `[Desktop Entry]` group, unless the entry is hidden.
fn desktop_entry_name(contents: &str) -> Option<String> {
    let mut in_entry = false;
    let mut name = None;

    for line in contents.lines().map(str::trim) {
        if line.starts_with('[') {
            in_entry = line == "[Desktop Entry]";
            continue;
        }
        if !in_entry {
            continue;
        }
        if line == "NoDisplay=true" || line == "Hidden=true" {
            return None;
        }
        if name.is_none() {
            if let Some(value) = line.strip_prefix("Name=") {
                name = Some(value.trim().to_string());
            }
        }
    }

    name
}

/// Fixed list, for tests and embedders that gather names themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory(pub Vec<String>);

impl AppInventory for StaticInventory {
    fn installed_apps(&self) -> Result<Vec<String>> {
        Ok(normalize_app_names(self.0.clone()))
    }
}

/// Trim, drop blanks, de-duplicate and sort, all ignoring case.
pub fn normalize_app_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut unique: Vec<String> = names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.to_lowercase()))
        .collect();

    unique.sort_by_key(|n| n.to_lowercase());
    unique
}
