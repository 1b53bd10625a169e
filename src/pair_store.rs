//! Backup pairs and their on-disk list.
//!
//! The list lives in `backup_objects.json`, is loaded once at startup and is
//! rewritten after every add, edit or removal.

use crate::error::{BackupError, Result};
use crate::input_validation::validate_pair;
use crate::path_naming::{format_for_display, leaf_name};
use crate::schedule::Schedule;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

pub const PAIR_FILE_NAME: &str = "backup_objects.json";

/// One configured source folder and the label it is backed up under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPair {
    pub id: Uuid,
    pub source: PathBuf,
    pub destination: String,
    /// Overrides the global schedule for this pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_schedule: Option<Schedule>,
}

impl BackupPair {
    /// New pair whose destination label defaults to the source's folder name.
    pub fn new(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let destination = leaf_name(&source).unwrap_or_default();
        Self {
            id: Uuid::new_v4(),
            source,
            destination,
            custom_schedule: None,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.custom_schedule = Some(schedule);
        self
    }

    /// Folder the source is mirrored into under a session root.
    pub fn folder_name(&self) -> Option<String> {
        leaf_name(&self.source)
    }

    pub fn display_source(&self) -> String {
        format_for_display(&self.source.to_string_lossy())
    }
}

pub struct PairStore {
    path: PathBuf,
    pairs: RwLock<Vec<BackupPair>>,
}

impl PairStore {
    /// Load the pair list from `path`. A missing file is an empty list.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let pairs = match fs::read_to_string(&path).await {
            Ok(json) if json.trim().is_empty() => Vec::new(),
            Ok(json) => serde_json::from_str(&json)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no pair list yet");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            pairs: RwLock::new(pairs),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current list, in order.
    pub async fn list(&self) -> Vec<BackupPair> {
        self.pairs.read().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<BackupPair> {
        self.pairs.read().await.iter().find(|p| p.id == id).cloned()
    }

    pub async fn add(&self, pair: BackupPair) -> Result<()> {
        validate_pair(&pair).map_err(|e| BackupError::InvalidPair(e.to_string()))?;

        let mut pairs = self.pairs.write().await;
        if pairs.iter().any(|p| p.source == pair.source) {
            return Err(BackupError::DuplicatePair(pair.source));
        }

        info!(source = %pair.source.display(), "added backup pair");
        pairs.push(pair);
        self.persist(&pairs).await
    }

    /// Replace the pair with the same id, keeping its position.
    pub async fn update(&self, pair: BackupPair) -> Result<()> {
        validate_pair(&pair).map_err(|e| BackupError::InvalidPair(e.to_string()))?;

        let mut pairs = self.pairs.write().await;
        if pairs.iter().any(|p| p.id != pair.id && p.source == pair.source) {
            return Err(BackupError::DuplicatePair(pair.source));
        }

        let slot = pairs
            .iter_mut()
            .find(|p| p.id == pair.id)
            .ok_or(BackupError::PairNotFound(pair.id))?;

        info!(source = %pair.source.display(), "edited backup pair");
        *slot = pair;
        self.persist(&pairs).await
    }

    pub async fn remove(&self, id: Uuid) -> Result<BackupPair> {
        let mut pairs = self.pairs.write().await;
        let index = pairs
            .iter()
            .position(|p| p.id == id)
            .ok_or(BackupError::PairNotFound(id))?;

        let removed = pairs.remove(index);
        info!(source = %removed.source.display(), "removed backup pair");
        self.persist(&pairs).await?;
        Ok(removed)
    }

    async fn persist(&self, pairs: &[BackupPair]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(pairs)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json).await?;
        fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{TimeOfDay, Weekdays};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_list() {
        let dir = TempDir::new().unwrap();
        let store = PairStore::load(dir.path().join(PAIR_FILE_NAME)).await.unwrap();
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_persists_and_reloads_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PAIR_FILE_NAME);
        let store = PairStore::load(&path).await.unwrap();

        let first = BackupPair::new("/home/me/Documents");
        let second = BackupPair::new("/home/me/Pictures")
            .with_schedule(Schedule::new(Weekdays::EVERY_DAY, TimeOfDay::new(22, 0).unwrap()));
        store.add(first.clone()).await.unwrap();
        store.add(second.clone()).await.unwrap();

        let reloaded = PairStore::load(&path).await.unwrap();
        assert_eq!(reloaded.list().await, vec![first, second]);
    }

    #[tokio::test]
    async fn test_new_pair_defaults_destination_to_leaf() {
        let pair = BackupPair::new("/srv/data/projects/");
        assert_eq!(pair.destination, "projects");
        assert_eq!(pair.folder_name().as_deref(), Some("projects"));
    }

    #[tokio::test]
    async fn test_duplicate_source_rejected() {
        let dir = TempDir::new().unwrap();
        let store = PairStore::load(dir.path().join(PAIR_FILE_NAME)).await.unwrap();

        store.add(BackupPair::new("/data/music")).await.unwrap();
        let result = store.add(BackupPair::new("/data/music")).await;
        assert!(matches!(result, Err(BackupError::DuplicatePair(_))));
    }

    #[tokio::test]
    async fn test_invalid_pair_rejected() {
        let dir = TempDir::new().unwrap();
        let store = PairStore::load(dir.path().join(PAIR_FILE_NAME)).await.unwrap();

        let result = store.add(BackupPair::new("/data/music").with_destination("")).await;
        assert!(matches!(result, Err(BackupError::InvalidPair(_))));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PAIR_FILE_NAME);
        let store = PairStore::load(&path).await.unwrap();

        let pair = BackupPair::new("/data/music");
        store.add(pair.clone()).await.unwrap();

        let edited = pair.clone().with_destination("tunes");
        store.update(edited.clone()).await.unwrap();
        assert_eq!(store.get(pair.id).await, Some(edited));

        let removed = store.remove(pair.id).await.unwrap();
        assert_eq!(removed.id, pair.id);
        assert!(PairStore::load(&path).await.unwrap().list().await.is_empty());

        let missing = store.remove(pair.id).await;
        assert!(matches!(missing, Err(BackupError::PairNotFound(_))));
    }
}
