//! Persisted user settings: backup target and the global schedule.

use crate::error::Result;
use crate::schedule::{Schedule, TimeOfDay};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const SETTINGS_FILE_NAME: &str = "settings.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Volume or folder that receives `Backup_<date>` folders, logs and the apps list.
    #[serde(default)]
    pub target_root: Option<PathBuf>,
    #[serde(default = "default_schedule")]
    pub global_schedule: Schedule,
}

fn default_schedule() -> Schedule {
    Schedule::daily(TimeOfDay::default())
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_root: None,
            global_schedule: default_schedule(),
        }
    }
}

/// Read/write access to settings without exposing the storage format.
///
/// `snapshot` hands out an owned copy; a running session keeps using the copy
/// it was started with even if the user saves new settings meanwhile.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn snapshot(&self) -> Settings;
    async fn save(&self, settings: Settings) -> Result<()>;
}

/// Settings kept in a YAML file, cached in memory after the first load.
pub struct YamlSettingsStore {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl YamlSettingsStore {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = match fs::read_to_string(&path).await {
            Ok(yaml) if yaml.trim().is_empty() => Settings::default(),
            Ok(yaml) => serde_yaml::from_str(&yaml)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                Settings::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for YamlSettingsStore {
    async fn snapshot(&self) -> Settings {
        self.current.read().await.clone()
    }

    async fn save(&self, settings: Settings) -> Result<()> {
        let mut current = self.current.write().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let yaml = serde_yaml::to_string(&settings)?;
        let staging = self.path.with_extension("yaml.tmp");
        fs::write(&staging, yaml).await?;
        fs::rename(&staging, &self.path).await?;

        info!(
            target_root = ?settings.target_root,
            schedule = %settings.global_schedule,
            "settings saved"
        );
        *current = settings;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySettingsStore {
    current: RwLock<Settings>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(settings),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn snapshot(&self) -> Settings {
        self.current.read().await.clone()
    }

    async fn save(&self, settings: Settings) -> Result<()> {
        *self.current.write().await = settings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Weekdays;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.target_root.is_none());
        assert_eq!(settings.global_schedule.days, Weekdays::EVERY_DAY);
        assert_eq!(settings.global_schedule.time, TimeOfDay::new(6, 0).unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let store = YamlSettingsStore::load(dir.path().join(SETTINGS_FILE_NAME))
            .await
            .unwrap();
        assert_eq!(store.snapshot().await, Settings::default());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join(SETTINGS_FILE_NAME);
        let store = YamlSettingsStore::load(&path).await.unwrap();

        let settings = Settings {
            target_root: Some(PathBuf::from("/media/backup")),
            global_schedule: Schedule::new(
                "weekdays".parse().unwrap(),
                TimeOfDay::new(21, 30).unwrap(),
            ),
        };
        store.save(settings.clone()).await.unwrap();

        let yaml = std::fs::read_to_string(&path).unwrap();
        assert!(yaml.contains("targetRoot: /media/backup"));
        assert!(yaml.contains("21:30"));

        let reloaded = YamlSettingsStore::load(&path).await.unwrap();
        assert_eq!(reloaded.snapshot().await, settings);
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "targetRoot: /mnt/usb\n").unwrap();

        let store = YamlSettingsStore::load(&path).await.unwrap();
        let settings = store.snapshot().await;
        assert_eq!(settings.target_root, Some(PathBuf::from("/mnt/usb")));
        assert_eq!(settings.global_schedule, Settings::default().global_schedule);
    }

    #[tokio::test]
    async fn test_memory_store_snapshot_is_a_copy() {
        let store = MemorySettingsStore::default();
        let mut snapshot = store.snapshot().await;
        snapshot.target_root = Some(PathBuf::from("/elsewhere"));

        assert!(store.snapshot().await.target_root.is_none());
        store.save(snapshot.clone()).await.unwrap();
        assert_eq!(store.snapshot().await, snapshot);
    }
}
