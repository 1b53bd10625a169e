pub mod app_inventory;
pub mod error;
pub mod input_validation;
pub mod logging;
pub mod mirror_engine;
pub mod orchestrator;
pub mod pair_store;
pub mod path_naming;
pub mod schedule;
pub mod scheduler;
pub mod session_lock;
pub mod settings;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use app_inventory::AppInventory;
use logging::LogManager;
use orchestrator::BackupOrchestrator;
use pair_store::{PairStore, PAIR_FILE_NAME};
use scheduler::{BackupScheduler, SchedulerEvent};
use settings::{SettingsStore, YamlSettingsStore, SETTINGS_FILE_NAME};
use tokio::sync::mpsc;

pub use error::{BackupError, Result};

pub const APP_DIR_NAME: &str = "dailymirror";

pub fn get_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// `<platform config dir>/dailymirror`, e.g. `~/.config/dailymirror` on Linux.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME))
}

/// Shared state of a running application: the persisted pair list, the
/// settings and the status history.
pub struct AppState {
    pub config_dir: PathBuf,
    pub pairs: Arc<PairStore>,
    pub settings: Arc<YamlSettingsStore>,
    pub log_manager: LogManager,
}

impl AppState {
    /// Load pairs and settings from `config_dir`. Missing files mean an empty
    /// pair list and default settings.
    pub async fn load(config_dir: impl AsRef<Path>) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        let pairs = PairStore::load(config_dir.join(PAIR_FILE_NAME)).await?;
        let settings = YamlSettingsStore::load(config_dir.join(SETTINGS_FILE_NAME)).await?;

        Ok(Self {
            config_dir,
            pairs: Arc::new(pairs),
            settings: Arc::new(settings),
            log_manager: LogManager::default(),
        })
    }

    pub fn orchestrator(&self, inventory: Arc<dyn AppInventory>) -> BackupOrchestrator {
        BackupOrchestrator::new(inventory)
    }

    /// Scheduler wired to this state's pairs, settings and status history.
    pub fn scheduler(
        &self,
        inventory: Arc<dyn AppInventory>,
    ) -> (BackupScheduler, mpsc::UnboundedReceiver<SchedulerEvent>) {
        self.scheduler_with_settings(inventory, self.settings.clone())
    }

    /// Same as [`scheduler`](Self::scheduler) but reading settings from
    /// `settings`, e.g. a one-off target override.
    pub fn scheduler_with_settings(
        &self,
        inventory: Arc<dyn AppInventory>,
        settings: Arc<dyn SettingsStore>,
    ) -> (BackupScheduler, mpsc::UnboundedReceiver<SchedulerEvent>) {
        BackupScheduler::new(
            Arc::new(self.orchestrator(inventory)),
            Arc::clone(&self.pairs),
            settings,
            self.log_manager.clone(),
        )
    }
}
