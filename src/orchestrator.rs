//! One backup session across every configured pair.
//!
//! Layout under the target root:
//!
//! ```text
//! <target>/Backup_<YYYYMMDD>/<folder name of source>/...
//! <target>/Logs/Log_<YYYYMMDD_HHMMSS>.txt
//! <target>/AppsList.txt
//! ```

use crate::app_inventory::AppInventory;
use crate::error::{BackupError, Result};
use crate::logging::SessionLogFile;
use crate::mirror_engine::types::display_name;
use crate::mirror_engine::{count_files, EntryKind, MirrorEngine, MirrorEvent, ScanCount};
use crate::pair_store::BackupPair;
use crate::status::{status_line, StatusTag};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub const APPS_LIST_FILE_NAME: &str = "AppsList.txt";
pub const LOGS_DIR_NAME: &str = "Logs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Aggregate progress, 0..=100, non-decreasing within a session.
    Progress(u8),
    /// A tagged status line, see [`StatusTag`].
    Status(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    Failed { message: String },
}

/// Input for one session. The pair list is an owned snapshot.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub id: Uuid,
    pub target_root: PathBuf,
    pub pairs: Vec<BackupPair>,
}

impl SessionRequest {
    pub fn new(target_root: impl Into<PathBuf>, pairs: Vec<BackupPair>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_root: target_root.into(),
            pairs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSession {
    pub id: Uuid,
    pub started_at: NaiveDateTime,
    pub target_root: PathBuf,
    /// `<target>/Backup_<YYYYMMDD>`
    pub session_root: PathBuf,
    pub pairs: Vec<BackupPair>,
    pub processed_files: u64,
    pub total_files: u64,
    pub log_path: Option<PathBuf>,
    pub outcome: SessionOutcome,
}

struct Progress {
    processed: u64,
    total: u64,
    last: u8,
}

impl Progress {
    fn new(total: u64) -> Self {
        Self {
            processed: 0,
            total,
            last: 0,
        }
    }

    /// Count one processed file; returns the new percentage when it moved.
    fn advance(&mut self) -> Option<u8> {
        self.processed += 1;
        if self.total == 0 {
            return None;
        }
        let percent = (self.processed.saturating_mul(100) / self.total).min(100) as u8;
        if percent > self.last {
            self.last = percent;
            Some(percent)
        } else {
            None
        }
    }
}

/// Fans status lines out to the caller and the session log file.
struct SessionSink<F> {
    log: SessionLogFile,
    on_event: F,
}

impl<F> SessionSink<F>
where
    F: FnMut(SessionEvent),
{
    fn status(&mut self, tag: StatusTag, message: impl AsRef<str>) {
        let line = status_line(tag, message);
        match tag {
            StatusTag::Error => self.log.error(&line, None),
            _ => self.log.info(&line),
        }
        (self.on_event)(SessionEvent::Status(line));
    }

    fn error_with_details(&mut self, message: impl AsRef<str>, details: &dyn Display) {
        let line = status_line(StatusTag::Error, message);
        self.log.error(&line, Some(details));
        (self.on_event)(SessionEvent::Status(line));
    }

    fn progress(&mut self, percent: u8) {
        (self.on_event)(SessionEvent::Progress(percent));
    }

    fn mirror_event(&mut self, event: MirrorEvent, progress: &mut Progress) {
        match event {
            MirrorEvent::Copying { path } => {
                self.status(StatusTag::Copy, format!("Copying '{}'...", display_name(&path)));
            }
            MirrorEvent::Copied { .. } => {}
            MirrorEvent::UpToDate { path } => self.status(
                StatusTag::Info,
                format!("File '{}' already up to date. Continuing...", display_name(&path)),
            ),
            MirrorEvent::CopyFailed { path, message } => self.error_with_details(
                format!("Error copying '{}': {}", display_name(&path), message),
                &path.display(),
            ),
            MirrorEvent::FileProcessed => {
                if let Some(percent) = progress.advance() {
                    self.progress(percent);
                }
            }
            MirrorEvent::Deleted { path, kind } => {
                let message = match kind {
                    EntryKind::File => format!("Deleted '{}'.", display_name(&path)),
                    EntryKind::Directory => format!("Deleted directory '{}'.", display_name(&path)),
                };
                self.status(StatusTag::Delete, message);
            }
            MirrorEvent::DeleteFailed { path, message } => self.error_with_details(
                format!("Error deleting '{}': {}", path.display(), message),
                &message,
            ),
        }
    }
}

/// A pair that survived the counting phase.
struct PlannedPair {
    source: PathBuf,
    folder: String,
    count: ScanCount,
}

/// Runs backup sessions. Holds only collaborators; all session state is local
/// to [`run_session`](Self::run_session).
pub struct BackupOrchestrator {
    inventory: Arc<dyn AppInventory>,
}

impl BackupOrchestrator {
    pub fn new(inventory: Arc<dyn AppInventory>) -> Self {
        Self { inventory }
    }

    /// Run one session to a terminal outcome.
    ///
    /// Never returns an error: failures that escape the per-file and per-pair
    /// guards end the session as [`SessionOutcome::Failed`], reported through
    /// `on_event` and the session log.
    pub async fn run_session<F>(
        &self,
        request: SessionRequest,
        on_event: F,
        cancel: &CancellationToken,
    ) -> BackupSession
    where
        F: FnMut(SessionEvent) + Send,
    {
        let started_at = Local::now().naive_local();
        let mut session = BackupSession {
            id: request.id,
            started_at,
            session_root: request
                .target_root
                .join(format!("Backup_{}", started_at.format("%Y%m%d"))),
            target_root: request.target_root,
            pairs: request.pairs,
            processed_files: 0,
            total_files: 0,
            log_path: None,
            outcome: SessionOutcome::Completed,
        };

        let mut on_event = on_event;
        let log = match SessionLogFile::create(&session.target_root.join(LOGS_DIR_NAME), started_at) {
            Ok(log) => log,
            Err(e) => {
                warn!(error = %e, "cannot open session log");
                on_event(SessionEvent::Progress(0));
                on_event(SessionEvent::Status(status_line(
                    StatusTag::Error,
                    format!("Backup failed: {e}"),
                )));
                session.outcome = SessionOutcome::Failed {
                    message: e.to_string(),
                };
                return session;
            }
        };
        session.log_path = Some(log.path().to_path_buf());

        let mut sink = SessionSink { log, on_event };
        sink.log.session_started(started_at);
        info!(session = %session.id, pairs = session.pairs.len(), "backup session started");

        session.outcome = match self.execute(&mut session, &mut sink, cancel).await {
            Ok(SessionOutcome::Cancelled) => {
                sink.status(StatusTag::Canceled, "Backup cancelled.");
                SessionOutcome::Cancelled
            }
            Ok(outcome) => {
                sink.status(StatusTag::End, "Backup completed successfully.");
                outcome
            }
            Err(e) => {
                sink.error_with_details(format!("Backup failed: {e}"), &e);
                SessionOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };

        sink.log.session_ended(Local::now().naive_local());
        info!(
            session = %session.id,
            outcome = ?session.outcome,
            processed = session.processed_files,
            total = session.total_files,
            "backup session finished"
        );
        session
    }

    async fn execute<F>(
        &self,
        session: &mut BackupSession,
        sink: &mut SessionSink<F>,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome>
    where
        F: FnMut(SessionEvent) + Send,
    {
        sink.progress(0);
        sink.status(StatusTag::Start, "Backup started...");

        fs::create_dir_all(&session.session_root)
            .await
            .map_err(|source| BackupError::CreateDir {
                path: session.session_root.clone(),
                source,
            })?;

        let Some(planned) = self.count_pairs(&session.pairs, sink, cancel).await? else {
            return Ok(SessionOutcome::Cancelled);
        };
        session.total_files = planned.iter().map(|p| p.count.files()).sum();

        let mut progress = Progress::new(session.total_files);

        for pair in &planned {
            if cancel.is_cancelled() {
                session.processed_files = progress.processed;
                return Ok(SessionOutcome::Cancelled);
            }

            match &pair.count {
                ScanCount::SourceMissing => {
                    sink.status(
                        StatusTag::Info,
                        format!("Skipping '{}': source folder not found.", pair.source.display()),
                    );
                    continue;
                }
                ScanCount::Unreadable(_) => {
                    sink.status(
                        StatusTag::Info,
                        format!("Skipping '{}': source folder unreadable.", pair.source.display()),
                    );
                    continue;
                }
                ScanCount::Counted(_) => {}
            }

            let destination = session.session_root.join(&pair.folder);
            sink.status(
                StatusTag::Info,
                format!(
                    "Backing up '{}' to '{}'...",
                    pair.source.display(),
                    destination.display()
                ),
            );

            let engine = MirrorEngine::new(pair.source.clone(), destination);
            let result = engine
                .mirror(cancel, |event| sink.mirror_event(event, &mut progress))
                .await;
            session.processed_files = progress.processed;

            match result {
                Ok(report) if report.cancelled => return Ok(SessionOutcome::Cancelled),
                Ok(report) => {
                    info!(
                        source = %pair.source.display(),
                        copied = report.files_copied,
                        up_to_date = report.files_up_to_date,
                        failed = report.files_failed,
                        deleted = report.entries_deleted,
                        "pair mirrored"
                    );
                }
                Err(BackupError::SourceMissing(path)) => {
                    sink.status(
                        StatusTag::Error,
                        format!("Source folder '{}' does not exist. Skipping.", path.display()),
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if cancel.is_cancelled() {
            return Ok(SessionOutcome::Cancelled);
        }

        if let Err(e) = self.write_apps_list(&session.target_root).await {
            warn!(error = %e, "failed to write application list");
            sink.log.warn(&format!("Could not write application list: {e:#}"));
            sink.status(StatusTag::Error, format!("Could not write application list: {e}"));
        }

        Ok(SessionOutcome::Completed)
    }

    /// Counting phase. Resolves each pair's folder name and file count, and
    /// reports per-pair problems. `None` when cancelled.
    async fn count_pairs<F>(
        &self,
        pairs: &[BackupPair],
        sink: &mut SessionSink<F>,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<PlannedPair>>>
    where
        F: FnMut(SessionEvent) + Send,
    {
        let mut planned = Vec::with_capacity(pairs.len());
        let mut folders = HashSet::new();

        for pair in pairs {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let Some(folder) = pair.folder_name() else {
                sink.status(
                    StatusTag::Error,
                    format!("Source folder '{}' has no folder name. Skipping.", pair.source.display()),
                );
                continue;
            };
            if !folders.insert(folder.clone()) {
                sink.status(
                    StatusTag::Error,
                    format!(
                        "Folder '{}' is already used by another pair. Skipping '{}'.",
                        folder,
                        pair.source.display()
                    ),
                );
                continue;
            }

            let source = pair.source.clone();
            let count = tokio::task::spawn_blocking(move || count_files(&source))
                .await
                .map_err(|e| BackupError::Io(std::io::Error::other(e)))?;

            match &count {
                ScanCount::SourceMissing => sink.status(
                    StatusTag::Error,
                    format!("Source folder '{}' not found. Skipping.", pair.source.display()),
                ),
                ScanCount::Unreadable(message) => sink.error_with_details(
                    format!("Source folder '{}' cannot be read. Skipping.", pair.source.display()),
                    message,
                ),
                ScanCount::Counted(_) => {}
            }

            planned.push(PlannedPair {
                source: pair.source.clone(),
                folder,
                count,
            });
        }

        Ok(Some(planned))
    }

    async fn write_apps_list(&self, target_root: &Path) -> anyhow::Result<()> {
        let inventory = Arc::clone(&self.inventory);
        let names = tokio::task::spawn_blocking(move || inventory.installed_apps()).await??;

        let contents = apps_list_contents(Local::now().naive_local(), &names);
        fs::write(target_root.join(APPS_LIST_FILE_NAME), contents).await?;
        Ok(())
    }
}

/// `Last Updated: MM/DD/YYYY at hh:mm AM`, a blank line, then one name per line.
pub fn apps_list_contents(updated: NaiveDateTime, names: &[String]) -> String {
    let mut contents = format!("Last Updated: {}\n\n", updated.format("%m/%d/%Y at %I:%M %p"));
    for name in names {
        contents.push_str(name);
        contents.push('\n');
    }
    contents
}
