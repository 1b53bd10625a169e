//! Logging: tracing setup, the per-session log file and the in-memory
//! status history shown to front ends.

use crate::error::{BackupError, Result};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Default maximum number of log lines to keep in memory
pub const DEFAULT_MAX_LOG_LINES: usize = 10000;

const MAX_NAME_ATTEMPTS: u32 = 100;

/// Install the global tracing subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter_layer)
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn label(self) -> &'static str {
        match self {
            LogLevel::Info => "[INFO]",
            LogLevel::Warn => "[WARN]",
            LogLevel::Error => "[ERROR]",
        }
    }
}

/// Plain-text log of one backup session, `<root>/Logs/Log_<YYYYMMDD_HHMMSS>.txt`.
///
/// Every line is flushed as it is written. Write failures after creation are
/// reported through tracing and otherwise ignored; the session carries on.
pub struct SessionLogFile {
    path: PathBuf,
    file: File,
}

impl SessionLogFile {
    pub fn create(logs_dir: &Path, started: NaiveDateTime) -> Result<Self> {
        fs::create_dir_all(logs_dir).map_err(|source| BackupError::SessionLog {
            path: logs_dir.to_path_buf(),
            source,
        })?;

        let stamp = started.format("%Y%m%d_%H%M%S").to_string();
        let mut attempt = 1u32;
        loop {
            // Sessions started within the same second get `_2`, `_3`, ...
            let name = match attempt {
                1 => format!("Log_{stamp}.txt"),
                n => format!("Log_{stamp}_{n}.txt"),
            };
            let path = logs_dir.join(name);
            match OpenOptions::new().append(true).create_new(true).open(&path) {
                Ok(file) => return Ok(Self { path, file }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < MAX_NAME_ATTEMPTS => {
                    attempt += 1;
                }
                Err(source) => return Err(BackupError::SessionLog { path, source }),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_started(&mut self, at: NaiveDateTime) {
        self.write_raw(&format!(
            "--- Backup Session Started: {} ---",
            at.format("%Y-%m-%d %H:%M:%S")
        ));
    }

    pub fn session_ended(&mut self, at: NaiveDateTime) {
        self.write_raw(&format!(
            "--- Backup Session Ended: {} ---",
            at.format("%Y-%m-%d %H:%M:%S")
        ));
    }

    pub fn info(&mut self, message: &str) {
        self.write(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: &str) {
        self.write(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: &str, details: Option<&dyn Display>) {
        match details {
            Some(details) => self.write(LogLevel::Error, &format!("{message} - Details: {details}")),
            None => self.write(LogLevel::Error, message),
        }
    }

    fn write(&mut self, level: LogLevel, message: &str) {
        let line = format!("{} {} {}", level.label(), Local::now().format("%H:%M:%S"), message);
        self.write_raw(&line);
    }

    fn write_raw(&mut self, line: &str) {
        let result = writeln!(self.file, "{line}").and_then(|_| self.file.flush());
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write session log");
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    pub session_id: Option<String>,
}

/// Bounded history of status lines, oldest evicted first.
#[derive(Clone)]
pub struct LogManager {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    max_lines: usize,
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_LINES)
    }
}

impl LogManager {
    pub fn new(max_lines: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(max_lines.min(1024)))),
            max_lines,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn log(&self, level: LogLevel, message: &str, session_id: Option<String>) {
        let entry = LogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            message: message.to_string(),
            session_id,
        };

        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.max_lines {
            entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get_logs(&self, session_id: Option<&str>) -> Vec<LogEntry> {
        let entries = self.lock();
        match session_id {
            Some(id) => entries
                .iter()
                .filter(|e| e.session_id.as_deref() == Some(id))
                .cloned()
                .collect(),
            None => entries.iter().cloned().collect(),
        }
    }

    pub fn get_logs_paginated(&self, session_id: Option<&str>, offset: usize, limit: usize) -> Vec<LogEntry> {
        let entries = self.lock();
        entries
            .iter()
            .filter(|e| session_id.is_none() || e.session_id.as_deref() == session_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }
}
