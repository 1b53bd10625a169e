//! Idle/Running state machine that starts backup sessions on schedule or on
//! request.
//!
//! Only one session runs at a time. A scheduled tick and a manual start go
//! through the same guard, and a start while Running is rejected, not queued.
//! A [`SessionLock`] on the target root extends the guard across processes.

use crate::error::{BackupError, Result};
use crate::logging::{LogLevel, LogManager};
use crate::orchestrator::{BackupOrchestrator, BackupSession, SessionEvent, SessionOutcome, SessionRequest};
use crate::pair_store::{BackupPair, PairStore};
use crate::session_lock::SessionLock;
use crate::settings::SettingsStore;
use crate::status::StatusTag;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type SessionCallback = Box<dyn FnMut(SessionEvent) + Send>;

/// Runs one session. Implemented by [`BackupOrchestrator`]; tests substitute
/// their own runner.
#[async_trait]
pub trait SessionRunner: Send + Sync {
    async fn run(
        &self,
        request: SessionRequest,
        on_event: SessionCallback,
        cancel: CancellationToken,
    ) -> BackupSession;
}

#[async_trait]
impl SessionRunner for BackupOrchestrator {
    async fn run(
        &self,
        request: SessionRequest,
        on_event: SessionCallback,
        cancel: CancellationToken,
    ) -> BackupSession {
        self.run_session(request, on_event, &cancel).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    SessionStarted {
        session_id: Uuid,
        trigger: Trigger,
        pairs: usize,
    },
    Progress {
        session_id: Uuid,
        percent: u8,
    },
    Status {
        session_id: Uuid,
        line: String,
    },
    SessionFinished {
        session_id: Uuid,
        outcome: SessionOutcome,
    },
}

#[derive(Default)]
struct SchedulerState {
    /// Cancel handle of the running session; `None` while Idle.
    active: Option<CancellationToken>,
    last_runs: HashMap<Uuid, NaiveDateTime>,
}

pub struct BackupScheduler {
    runner: Arc<dyn SessionRunner>,
    pairs: Arc<PairStore>,
    settings: Arc<dyn SettingsStore>,
    log: LogManager,
    state: Arc<Mutex<SchedulerState>>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
}

impl BackupScheduler {
    pub fn new(
        runner: Arc<dyn SessionRunner>,
        pairs: Arc<PairStore>,
        settings: Arc<dyn SettingsStore>,
        log: LogManager,
    ) -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let scheduler = Self {
            runner,
            pairs,
            settings,
            log,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            events,
        };
        (scheduler, receiver)
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        lock_state(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.lock().active.is_some()
    }

    /// When `pair_id` was last covered by a session, whatever its outcome.
    pub fn last_run(&self, pair_id: Uuid) -> Option<NaiveDateTime> {
        self.lock().last_runs.get(&pair_id).copied()
    }

    pub fn log(&self) -> &LogManager {
        &self.log
    }

    /// Request cancellation of the running session. `false` when Idle.
    pub fn cancel(&self) -> bool {
        match &self.lock().active {
            Some(token) => {
                info!("cancelling backup session");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Evaluate schedules at `now` and start a session for every due pair.
    ///
    /// Pairs with their own schedule are checked against it; the rest use the
    /// global schedule. All due pairs share one session. Returns the handle of
    /// the started session, if any.
    pub async fn tick(&self, now: NaiveDateTime) -> Option<JoinHandle<BackupSession>> {
        if self.is_running() {
            return None;
        }

        let settings = self.settings.snapshot().await;
        let pairs = self.pairs.list().await;

        let due: Vec<BackupPair> = {
            let state = self.lock();
            pairs
                .into_iter()
                .filter(|pair| {
                    let schedule = pair.custom_schedule.as_ref().unwrap_or(&settings.global_schedule);
                    schedule.is_due(&now, state.last_runs.get(&pair.id))
                })
                .collect()
        };
        if due.is_empty() {
            return None;
        }

        let Some(target_root) = settings.target_root else {
            debug!(due = due.len(), "schedule fired but no backup target is set");
            return None;
        };

        match self.launch(target_root, due, Trigger::Scheduled, now) {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!(error = %e, "scheduled start skipped");
                None
            }
        }
    }

    /// Start a session over every pair right away.
    pub async fn start_now(&self) -> Result<JoinHandle<BackupSession>> {
        if self.is_running() {
            return Err(BackupError::AlreadyRunning);
        }

        let settings = self.settings.snapshot().await;
        let target_root = settings.target_root.ok_or(BackupError::NoTargetRoot)?;
        let pairs = self.pairs.list().await;

        self.launch(target_root, pairs, Trigger::Manual, Local::now().naive_local())
    }

    /// Tick once a second until `shutdown` fires, then cancel any running session.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.cancel();
                    break;
                }
                _ = interval.tick() => {
                    self.tick(Local::now().naive_local()).await;
                }
            }
        }
        info!("scheduler stopped");
    }

    fn launch(
        &self,
        target_root: PathBuf,
        pairs: Vec<BackupPair>,
        trigger: Trigger,
        started: NaiveDateTime,
    ) -> Result<JoinHandle<BackupSession>> {
        let cancel = CancellationToken::new();
        {
            let mut state = self.lock();
            if state.active.is_some() {
                return Err(BackupError::AlreadyRunning);
            }
            state.active = Some(cancel.clone());
        }

        let lock = match SessionLock::acquire(&target_root) {
            Ok(lock) => lock,
            Err(e) => {
                self.lock().active = None;
                return Err(e);
            }
        };

        let request = SessionRequest::new(target_root, pairs);
        let session_id = request.id;
        let covered: Vec<Uuid> = request.pairs.iter().map(|p| p.id).collect();

        info!(session = %session_id, ?trigger, pairs = covered.len(), "starting backup session");
        let _ = self.events.send(SchedulerEvent::SessionStarted {
            session_id,
            trigger,
            pairs: covered.len(),
        });

        let runner = Arc::clone(&self.runner);
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let log = self.log.clone();

        Ok(tokio::spawn(async move {
            let forward = {
                let events = events.clone();
                move |event: SessionEvent| forward_event(&events, &log, session_id, event)
            };

            let session = runner.run(request, Box::new(forward), cancel).await;
            drop(lock);

            {
                let mut state = lock_state(&state);
                for id in &covered {
                    state.last_runs.insert(*id, started);
                }
                state.active = None;
            }

            if let SessionOutcome::Failed { message } = &session.outcome {
                warn!(session = %session_id, %message, "backup session failed");
            }
            let _ = events.send(SchedulerEvent::SessionFinished {
                session_id,
                outcome: session.outcome.clone(),
            });
            session
        }))
    }
}

fn lock_state(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn forward_event(
    events: &mpsc::UnboundedSender<SchedulerEvent>,
    log: &LogManager,
    session_id: Uuid,
    event: SessionEvent,
) {
    let event = match event {
        SessionEvent::Progress(percent) => SchedulerEvent::Progress { session_id, percent },
        SessionEvent::Status(line) => {
            let level = match StatusTag::parse_line(&line) {
                Some(StatusTag::Error) => LogLevel::Error,
                _ => LogLevel::Info,
            };
            log.log(level, &line, Some(session_id.to_string()));
            SchedulerEvent::Status { session_id, line }
        }
    };
    // The receiver may be gone; the session keeps running regardless.
    let _ = events.send(event);
}
