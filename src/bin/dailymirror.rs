use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dailymirror_lib::app_inventory::DesktopEntryInventory;
use dailymirror_lib::input_validation::{validate_path_argument, validate_target_root};
use dailymirror_lib::logging::init_tracing;
use dailymirror_lib::mirror_engine::{self, CopyReason, EntryKind, MirrorEngine, MirrorEvent};
use dailymirror_lib::orchestrator::SessionOutcome;
use dailymirror_lib::pair_store::BackupPair;
use dailymirror_lib::schedule::{Schedule, TimeOfDay, Weekdays};
use dailymirror_lib::scheduler::SchedulerEvent;
use dailymirror_lib::settings::{MemorySettingsStore, SettingsStore};
use dailymirror_lib::{default_config_dir, AppState};

#[derive(Parser)]
#[command(name = "dailymirror")]
#[command(about = "Scheduled folder mirroring into dated backup folders", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding backup_objects.json and settings.yaml
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Back up every configured pair now
    Run {
        /// Use this target instead of the saved one
        #[arg(short, long)]
        target: Option<PathBuf>,
    },
    /// Mirror a single folder into another
    Mirror {
        #[arg(short, long)]
        source: PathBuf,
        #[arg(short, long)]
        dest: PathBuf,
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Count the files below a folder
    Count { dir: PathBuf },
    /// Manage backup pairs
    #[command(subcommand)]
    Pairs(PairsCommand),
    /// Show or change settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Run the scheduler until interrupted
    Daemon,
}

#[derive(Subcommand)]
enum PairsCommand {
    List,
    Add {
        source: PathBuf,
        /// Label for the pair; defaults to the folder name
        #[arg(long)]
        dest: Option<String>,
        /// Own schedule days: daily, weekdays, weekends, none or mon,wed,...
        #[arg(long)]
        days: Option<Weekdays>,
        /// Own schedule time, HH:MM or hh:mm AM/PM
        #[arg(long)]
        time: Option<TimeOfDay>,
    },
    Remove { id: Uuid },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    /// Folder or mounted volume that receives the backups
    Target { dir: PathBuf },
    /// Time of the global schedule
    Time { time: TimeOfDay },
    /// Days of the global schedule
    Days { days: Weekdays },
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    validate_path_argument(&path.to_string_lossy())?;
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("⏹  Cancelling...");
            trigger.cancel();
        }
    });
    token
}

fn percent_bar() -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => default_config_dir().context("Could not determine a configuration directory")?,
    };

    match cli.command {
        Command::Run { target } => run_backup(&config_dir, target).await,
        Command::Mirror {
            source,
            dest,
            dry_run,
        } => mirror_one(&absolute(&source)?, &absolute(&dest)?, dry_run).await,
        Command::Count { dir } => count(&absolute(&dir)?),
        Command::Pairs(command) => pairs(&config_dir, command).await,
        Command::Settings(command) => settings(&config_dir, command).await,
        Command::Daemon => daemon(&config_dir).await,
    }
}

async fn run_backup(config_dir: &Path, target: Option<PathBuf>) -> anyhow::Result<()> {
    let state = AppState::load(config_dir).await?;
    let mut settings = state.settings.snapshot().await;
    if let Some(target) = target {
        settings.target_root = Some(absolute(&target)?);
    }
    let target = settings
        .target_root
        .clone()
        .context("No backup target set. Use `dailymirror settings target DIR` or --target")?;
    validate_target_root(&target)?;

    let pair_count = state.pairs.list().await.len();
    if pair_count == 0 {
        println!("ℹ️  No backup pairs configured. Add one with `dailymirror pairs add DIR`.");
        return Ok(());
    }

    println!("🚀 Starting backup of {pair_count} pair(s)...");
    println!("   Target: {target:?}");
    println!();

    // Same guard as the daemon: a concurrent session on this target is refused.
    let (scheduler, mut events) = state.scheduler_with_settings(
        Arc::new(DesktopEntryInventory::system()),
        Arc::new(MemorySettingsStore::new(settings)),
    );
    let scheduler = Arc::new(scheduler);
    let handle = scheduler.start_now().await?;

    let interrupt = cancel_on_ctrl_c();
    {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            interrupt.cancelled().await;
            scheduler.cancel();
        });
    }

    let pb = percent_bar()?;
    let printer = {
        let pb = pb.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SchedulerEvent::Progress { percent, .. } => pb.set_position(u64::from(percent)),
                    SchedulerEvent::Status { line, .. } => {
                        pb.println(&line);
                        pb.set_message(line);
                    }
                    SchedulerEvent::SessionStarted { .. } => {}
                    SchedulerEvent::SessionFinished { .. } => break,
                }
            }
        })
    };

    let session = handle.await?;
    let _ = printer.await;

    println!();
    println!("📊 Results:");
    println!("   Files processed: {}/{}", session.processed_files, session.total_files);
    println!("   Backup folder: {:?}", session.session_root);
    if let Some(log) = &session.log_path {
        println!("   Log: {log:?}");
    }

    match session.outcome {
        SessionOutcome::Completed => {
            pb.finish_with_message("✅ Backup complete!");
            Ok(())
        }
        SessionOutcome::Cancelled => {
            pb.abandon_with_message("⏹  Backup cancelled");
            Ok(())
        }
        SessionOutcome::Failed { message } => {
            pb.abandon_with_message("❌ Backup failed!");
            eprintln!("❌ Error: {message}");
            std::process::exit(1);
        }
    }
}

async fn mirror_one(source: &Path, dest: &Path, dry_run: bool) -> anyhow::Result<()> {
    let engine = MirrorEngine::new(source.to_path_buf(), dest.to_path_buf());

    if dry_run {
        println!("🔍 Dry-run mode - comparing directories...");
        println!("   Source: {source:?}");
        println!("   Target: {dest:?}");
        println!();

        let plan = engine.plan().await?;
        println!("📊 Comparison Results:");
        println!("   Total files in source: {}", plan.total_files);
        println!("   Files to copy: {}", plan.copies.len());
        println!("   Files up to date: {}", plan.up_to_date);
        println!("   Entries to delete: {}", plan.deletions.len());
        println!("   Bytes to copy: {} MB", plan.bytes_to_copy / 1_048_576);
        println!();

        if plan.is_in_sync() {
            println!("✅ Directories are in sync!");
            return Ok(());
        }

        println!("📝 Detailed Differences:");
        for copy in &plan.copies {
            let (icon, action) = match copy.decision {
                mirror_engine::CopyDecision::Copy(CopyReason::Missing) => ("➕", "NEW"),
                mirror_engine::CopyDecision::Copy(CopyReason::Newer) => ("🔄", "NEWER"),
                mirror_engine::CopyDecision::Copy(CopyReason::SizeChanged) => ("🔄", "SIZE CHANGED"),
                mirror_engine::CopyDecision::UpToDate => continue,
            };
            println!("   {icon} {:?} - {action} ({} bytes)", copy.path, copy.size);
        }
        for deletion in &plan.deletions {
            let what = match deletion.kind {
                EntryKind::File => "DELETE",
                EntryKind::Directory => "DELETE DIR",
            };
            println!("   ❌ {:?} - {what}", deletion.path);
        }
        return Ok(());
    }

    println!("🚀 Mirroring...");
    println!("   Source: {source:?}");
    println!("   Target: {dest:?}");
    println!();

    let total = mirror_engine::count_files(source).files();
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("#>-"),
    );

    let cancel = cancel_on_ctrl_c();
    let mut failures = Vec::new();
    let report = engine
        .mirror(&cancel, |event| match event {
            MirrorEvent::FileProcessed => pb.inc(1),
            MirrorEvent::Copying { path } => pb.set_message(path.display().to_string()),
            MirrorEvent::CopyFailed { path, message } | MirrorEvent::DeleteFailed { path, message } => {
                failures.push((path, message))
            }
            _ => {}
        })
        .await;

    let report = match report {
        Ok(report) => report,
        Err(e) => {
            pb.abandon_with_message("❌ Mirror failed!");
            eprintln!("❌ Error: {e}");
            std::process::exit(1);
        }
    };

    if report.cancelled {
        pb.abandon_with_message("⏹  Mirror cancelled");
    } else {
        pb.finish_with_message("✅ Mirror complete!");
    }
    println!();
    println!("📊 Results:");
    println!("   Files copied: {}", report.files_copied);
    println!("   Files up to date: {}", report.files_up_to_date);
    println!("   Entries deleted: {}", report.entries_deleted);
    println!("   Bytes copied: {} MB", report.bytes_copied / 1_048_576);
    if !failures.is_empty() {
        println!("   Errors: {}", failures.len());
        for (path, message) in &failures {
            eprintln!("   ⚠️  {path:?}: {message}");
        }
    }
    Ok(())
}

fn count(dir: &Path) -> anyhow::Result<()> {
    let inventory = mirror_engine::scan(dir)?;
    println!("📁 {dir:?}");
    println!("   Files: {}", inventory.files.len());
    println!("   Directories: {}", inventory.directories.len());
    println!("   Size: {} MB", inventory.total_bytes / 1_048_576);
    Ok(())
}

async fn pairs(config_dir: &Path, command: PairsCommand) -> anyhow::Result<()> {
    let state = AppState::load(config_dir).await?;

    match command {
        PairsCommand::List => {
            let pairs = state.pairs.list().await;
            if pairs.is_empty() {
                println!("No backup pairs configured.");
                return Ok(());
            }
            let global = state.settings.snapshot().await.global_schedule;
            println!("{:<38} {:<30} {:<20} SCHEDULE", "ID", "SOURCE", "DESTINATION");
            println!("{}", "-".repeat(110));
            for pair in pairs {
                let schedule = match &pair.custom_schedule {
                    Some(custom) => custom.to_string(),
                    None => format!("global ({global})"),
                };
                println!(
                    "{:<38} {:<30} {:<20} {}",
                    pair.id,
                    pair.display_source(),
                    pair.destination,
                    schedule
                );
            }
        }
        PairsCommand::Add {
            source,
            dest,
            days,
            time,
        } => {
            let mut pair = BackupPair::new(absolute(&source)?);
            if let Some(dest) = dest {
                pair = pair.with_destination(dest);
            }
            if days.is_some() || time.is_some() {
                pair = pair.with_schedule(Schedule::new(
                    days.unwrap_or(Weekdays::EVERY_DAY),
                    time.unwrap_or_default(),
                ));
            }
            if !pair.source.is_dir() {
                println!("⚠️  {:?} does not exist yet; it will be skipped until it does.", pair.source);
            }
            let id = pair.id;
            state.pairs.add(pair).await?;
            println!("✅ Added pair {id}");
        }
        PairsCommand::Remove { id } => {
            let removed = state.pairs.remove(id).await?;
            println!("🗑  Removed pair for {:?}", removed.source);
        }
    }
    Ok(())
}

async fn settings(config_dir: &Path, command: SettingsCommand) -> anyhow::Result<()> {
    let state = AppState::load(config_dir).await?;
    let mut settings = state.settings.snapshot().await;

    match command {
        SettingsCommand::Show => {
            println!("⚙️  Settings ({:?})", state.settings.path());
            match &settings.target_root {
                Some(target) => println!("   Target: {target:?}"),
                None => println!("   Target: (not set)"),
            }
            println!("   Schedule: {}", settings.global_schedule);
            return Ok(());
        }
        SettingsCommand::Target { dir } => {
            let dir = absolute(&dir)?;
            validate_target_root(&dir)?;
            settings.target_root = Some(dir);
        }
        SettingsCommand::Time { time } => settings.global_schedule.time = time,
        SettingsCommand::Days { days } => settings.global_schedule.days = days,
    }

    state.settings.save(settings.clone()).await?;
    println!("✅ Saved. Schedule: {}", settings.global_schedule);
    Ok(())
}

async fn daemon(config_dir: &Path) -> anyhow::Result<()> {
    let state = AppState::load(config_dir).await?;
    let (scheduler, mut events) = state.scheduler(Arc::new(DesktopEntryInventory::system()));

    let settings = state.settings.snapshot().await;
    println!("⏰ Scheduler running. Global schedule: {}", settings.global_schedule);
    if settings.target_root.is_none() {
        println!("⚠️  No backup target set; scheduled runs are skipped until one is.");
    }

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SchedulerEvent::SessionStarted { trigger, pairs, .. } => {
                    println!("🚀 {trigger:?} backup of {pairs} pair(s) started");
                }
                SchedulerEvent::Status { line, .. } => println!("   {line}"),
                SchedulerEvent::Progress { .. } => {}
                SchedulerEvent::SessionFinished { outcome, .. } => println!("🏁 {outcome:?}"),
            }
        }
    });

    let shutdown = cancel_on_ctrl_c();
    scheduler.run(shutdown).await;

    drop(scheduler);
    let _ = printer.await;
    Ok(())
}
