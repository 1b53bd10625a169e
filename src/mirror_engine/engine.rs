use crate::error::{BackupError, Result};
use crate::mirror_engine::scanner::entry_kind;
use crate::mirror_engine::types::{
    CopyDecision, DeletionCandidate, EntryKind, FileMetadata, MirrorEvent, MirrorPlan, MirrorReport,
    PlannedCopy,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Suffix of the uniquely named hidden sibling a copy is written to before it
/// replaces the destination.
const STAGING_SUFFIX: &str = ".dmtmp";

/// Makes one destination tree equal to one source tree.
pub struct MirrorEngine {
    source: PathBuf,
    target: PathBuf,
}

impl MirrorEngine {
    pub fn new(source: PathBuf, target: PathBuf) -> Self {
        Self { source, target }
    }

    async fn read_metadata(path: &Path) -> Option<FileMetadata> {
        let meta = fs::symlink_metadata(path).await.ok()?;
        FileMetadata::from_std(&meta).ok()
    }

    /// Whether `relative` is present in the source. Only `NotFound` (or a
    /// non-directory where an ancestor directory is expected) means absent;
    /// any other failure is returned so the caller keeps the destination entry.
    async fn source_has(&self, relative: &Path) -> std::io::Result<bool> {
        match fs::symlink_metadata(self.source.join(relative)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => {
                if let Some(parent) = relative.parent().filter(|p| !p.as_os_str().is_empty()) {
                    if let Ok(meta) = fs::metadata(self.source.join(parent)).await {
                        if !meta.is_dir() {
                            return Ok(false);
                        }
                    }
                }
                Err(e)
            }
        }
    }

    fn relative_to(root: &Path, path: &Path) -> PathBuf {
        path.strip_prefix(root).unwrap_or(path).to_path_buf()
    }

    async fn ensure_source(&self) -> Result<()> {
        match fs::metadata(&self.source).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(BackupError::SourceMissing(self.source.clone())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BackupError::SourceMissing(self.source.clone()))
            }
            Err(e) => Err(BackupError::Io(e)),
        }
    }

    /// Compute what [`mirror`](Self::mirror) would do without writing anything.
    pub async fn plan(&self) -> Result<MirrorPlan> {
        self.ensure_source().await?;

        let mut plan = MirrorPlan::default();

        for entry in WalkDir::new(&self.source).min_depth(1).into_iter().filter_map(|e| e.ok()) {
            if !matches!(entry_kind(&entry), Ok(Some(EntryKind::File))) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.source) else {
                continue;
            };
            let Ok(meta) = fs::metadata(entry.path()).await else {
                continue;
            };
            let Ok(source_meta) = FileMetadata::from_std(&meta) else {
                continue;
            };
            plan.total_files += 1;

            let target_meta = Self::read_metadata(&self.target.join(relative)).await;
            let decision = CopyDecision::decide(&source_meta, target_meta.as_ref());
            if decision.needs_copy() {
                plan.bytes_to_copy += source_meta.size;
                plan.copies.push(PlannedCopy {
                    path: relative.to_path_buf(),
                    decision,
                    size: source_meta.size,
                });
            } else {
                plan.up_to_date += 1;
            }
        }

        if self.target.is_dir() {
            let mut walker = WalkDir::new(&self.target).min_depth(1).into_iter();
            while let Some(entry) = walker.next() {
                let Ok(entry) = entry else { continue };
                let Ok(relative) = entry.path().strip_prefix(&self.target) else {
                    continue;
                };
                // Unverifiable entries are kept, as in `mirror`.
                if !matches!(self.source_has(relative).await, Ok(false)) {
                    continue;
                }
                let kind = if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                plan.deletions.push(DeletionCandidate {
                    path: relative.to_path_buf(),
                    kind,
                });
            }
        }

        Ok(plan)
    }

    /// Mirror the source tree into the target tree.
    ///
    /// Copies new and changed files, then removes destination entries that
    /// no longer exist in the source. Per-file failures, including entries
    /// the walk cannot read, are reported through `on_event` and never abort
    /// the pass. `cancel` is polled before every file and every deletion
    /// candidate; a cancelled pass returns normally with
    /// [`MirrorReport::cancelled`] set.
    ///
    /// Symlinks to files are copied as regular files holding the link
    /// target's contents. Symlinks to directories become empty directories
    /// and are not descended into.
    ///
    /// Fails only when the source is missing or the target root cannot be created.
    pub async fn mirror<F>(&self, cancel: &CancellationToken, mut on_event: F) -> Result<MirrorReport>
    where
        F: FnMut(MirrorEvent),
    {
        self.ensure_source().await?;

        fs::create_dir_all(&self.target)
            .await
            .map_err(|source| BackupError::CreateDir {
                path: self.target.clone(),
                source,
            })?;

        let mut report = MirrorReport::default();

        for entry in WalkDir::new(&self.source).min_depth(1) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| Self::relative_to(&self.source, p))
                        .unwrap_or_default();
                    warn!(path = %path.display(), error = %e, "cannot read source entry");
                    report.files_failed += 1;
                    on_event(MirrorEvent::CopyFailed {
                        path,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let relative = Self::relative_to(&self.source, entry.path());
            let target_path = self.target.join(&relative);

            let kind = match entry_kind(&entry) {
                Ok(Some(kind)) => kind,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "cannot resolve source entry");
                    report.files_failed += 1;
                    on_event(MirrorEvent::CopyFailed {
                        path: relative,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if kind == EntryKind::Directory {
                if let Err(e) = Self::ensure_directory(&target_path).await {
                    warn!(path = %target_path.display(), error = %e, "failed to create directory");
                    on_event(MirrorEvent::CopyFailed {
                        path: relative,
                        message: e.to_string(),
                    });
                }
                continue;
            }

            report.files_visited += 1;
            self.process_file(entry.path(), relative, &target_path, &mut report, &mut on_event)
                .await;
            on_event(MirrorEvent::FileProcessed);
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        self.remove_extraneous(cancel, &mut report, &mut on_event).await;

        Ok(report)
    }

    async fn process_file<F>(
        &self,
        source_path: &Path,
        relative: PathBuf,
        target_path: &Path,
        report: &mut MirrorReport,
        on_event: &mut F,
    ) where
        F: FnMut(MirrorEvent),
    {
        let source_meta = match fs::metadata(source_path).await {
            Ok(meta) => FileMetadata::from_std(&meta),
            Err(e) => Err(e),
        };
        let source_meta = match source_meta {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Removed after it was listed.
                debug!(path = %source_path.display(), "source file vanished, skipping");
                return;
            }
            Err(e) => {
                report.files_failed += 1;
                on_event(MirrorEvent::CopyFailed {
                    path: relative,
                    message: e.to_string(),
                });
                return;
            }
        };

        let target_meta = Self::read_metadata(target_path).await;
        match CopyDecision::decide(&source_meta, target_meta.as_ref()) {
            CopyDecision::UpToDate => {
                report.files_up_to_date += 1;
                on_event(MirrorEvent::UpToDate { path: relative });
            }
            CopyDecision::Copy(reason) => {
                on_event(MirrorEvent::Copying {
                    path: relative.clone(),
                });
                match Self::copy_file(source_path, target_path, &source_meta).await {
                    Ok(()) => {
                        debug!(path = %relative.display(), ?reason, "copied");
                        report.files_copied += 1;
                        report.bytes_copied += source_meta.size;
                        on_event(MirrorEvent::Copied {
                            path: relative,
                            bytes: source_meta.size,
                        });
                    }
                    Err(e) => {
                        warn!(path = %source_path.display(), error = %e, "copy failed");
                        report.files_failed += 1;
                        on_event(MirrorEvent::CopyFailed {
                            path: relative,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn ensure_directory(path: &Path) -> std::io::Result<()> {
        if let Ok(meta) = fs::symlink_metadata(path).await {
            if meta.is_dir() {
                return Ok(());
            }
            fs::remove_file(path).await?;
        }
        fs::create_dir_all(path).await
    }

    /// Replace `target` with a copy of `source`, all or nothing.
    ///
    /// The copy is staged in a freshly created, uniquely named file next to
    /// `target`, so it can never clobber another entry of the tree. The
    /// staging file is removed when any step fails.
    async fn copy_file(source: &Path, target: &Path, source_meta: &FileMetadata) -> std::io::Result<()> {
        let parent = target.parent().ok_or_else(|| {
            std::io::Error::new(ErrorKind::InvalidInput, "destination has no parent directory")
        })?;
        fs::create_dir_all(parent).await?;

        if let Ok(meta) = fs::symlink_metadata(target).await {
            if meta.is_dir() {
                fs::remove_dir_all(target).await?;
            }
        }

        let staging = tempfile::Builder::new()
            .prefix(".")
            .suffix(STAGING_SUFFIX)
            .tempfile_in(parent)?;
        fs::copy(source, staging.path()).await?;
        filetime::set_file_mtime(staging.path(), filetime::FileTime::from_system_time(source_meta.modified))?;
        staging.persist(target).map_err(|e| e.error)?;
        Ok(())
    }

    async fn remove_extraneous<F>(&self, cancel: &CancellationToken, report: &mut MirrorReport, on_event: &mut F)
    where
        F: FnMut(MirrorEvent),
    {
        let mut walker = WalkDir::new(&self.target).min_depth(1).into_iter();

        while let Some(entry) = walker.next() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| Self::relative_to(&self.target, p))
                        .unwrap_or_default();
                    warn!(path = %path.display(), error = %e, "cannot read destination entry");
                    report.delete_failures += 1;
                    on_event(MirrorEvent::DeleteFailed {
                        path,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            let relative = Self::relative_to(&self.target, entry.path());
            let is_dir = entry.file_type().is_dir();

            match self.source_has(&relative).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    // Source state unknown: keep the entry and everything below it.
                    if is_dir {
                        walker.skip_current_dir();
                    }
                    warn!(path = %relative.display(), error = %e, "cannot check source entry");
                    report.delete_failures += 1;
                    on_event(MirrorEvent::DeleteFailed {
                        path: relative,
                        message: format!("cannot check source: {e}"),
                    });
                    continue;
                }
            }

            let candidate = DeletionCandidate {
                path: relative,
                kind: if is_dir {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
            };

            let removed = match candidate.kind {
                EntryKind::Directory => {
                    // Contents go with the directory.
                    walker.skip_current_dir();
                    fs::remove_dir_all(entry.path()).await
                }
                EntryKind::File => fs::remove_file(entry.path()).await,
            };

            match removed {
                Ok(()) => {
                    report.entries_deleted += 1;
                    on_event(MirrorEvent::Deleted {
                        path: candidate.path,
                        kind: candidate.kind,
                    });
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "delete failed");
                    report.delete_failures += 1;
                    on_event(MirrorEvent::DeleteFailed {
                        path: candidate.path,
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn relative_paths(root: &Path) -> BTreeSet<PathBuf> {
        WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
            .collect()
    }

    fn set_mtime(path: &Path, secs: u64) {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
        filetime::set_file_mtime(path, filetime::FileTime::from_system_time(time)).unwrap();
    }

    fn mtime(path: &Path) -> SystemTime {
        std::fs::metadata(path).unwrap().modified().unwrap()
    }

    fn seed_source(root: &Path) {
        std::fs::create_dir_all(root.join("docs/nested")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::write(root.join("top.txt"), b"hello world").unwrap();
        std::fs::write(root.join("docs/a.md"), b"# notes").unwrap();
        std::fs::write(root.join("docs/nested/b.bin"), vec![7u8; 4096]).unwrap();
    }

    #[tokio::test]
    async fn test_mirror_copies_tree() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        seed_source(source_dir.path());
        let target = target_dir.path().join("leaf");

        let engine = MirrorEngine::new(source_dir.path().to_path_buf(), target.clone());
        let mut processed = 0;
        let report = engine
            .mirror(&CancellationToken::new(), |event| {
                if event == MirrorEvent::FileProcessed {
                    processed += 1;
                }
            })
            .await?;

        assert_eq!(report.files_visited, 3);
        assert_eq!(report.files_copied, 3);
        assert_eq!(processed, 3);
        assert!(!report.cancelled);
        assert_eq!(relative_paths(source_dir.path()), relative_paths(&target));
        assert_eq!(std::fs::read(target.join("docs/nested/b.bin"))?, vec![7u8; 4096]);
        assert_eq!(std::fs::read(target.join("top.txt"))?, b"hello world");
        Ok(())
    }

    #[tokio::test]
    async fn test_second_mirror_is_a_no_op() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        seed_source(source_dir.path());

        let engine = MirrorEngine::new(source_dir.path().to_path_buf(), target_dir.path().to_path_buf());
        let cancel = CancellationToken::new();
        engine.mirror(&cancel, |_| {}).await?;
        let before = mtime(&target_dir.path().join("docs/a.md"));

        let mut events = Vec::new();
        let report = engine.mirror(&cancel, |event| events.push(event)).await?;

        assert_eq!(report.files_copied, 0);
        assert_eq!(report.files_up_to_date, 3);
        assert_eq!(report.entries_deleted, 0);
        assert!(!events.iter().any(|e| matches!(e, MirrorEvent::Copying { .. } | MirrorEvent::Deleted { .. })));
        assert_eq!(mtime(&target_dir.path().join("docs/a.md")), before);
        Ok(())
    }

    #[tokio::test]
    async fn test_mirror_deletes_stale_entries_and_keeps_current_ones() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        let source = source_dir.path();
        let target = target_dir.path();

        std::fs::write(source.join("kept.txt"), b"same")?;
        std::fs::write(target.join("kept.txt"), b"same")?;
        set_mtime(&source.join("kept.txt"), 1_600_000_000);
        set_mtime(&target.join("kept.txt"), 1_600_000_000);

        std::fs::write(target.join("old.txt"), b"stale")?;
        std::fs::create_dir_all(target.join("gone/deeper"))?;
        std::fs::write(target.join("gone/deeper/x.txt"), b"x")?;

        let engine = MirrorEngine::new(source.to_path_buf(), target.to_path_buf());
        let mut deleted = Vec::new();
        let report = engine
            .mirror(&CancellationToken::new(), |event| {
                if let MirrorEvent::Deleted { path, kind } = event {
                    deleted.push((path, kind));
                }
            })
            .await?;

        assert!(!target.join("old.txt").exists());
        assert!(!target.join("gone").exists());
        assert_eq!(report.files_copied, 0);
        assert_eq!(report.entries_deleted, 2);
        assert!(deleted.contains(&(PathBuf::from("gone"), EntryKind::Directory)));
        assert!(deleted.contains(&(PathBuf::from("old.txt"), EntryKind::File)));
        assert_eq!(
            mtime(&target.join("kept.txt")),
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_changed_files_are_recopied() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        let source = source_dir.path();
        let target = target_dir.path();

        std::fs::write(source.join("newer.txt"), b"v2")?;
        std::fs::write(target.join("newer.txt"), b"v1")?;
        set_mtime(&target.join("newer.txt"), 1_500_000_000);
        set_mtime(&source.join("newer.txt"), 1_600_000_000);

        std::fs::write(source.join("resized.txt"), b"longer content")?;
        std::fs::write(target.join("resized.txt"), b"short")?;
        set_mtime(&source.join("resized.txt"), 1_400_000_000);
        set_mtime(&target.join("resized.txt"), 1_600_000_000);

        let engine = MirrorEngine::new(source.to_path_buf(), target.to_path_buf());
        let report = engine.mirror(&CancellationToken::new(), |_| {}).await?;

        assert_eq!(report.files_copied, 2);
        assert_eq!(std::fs::read(target.join("newer.txt"))?, b"v2");
        assert_eq!(std::fs::read(target.join("resized.txt"))?, b"longer content");
        assert_eq!(
            mtime(&target.join("newer.txt")),
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_source_empties_destination() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        let target = target_dir.path().join("mirror");
        std::fs::create_dir_all(target.join("sub"))?;
        std::fs::write(target.join("sub/file.txt"), b"x")?;

        let engine = MirrorEngine::new(source_dir.path().to_path_buf(), target.clone());
        let report = engine.mirror(&CancellationToken::new(), |_| {}).await?;

        assert_eq!(report.files_visited, 0);
        assert!(target.is_dir());
        assert!(relative_paths(&target).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_directory_in_place_of_file_is_replaced() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        std::fs::write(source_dir.path().join("item"), b"file now")?;
        std::fs::create_dir_all(target_dir.path().join("item/inner"))?;

        let engine = MirrorEngine::new(source_dir.path().to_path_buf(), target_dir.path().to_path_buf());
        let report = engine.mirror(&CancellationToken::new(), |_| {}).await?;

        assert_eq!(report.files_copied, 1);
        assert_eq!(std::fs::read(target_dir.path().join("item"))?, b"file now");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_source_is_an_error() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let engine = MirrorEngine::new(root.path().join("missing"), root.path().join("out"));

        let result = engine.mirror(&CancellationToken::new(), |_| {}).await;
        assert!(matches!(result, Err(BackupError::SourceMissing(_))));
        assert!(!root.path().join("out").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_before_start_copies_nothing() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        seed_source(source_dir.path());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let engine = MirrorEngine::new(source_dir.path().to_path_buf(), target_dir.path().to_path_buf());
        let report = engine.mirror(&cancel, |_| {}).await?;

        assert!(report.cancelled);
        assert_eq!(report.files_visited, 0);
        assert!(!target_dir.path().join("top.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_mid_pass_leaves_whole_files_only() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        for i in 0..10 {
            std::fs::write(source_dir.path().join(format!("f{i}.dat")), vec![i as u8; 1024])?;
        }
        std::fs::write(target_dir.path().join("stale.txt"), b"old")?;

        let cancel = CancellationToken::new();
        let engine = MirrorEngine::new(source_dir.path().to_path_buf(), target_dir.path().to_path_buf());
        let report = engine
            .mirror(&cancel, |event| {
                if event == MirrorEvent::FileProcessed {
                    cancel.cancel();
                }
            })
            .await?;

        assert!(report.cancelled);
        assert_eq!(report.files_visited, 1);
        // Deletion phase never ran.
        assert!(target_dir.path().join("stale.txt").exists());
        for path in relative_paths(target_dir.path()) {
            let name = path.to_string_lossy().into_owned();
            assert!(!name.ends_with(STAGING_SUFFIX), "staging file left behind: {name}");
            if name.starts_with('f') {
                let source = std::fs::read(source_dir.path().join(&path))?;
                assert_eq!(std::fs::read(target_dir.path().join(&path))?, source);
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_plan_does_not_touch_destination() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        seed_source(source_dir.path());
        std::fs::write(target_dir.path().join("orphan.txt"), b"x")?;

        let engine = MirrorEngine::new(source_dir.path().to_path_buf(), target_dir.path().to_path_buf());
        let plan = engine.plan().await?;

        assert_eq!(plan.total_files, 3);
        assert_eq!(plan.copies.len(), 3);
        assert_eq!(
            plan.deletions,
            vec![DeletionCandidate {
                path: PathBuf::from("orphan.txt"),
                kind: EntryKind::File
            }]
        );
        assert!(!plan.is_in_sync());
        assert!(target_dir.path().join("orphan.txt").exists());
        assert!(!target_dir.path().join("top.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_source_names_that_look_like_staging_files() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        for name in ["f", "a.txt", "report.pdf"] {
            std::fs::write(source_dir.path().join(name), format!("payload of {name}"))?;
            let lookalike = format!(".{name}{STAGING_SUFFIX}");
            std::fs::write(source_dir.path().join(&lookalike), format!("payload of {lookalike}"))?;
        }

        let engine = MirrorEngine::new(source_dir.path().to_path_buf(), target_dir.path().to_path_buf());
        let mut events = Vec::new();
        let report = engine
            .mirror(&CancellationToken::new(), |event| events.push(event))
            .await?;

        assert_eq!(report.files_copied, 6);
        assert_eq!(report.entries_deleted, 0);
        assert!(!events
            .iter()
            .any(|e| matches!(e, MirrorEvent::Deleted { .. } | MirrorEvent::CopyFailed { .. })));
        assert_eq!(relative_paths(target_dir.path()), relative_paths(source_dir.path()));
        for path in relative_paths(source_dir.path()) {
            assert_eq!(
                std::fs::read(target_dir.path().join(&path))?,
                std::fs::read(source_dir.path().join(&path))?
            );
        }

        let again = engine.mirror(&CancellationToken::new(), |_| {}).await?;
        assert_eq!(again.files_copied, 0);
        assert_eq!(again.files_up_to_date, 6);
        assert_eq!(again.entries_deleted, 0);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_file_is_copied_as_regular_file() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        std::fs::write(source_dir.path().join("real.txt"), b"linked contents")?;
        std::os::unix::fs::symlink(source_dir.path().join("real.txt"), source_dir.path().join("link.txt"))?;

        let engine = MirrorEngine::new(source_dir.path().to_path_buf(), target_dir.path().to_path_buf());
        let mut processed = 0;
        let report = engine
            .mirror(&CancellationToken::new(), |event| {
                if event == MirrorEvent::FileProcessed {
                    processed += 1;
                }
            })
            .await?;

        assert_eq!(report.files_visited, 2);
        assert_eq!(report.files_copied, 2);
        assert_eq!(processed, 2);
        assert_eq!(crate::mirror_engine::count_files(source_dir.path()).files(), 2);

        let copied = target_dir.path().join("link.txt");
        assert!(std::fs::symlink_metadata(&copied)?.file_type().is_file());
        assert_eq!(std::fs::read(&copied)?, b"linked contents");

        let again = engine.mirror(&CancellationToken::new(), |_| {}).await?;
        assert_eq!(again.files_up_to_date, 2);
        assert_eq!(again.entries_deleted, 0);
        Ok(())
    }

    #[cfg(unix)]
    fn set_mode(path: &Path, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_source_file_is_reported_and_pass_continues() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        seed_source(source_dir.path());
        let locked = source_dir.path().join("docs/a.md");
        set_mode(&locked, 0o000);
        if std::fs::File::open(&locked).is_ok() {
            // Permission bits are not enforced for this user.
            set_mode(&locked, 0o644);
            return Ok(());
        }

        let engine = MirrorEngine::new(source_dir.path().to_path_buf(), target_dir.path().to_path_buf());
        let mut events = Vec::new();
        let report = engine
            .mirror(&CancellationToken::new(), |event| events.push(event))
            .await;
        set_mode(&locked, 0o644);
        let report = report?;

        assert_eq!(report.files_visited, 3);
        assert_eq!(report.files_copied, 2);
        assert_eq!(report.files_failed, 1);
        assert!(events.iter().any(|e| matches!(
            e,
            MirrorEvent::CopyFailed { path, .. } if path == Path::new("docs/a.md")
        )));
        assert_eq!(events.iter().filter(|e| **e == MirrorEvent::FileProcessed).count(), 3);
        assert!(target_dir.path().join("top.txt").is_file());
        assert!(target_dir.path().join("docs/nested/b.bin").is_file());
        assert!(!target_dir.path().join("docs/a.md").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_source_dir_keeps_destination_copy() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        std::fs::create_dir_all(source_dir.path().join("sub"))?;
        std::fs::write(source_dir.path().join("sub/a.txt"), b"precious")?;
        std::fs::write(source_dir.path().join("top.txt"), b"top")?;

        let engine = MirrorEngine::new(source_dir.path().to_path_buf(), target_dir.path().to_path_buf());
        engine.mirror(&CancellationToken::new(), |_| {}).await?;
        assert!(target_dir.path().join("sub/a.txt").is_file());

        let sub = source_dir.path().join("sub");
        set_mode(&sub, 0o000);
        if std::fs::read_dir(&sub).is_ok() {
            set_mode(&sub, 0o755);
            return Ok(());
        }

        let mut events = Vec::new();
        let report = engine
            .mirror(&CancellationToken::new(), |event| events.push(event))
            .await;
        set_mode(&sub, 0o755);
        let report = report?;

        assert!(events.iter().any(|e| matches!(
            e,
            MirrorEvent::CopyFailed { path, .. } if path == Path::new("sub")
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            MirrorEvent::DeleteFailed { path, .. } if path == Path::new("sub/a.txt")
        )));
        assert!(!events.iter().any(|e| matches!(e, MirrorEvent::Deleted { .. })));
        assert_eq!(report.entries_deleted, 0);
        assert!(report.files_failed >= 1);
        assert_eq!(std::fs::read(target_dir.path().join("sub/a.txt"))?, b"precious");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_failure_is_reported_and_pass_continues() -> anyhow::Result<()> {
        let source_dir = TempDir::new()?;
        let target_dir = TempDir::new()?;
        std::fs::create_dir_all(source_dir.path().join("locked"))?;
        std::fs::write(source_dir.path().join("keep.txt"), b"keep")?;

        let locked = target_dir.path().join("locked");
        std::fs::create_dir_all(&locked)?;
        std::fs::write(locked.join("stale_inside.txt"), b"old")?;
        std::fs::write(target_dir.path().join("stale_top.txt"), b"old")?;
        set_mode(&locked, 0o555);
        if std::fs::write(locked.join("writable"), b"").is_ok() {
            set_mode(&locked, 0o755);
            return Ok(());
        }

        let engine = MirrorEngine::new(source_dir.path().to_path_buf(), target_dir.path().to_path_buf());
        let mut events = Vec::new();
        let report = engine
            .mirror(&CancellationToken::new(), |event| events.push(event))
            .await;
        set_mode(&locked, 0o755);
        let report = report?;

        assert_eq!(report.delete_failures, 1);
        assert_eq!(report.entries_deleted, 1);
        assert!(events.iter().any(|e| matches!(
            e,
            MirrorEvent::DeleteFailed { path, .. } if path == Path::new("locked/stale_inside.txt")
        )));
        assert!(events.contains(&MirrorEvent::Deleted {
            path: PathBuf::from("stale_top.txt"),
            kind: EntryKind::File,
        }));
        assert!(locked.join("stale_inside.txt").exists());
        assert!(!target_dir.path().join("stale_top.txt").exists());
        assert!(target_dir.path().join("keep.txt").is_file());
        Ok(())
    }
}
