//! Batch rebuild coordinator
//!
//! Rebuilds many archives, each independently. With `parallelism > 1`
//! archives are spread over scoped worker threads; each worker owns the
//! archive it is rebuilding, and backup copies are serialised through one
//! lock.

use crate::archive::ArchiveHandle;
use crate::codec::{locate, ReadMode};
use crate::error::Result;
use crate::rebuild::{RebuildEngine, RebuildMode, RebuildReport};
use crate::validation::{has_extension, with_suffix};
use chrono::{DateTime, Utc};
use crossbeam::channel;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

/// Batch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Copy each archive to `<file>.<backup_suffix>` before rebuilding it
    pub create_backups: bool,
    /// Stop starting new rebuilds after the first failure
    pub stop_on_error: bool,
    /// Number of archives rebuilt at once
    pub parallelism: usize,
    pub backup_suffix: String,
    pub read_mode: ReadMode,
    /// Verify staged output (safe mode only)
    pub verify_output: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            create_backups: true,
            stop_on_error: false,
            parallelism: 1,
            backup_suffix: "backup".to_string(),
            read_mode: ReadMode::Lenient,
            verify_output: true,
        }
    }
}

/// Result for one archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub success: bool,
    /// Entries in the rebuilt archive
    pub entries: usize,
    /// Entries skipped in safe mode
    pub skipped: usize,
    pub size_saved: i64,
    /// Backup files written before the rebuild
    pub backups: Vec<PathBuf>,
    pub error: Option<String>,
}

impl FileOutcome {
    fn succeeded(path: PathBuf, backups: Vec<PathBuf>, report: &RebuildReport) -> Self {
        FileOutcome {
            path,
            success: true,
            entries: report.entries_written,
            skipped: report.skipped.len(),
            size_saved: report.size_saved(),
            backups,
            error: None,
        }
    }

    fn failed(path: PathBuf, backups: Vec<PathBuf>, message: String) -> Self {
        FileOutcome {
            path,
            success: false,
            entries: 0,
            skipped: 0,
            size_saved: 0,
            backups,
            error: Some(message),
        }
    }
}

/// Summary of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub mode: RebuildMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Archives requested
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Entries across all rebuilt archives
    pub total_entries: usize,
    /// True if `stop_on_error` cut the batch short
    pub halted: bool,
    /// Per-archive results, in request order (attempted archives only)
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    /// Outcomes of the archives that failed
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> + '_ {
        self.outcomes.iter().filter(|o| !o.success)
    }

    /// Archives that were never attempted
    pub fn not_attempted(&self) -> usize {
        self.total_files - self.outcomes.len()
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Rebuild every archive in `paths`
///
/// A failing archive never affects the others. With `stop_on_error` no new
/// rebuild starts after the first failure; rebuilds already running finish.
pub fn rebuild_all(paths: &[PathBuf], mode: RebuildMode, options: &BatchOptions) -> BatchReport {
    let started_at = Utc::now();
    let workers = options.parallelism.clamp(1, paths.len().max(1));
    info!(
        "Batch rebuild of {} archives ({:?} mode, {} workers)",
        paths.len(),
        mode,
        workers
    );

    let engine = RebuildEngine::new(mode).verify_output(options.verify_output);
    let backup_lock = Mutex::new(());
    let halted = AtomicBool::new(false);

    let (job_tx, job_rx) = channel::unbounded::<(usize, &PathBuf)>();
    let (result_tx, result_rx) = channel::unbounded::<(usize, FileOutcome)>();
    for job in paths.iter().enumerate() {
        // Receiver is alive until the end of this function
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let scoped = crossbeam::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let engine = &engine;
            let backup_lock = &backup_lock;
            let halted = &halted;

            scope.spawn(move |_| {
                for (index, path) in job_rx.iter() {
                    if halted.load(Ordering::SeqCst) {
                        break;
                    }
                    let outcome = rebuild_one(path, engine, options, backup_lock);
                    if !outcome.success && options.stop_on_error {
                        halted.store(true, Ordering::SeqCst);
                    }
                    let _ = result_tx.send((index, outcome));
                }
            });
        }
    });
    drop(result_tx);

    if scoped.is_err() {
        error!("A batch rebuild worker panicked");
    }

    let mut outcomes: Vec<(usize, FileOutcome)> = result_rx.iter().collect();
    outcomes.sort_by_key(|(index, _)| *index);
    let outcomes: Vec<FileOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();

    let succeeded = outcomes.iter().filter(|o| o.success).count();
    let report = BatchReport {
        mode,
        started_at,
        finished_at: Utc::now(),
        total_files: paths.len(),
        succeeded,
        failed: outcomes.len() - succeeded,
        total_entries: outcomes.iter().map(|o| o.entries).sum(),
        halted: halted.load(Ordering::SeqCst),
        outcomes,
    };

    info!(
        "Batch rebuild finished: {} succeeded, {} failed, {} entries",
        report.succeeded, report.failed, report.total_entries
    );
    report
}

fn rebuild_one(
    path: &Path,
    engine: &RebuildEngine,
    options: &BatchOptions,
    backup_lock: &Mutex<()>,
) -> FileOutcome {
    let backups = if options.create_backups {
        let _guard = backup_lock.lock();
        back_up(path, &options.backup_suffix)
    } else {
        Vec::new()
    };

    let result = ArchiveHandle::open_with(path, options.read_mode)
        .and_then(|mut handle| engine.rebuild(&mut handle));

    match result {
        Ok(report) => FileOutcome::succeeded(path.to_path_buf(), backups, &report),
        Err(e) => {
            warn!("Rebuild of {:?} failed: {}", path, e);
            FileOutcome::failed(path.to_path_buf(), backups, e.to_string())
        }
    }
}

/// Copy the archive's files next to themselves; failures only warn
fn back_up(path: &Path, suffix: &str) -> Vec<PathBuf> {
    let files = match locate(path) {
        Ok(location) => {
            let mut files = vec![location.img_path.clone()];
            files.extend(location.dir_path.clone());
            files
        }
        Err(_) => vec![path.to_path_buf()],
    };

    let mut written = Vec::new();
    for file in files {
        let backup = with_suffix(&file, suffix);
        match std::fs::copy(&file, &backup) {
            Ok(_) => written.push(backup),
            Err(e) => warn!("Could not back up {:?} to {:?}: {}", file, backup, e),
        }
    }
    written
}

/// All `.img` files directly inside `dir`, sorted by path
///
/// V1 pairs appear once, through their `.img`.
pub fn find_archives<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, "img") {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
