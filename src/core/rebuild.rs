//! Rebuild engine
//!
//! Writes the entry table of an [`ArchiveHandle`] to new files and swaps
//! them over the originals.
//!
//! ```text
//! Planning -> Writing -> Swapping -> Done
//!                |
//!                +-> Failed -> Cleanup
//! ```
//!
//! Nothing is written to the original files before Swapping. Errors and
//! cancellation during Planning or Writing remove the staged `.tmp` files and
//! leave the archive untouched. Swapping is one rename for V2 and two for V1;
//! if the second V1 rename fails the pair is inconsistent and the error is
//! `PartialSwap`.

use crate::allocator::{LayoutPlanner, LayoutStats, RebuildPlan};
use crate::archive::ArchiveHandle;
use crate::codec::{parse_directory, write_directory, RawDirRecord, ReadMode, Version};
use crate::entry::ArchiveEntry;
use crate::error::{ImgError, Result};
use crate::io::{ImgFile, StagedFile};
use crate::validation::{companion_path, has_extension};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How unresolvable entries are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildMode {
    /// Abort on the first entry whose payload cannot be resolved
    #[default]
    Fast,
    /// Skip and report unresolvable entries, verify the output
    Safe,
}

/// Rebuild state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPhase {
    Planning,
    Writing,
    Swapping,
    Done,
    Failed,
    Cleanup,
}

/// Shared cancellation flag
///
/// Checked before each entry is written and once more before Swapping.
/// Cancelling after Swapping has started has no effect.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An entry left out of a safe-mode rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

/// Outcome of a successful rebuild
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildReport {
    pub mode: RebuildMode,
    pub version: Version,
    /// Entries in the written archive
    pub entries_written: usize,
    /// Entries dropped in safe mode
    pub skipped: Vec<SkippedEntry>,
    /// Names changed by sanitisation, as `(from, to)`
    pub renamed: Vec<(String, String)>,
    /// Payload bytes written (without padding)
    pub bytes_written: u64,
    pub layout_before: LayoutStats,
    pub layout_after: LayoutStats,
    /// Size of the archive files before the rebuild
    pub size_before: u64,
    /// Size of the archive files after the rebuild
    pub size_after: u64,
    pub duration_ms: u64,
}

impl RebuildReport {
    /// Bytes saved on disk (negative if the archive grew)
    pub fn size_saved(&self) -> i64 {
        self.size_before as i64 - self.size_after as i64
    }
}

type PhaseObserver = Arc<dyn Fn(RebuildPhase) + Send + Sync>;

/// Configured rebuild
///
/// # Examples
///
/// ```rust,no_run
/// use img_factory_rs::{ArchiveHandle, RebuildEngine, RebuildMode};
///
/// # fn main() -> img_factory_rs::Result<()> {
/// let mut handle = ArchiveHandle::open("models/gta3.img")?;
/// handle.remove_entry("unused.dff")?;
///
/// let report = RebuildEngine::new(RebuildMode::Safe).rebuild(&mut handle)?;
/// println!("{} entries, {} skipped", report.entries_written, report.skipped.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RebuildEngine {
    mode: RebuildMode,
    verify_output: bool,
    output: Option<PathBuf>,
    cancel: Option<CancelToken>,
    observer: Option<PhaseObserver>,
}

impl Default for RebuildEngine {
    fn default() -> Self {
        Self::new(RebuildMode::default())
    }
}

/// Staged replacement files of one rebuild
struct StagedArchive {
    img: StagedFile,
    dir: Option<StagedFile>,
    records: Vec<RawDirRecord>,
    /// Length and CRC32 of every payload, in plan order
    checksums: Vec<(usize, u32)>,
    bytes_written: u64,
}

impl RebuildEngine {
    pub fn new(mode: RebuildMode) -> Self {
        RebuildEngine {
            mode,
            verify_output: true,
            output: None,
            cancel: None,
            observer: None,
        }
    }

    /// Re-read and checksum the staged files before swapping (safe mode only)
    pub fn verify_output(mut self, verify: bool) -> Self {
        self.verify_output = verify;
        self
    }

    /// Write to a different path instead of replacing the archive in place
    ///
    /// For V1 either half of the pair may be given; the other is derived.
    pub fn output_to<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Make the rebuild cancellable through `token`
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Call `observer` on every phase transition
    pub fn on_phase<F>(mut self, observer: F) -> Self
    where
        F: Fn(RebuildPhase) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn mode(&self) -> RebuildMode {
        self.mode
    }

    fn enter(&self, phase: RebuildPhase) {
        debug!("Rebuild phase: {:?}", phase);
        if let Some(observer) = &self.observer {
            observer(phase);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(ImgError::Cancelled),
            _ => Ok(()),
        }
    }

    fn verifies(&self) -> bool {
        self.mode == RebuildMode::Safe && self.verify_output
    }

    /// Rebuild `handle` to disk
    ///
    /// On success every surviving entry is `Original` with its new layout and
    /// the handle is no longer modified. On any error other than
    /// `PartialSwap` the archive on disk is unchanged, and so is the table
    /// (apart from sanitised names).
    pub fn rebuild(&self, handle: &mut ArchiveHandle) -> Result<RebuildReport> {
        let started = Instant::now();
        let version = handle.version();
        info!(
            "Rebuilding {} archive {:?} ({:?} mode)",
            version,
            handle.img_path(),
            self.mode
        );

        let renamed = handle.table_mut().sanitize_names();
        let snapshot = handle.table().snapshot();
        let layout_before = handle.layout_stats();
        let size_before = handle.disk_size();
        let (img_target, dir_target) = self.targets(handle);

        self.enter(RebuildPhase::Planning);
        let planned = self.resolve(handle, snapshot).and_then(|(entries, skipped)| {
            let plan = LayoutPlanner::plan(&entries, version)?;
            Ok((entries, skipped, plan))
        });
        let (mut entries, skipped, plan) = match planned {
            Ok(planned) => planned,
            Err(e) => {
                self.enter(RebuildPhase::Failed);
                warn!("Rebuild of {:?} failed during planning: {}", handle.img_path(), e);
                return Err(e);
            }
        };

        self.enter(RebuildPhase::Writing);
        let staged = self
            .write_staged(handle, &entries, &plan, &img_target, dir_target.as_deref())
            .and_then(|staged| {
                if self.verifies() {
                    verify_staged(&staged, &plan)?;
                }
                self.check_cancelled()?;
                Ok(staged)
            });
        let staged = match staged {
            Ok(staged) => staged,
            Err(e) => {
                self.enter(RebuildPhase::Failed);
                warn!("Rebuild of {:?} failed while writing: {}", handle.img_path(), e);
                self.enter(RebuildPhase::Cleanup);
                return Err(e);
            }
        };
        let bytes_written = staged.bytes_written;

        self.enter(RebuildPhase::Swapping);
        handle.release_source();
        if let Err(e) = swap(staged) {
            self.enter(RebuildPhase::Failed);
            if e.original_untouched() {
                self.enter(RebuildPhase::Cleanup);
            }
            return Err(e);
        }

        for (entry, extent) in entries.iter_mut().zip(&plan.entry_layout) {
            entry.settle(extent.offset_sectors, extent.size_sectors);
        }
        let entries_written = entries.len();
        handle.table_mut().commit(entries);
        handle.settle_on_disk(img_target, dir_target);
        self.enter(RebuildPhase::Done);

        let report = RebuildReport {
            mode: self.mode,
            version,
            entries_written,
            skipped,
            renamed,
            bytes_written,
            layout_before,
            layout_after: plan.stats(),
            size_before,
            size_after: handle.disk_size(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "Rebuilt {:?}: {} entries, {} skipped, {} bytes saved",
            handle.img_path(),
            report.entries_written,
            report.skipped.len(),
            report.size_saved()
        );
        Ok(report)
    }

    fn targets(&self, handle: &ArchiveHandle) -> (PathBuf, Option<PathBuf>) {
        match (&self.output, handle.version()) {
            (None, _) => (
                handle.img_path().to_path_buf(),
                handle.dir_path().map(Path::to_path_buf),
            ),
            (Some(out), Version::V2) => (out.clone(), None),
            (Some(out), Version::V1) if has_extension(out, "dir") => {
                (companion_path(out, "img"), Some(out.clone()))
            }
            (Some(out), Version::V1) => (out.clone(), Some(companion_path(out, "dir"))),
        }
    }

    /// Split the snapshot into resolvable entries and skipped ones
    fn resolve(
        &self,
        handle: &ArchiveHandle,
        snapshot: Vec<ArchiveEntry>,
    ) -> Result<(Vec<ArchiveEntry>, Vec<SkippedEntry>)> {
        let mut kept = Vec::with_capacity(snapshot.len());
        let mut skipped = Vec::new();

        for entry in snapshot {
            match handle.probe_entry(&entry) {
                Ok(()) => kept.push(entry),
                Err(reason) => match self.mode {
                    RebuildMode::Fast => {
                        return Err(ImgError::UnresolvableEntry {
                            name: entry.name,
                            reason,
                        });
                    }
                    RebuildMode::Safe => {
                        warn!("Skipping unresolvable entry {}: {}", entry.name, reason);
                        skipped.push(SkippedEntry {
                            name: entry.name,
                            reason,
                        });
                    }
                },
            }
        }

        Ok((kept, skipped))
    }

    fn write_staged(
        &self,
        handle: &ArchiveHandle,
        entries: &[ArchiveEntry],
        plan: &RebuildPlan,
        img_target: &Path,
        dir_target: Option<&Path>,
    ) -> Result<StagedArchive> {
        let records: Vec<RawDirRecord> = entries
            .iter()
            .zip(&plan.entry_layout)
            .map(|(e, x)| RawDirRecord::new(&e.name, x.offset_sectors, x.size_sectors))
            .collect();
        let directory = write_directory(&records, plan.version);

        let dir = match dir_target {
            Some(target) => {
                let mut dir = StagedFile::create(target)?;
                dir.write_all(&directory)?;
                Some(dir)
            }
            None => None,
        };

        let mut img = StagedFile::create(img_target)?;
        if plan.version == Version::V2 {
            img.write_all(&directory)?;
            img.pad_to(plan.directory_region_bytes())?;
        }

        let mut checksums = Vec::with_capacity(entries.len());
        let mut bytes_written = 0u64;

        for (entry, extent) in entries.iter().zip(&plan.entry_layout) {
            self.check_cancelled()?;

            let payload = handle.read_entry_payload(entry)?;
            img.pad_to(extent.offset_sectors as u64 * crate::codec::SECTOR_SIZE as u64)?;
            img.write_all(&payload)?;
            img.pad_to_sector()?;

            checksums.push((payload.len(), crc32fast::hash(&payload)));
            bytes_written += payload.len() as u64;
        }
        img.pad_to(plan.data_file_bytes())?;

        let mut staged = StagedArchive {
            img,
            dir,
            records,
            checksums,
            bytes_written,
        };
        if let Some(dir) = staged.dir.as_mut() {
            dir.finish()?;
        }
        staged.img.finish()?;
        Ok(staged)
    }
}

/// Re-read the staged files and compare them with what was written
fn verify_staged(staged: &StagedArchive, plan: &RebuildPlan) -> Result<()> {
    let directory_file = staged.dir.as_ref().unwrap_or(&staged.img).staging_path();

    let mut directory = Vec::new();
    File::open(directory_file)?
        .take(plan.directory_region_bytes())
        .read_to_end(&mut directory)?;

    let records = parse_directory(&directory, plan.version, ReadMode::Strict)?;
    if records != staged.records {
        return Err(verification_failed("directory does not match the plan".to_string()));
    }

    let mut data = ImgFile::open(staged.img.staging_path())?;
    let expected = plan.entry_layout.iter().zip(&staged.checksums);
    for (record, (extent, (len, crc))) in records.iter().zip(expected) {
        let payload = data.read_extent(extent.offset_sectors, extent.size_sectors)?;
        if payload.get(..*len).map(crc32fast::hash) != Some(*crc) {
            return Err(verification_failed(format!(
                "checksum mismatch for {}",
                record.name_str()
            )));
        }
    }

    debug!("Verified {} staged entries", records.len());
    Ok(())
}

fn verification_failed(reason: String) -> ImgError {
    ImgError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("staged archive failed verification: {}", reason),
    ))
}

/// Rename the staged files over their targets
///
/// V1 renames the directory first. If the data file rename then fails, its
/// staged copy is kept for manual repair.
fn swap(staged: StagedArchive) -> Result<()> {
    let StagedArchive { mut img, dir, .. } = staged;

    let Some(dir) = dir else {
        img.commit()?;
        return Ok(());
    };

    let renamed = dir.commit()?;

    img.keep_on_failure();
    let pending = img.target().to_path_buf();
    let staging = img.staging_path().to_path_buf();

    if let Err(e) = img.commit() {
        let source = match e {
            ImgError::Io(source) => source,
            other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
        };
        error!(
            "Partial swap: {:?} was replaced but {:?} was not ({}); new data is at {:?}",
            renamed, pending, source, staging
        );
        return Err(ImgError::PartialSwap {
            renamed,
            pending,
            source,
        });
    }

    Ok(())
}

/// Archive handle shared between threads
pub type SharedArchive = Arc<Mutex<ArchiveHandle>>;

/// Wrap a handle for use with [`spawn_rebuild`]
pub fn share(handle: ArchiveHandle) -> SharedArchive {
    Arc::new(Mutex::new(handle))
}

/// Rebuild on a worker thread
///
/// The handle stays locked for the whole rebuild, so other threads block on
/// it instead of mutating the table mid-write.
pub fn spawn_rebuild(
    archive: SharedArchive,
    engine: RebuildEngine,
) -> Result<JoinHandle<Result<RebuildReport>>> {
    let worker = std::thread::Builder::new()
        .name("img-rebuild".to_string())
        .spawn(move || {
            let mut handle = archive.lock();
            engine.rebuild(&mut handle)
        })?;
    Ok(worker)
}
