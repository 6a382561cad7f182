//! # IMG Factory - GTA IMG archive engine
//!
//! `img-factory-rs` reads, edits and rebuilds the IMG container archives of
//! GTA III, Vice City and San Andreas:
//!
//! - **V1** archives: a `.dir` directory next to a `.img` data file
//! - **V2** archives: a single `.img` starting with a `VER2` header
//! - **Deferred edits**: add, replace and remove only touch memory
//! - **Crash-safe rebuilds**: staged `.tmp` files, fsync, then rename
//! - **Batch rebuilds** with backups and per-file outcomes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use img_factory_rs::{RebuildMode, Result};
//!
//! # fn main() -> Result<()> {
//! let mut archive = img_factory_rs::open("models/gta3.img")?;
//!
//! for entry in img_factory_rs::list_entries(&archive) {
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//!
//! let model = img_factory_rs::read_entry(&archive, "infernus.dff")?;
//! img_factory_rs::replace_entry(&mut archive, "infernus.dff", model)?;
//! img_factory_rs::remove_entry(&mut archive, "unused.txd")?;
//!
//! // Nothing is written until the rebuild
//! let report = img_factory_rs::rebuild(&mut archive, RebuildMode::Safe)?;
//! println!("{} entries written", report.entries_written);
//! # Ok(())
//! # }
//! ```
//!
//! ## Creating Archives
//!
//! ```rust,no_run
//! use img_factory_rs::{ArchiveBuilder, Version};
//!
//! # fn main() -> img_factory_rs::Result<()> {
//! let archive = ArchiveBuilder::new()
//!     .path("mods/cars.img")
//!     .version(Version::V2)
//!     .entry("infernus.dff", std::fs::read("infernus.dff")?)
//!     .entry("infernus.txd", std::fs::read("infernus.txd")?)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// Engine implementation
pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use self::core::{
    allocator, archive, batch, codec, config, entry, error, io, rebuild, session, table,
};

// Helpers that are useful on their own
pub use crate::core::{pattern, validation};

#[cfg(feature = "async")]
pub use crate::core::async_ops;

// Re-export core types that users need
pub use crate::core::{
    allocator::{Extent, LayoutPlanner, LayoutStats, RebuildPlan},
    archive::ArchiveHandle,
    batch::{find_archives, BatchOptions, BatchReport, FileOutcome},
    codec::{detect_version, ReadMode, Version, SECTOR_SIZE},
    config::EngineConfig,
    entry::{ArchiveEntry, EntryStatus, PayloadSource},
    error::{ImgError, Result},
    rebuild::{
        share, spawn_rebuild, CancelToken, RebuildEngine, RebuildMode, RebuildPhase,
        RebuildReport, SharedArchive, SkippedEntry,
    },
    session::{SessionId, Workspace},
    table::{EntryTable, TableMutation},
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Summary of one entry, for listings
///
/// # Examples
///
/// ```rust,no_run
/// # fn main() -> img_factory_rs::Result<()> {
/// let archive = img_factory_rs::open("gta3.img")?;
///
/// for entry in img_factory_rs::list_entries(&archive) {
///     println!(
///         "{:<24} {:>8} sectors at {:>8} {:?}",
///         entry.name, entry.size_sectors, entry.offset_sectors, entry.status
///     );
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    /// Name as stored in the directory (e.g., "infernus.dff")
    pub name: String,

    /// Lower-cased extension without the dot (None if the name has none)
    pub extension: Option<String>,

    /// Offset in sectors (stale for modified entries until the next rebuild)
    pub offset_sectors: u32,

    /// Size in sectors as recorded in the directory
    pub size_sectors: u32,

    /// Payload size in bytes
    ///
    /// Sector-rounded for entries read from disk, exact for entries added
    /// or replaced in this session.
    pub size: u64,

    /// Lifecycle state
    pub status: EntryStatus,

    /// True if the payload is held in memory
    pub resident: bool,
}

impl From<&ArchiveEntry> for Entry {
    fn from(entry: &ArchiveEntry) -> Self {
        Entry {
            name: entry.name.clone(),
            extension: entry.extension(),
            offset_sectors: entry.offset_sectors,
            size_sectors: entry.size_sectors,
            size: entry.logical_size,
            status: entry.status,
            resident: entry.is_resident(),
        }
    }
}

/// Open an archive (`.img` of either version, or the `.dir` of a V1 pair)
pub fn open<P: AsRef<Path>>(path: P) -> Result<ArchiveHandle> {
    ArchiveHandle::open(path)
}

/// Non-deleted entries in directory order
pub fn list_entries(archive: &ArchiveHandle) -> Vec<Entry> {
    archive.list_entries().map(Entry::from).collect()
}

/// Payload of a named entry (case-insensitive)
pub fn read_entry(archive: &ArchiveHandle, name: &str) -> Result<Vec<u8>> {
    debug!("Reading entry {}", name);
    archive.read_entry(name)
}

/// Add a new entry; fails with `DuplicateName` if it exists
pub fn add_entry(archive: &mut ArchiveHandle, name: &str, data: Vec<u8>) -> Result<()> {
    archive.add_entry(name, data)
}

/// Replace the payload of an existing entry
pub fn replace_entry(archive: &mut ArchiveHandle, name: &str, data: Vec<u8>) -> Result<()> {
    archive.replace_entry(name, data)
}

/// Mark an entry for removal on the next rebuild
pub fn remove_entry(archive: &mut ArchiveHandle, name: &str) -> Result<()> {
    archive.remove_entry(name)
}

/// Write the archive back to disk
pub fn rebuild(archive: &mut ArchiveHandle, mode: RebuildMode) -> Result<RebuildReport> {
    RebuildEngine::new(mode).rebuild(archive)
}

/// Rebuild several archives; see [`batch::rebuild_all`](crate::core::batch::rebuild_all)
pub fn rebuild_all(paths: &[PathBuf], mode: RebuildMode, options: &BatchOptions) -> BatchReport {
    crate::core::batch::rebuild_all(paths, mode, options)
}

/// Builder for writing a new archive in one go
///
/// # Examples
///
/// ```rust,no_run
/// use img_factory_rs::{ArchiveBuilder, Version};
///
/// # fn main() -> img_factory_rs::Result<()> {
/// let archive = ArchiveBuilder::new()
///     .path("gta3.img")
///     .version(Version::V1) // also writes gta3.dir
///     .entry("a.dff", vec![0u8; 100])
///     .build()?;
/// assert!(!archive.is_modified());
/// # Ok(())
/// # }
/// ```
pub struct ArchiveBuilder {
    path: Option<PathBuf>,
    version: Version,
    entries: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    /// Create a builder for an empty V2 archive
    pub fn new() -> Self {
        ArchiveBuilder {
            path: None,
            version: Version::V2,
            entries: Vec::new(),
        }
    }

    /// Set the target path
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the layout version (default V2)
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Add an entry
    pub fn entry<S: Into<String>>(mut self, name: S, data: Vec<u8>) -> Self {
        self.entries.push((name.into(), data));
        self
    }

    /// Create the archive and write it to disk
    pub fn build(self) -> Result<ArchiveHandle> {
        let path = self.path.ok_or_else(|| {
            ImgError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path must be set",
            ))
        })?;

        info!(
            "Building {} archive at {:?} with {} entries",
            self.version,
            path,
            self.entries.len()
        );

        let mut archive = ArchiveHandle::create(&path, self.version)?;
        for (name, data) in self.entries {
            archive.add_entry(name, data)?;
        }
        RebuildEngine::new(RebuildMode::Fast).rebuild(&mut archive)?;
        Ok(archive)
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}
