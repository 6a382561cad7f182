//! IMG archive engine
//!
//! Reads, edits and rebuilds the container archives used by GTA III era
//! games.
//!
//! - [`codec`] - on-disk directory formats and version detection
//! - [`entry`] / [`table`] - entries and the ordered, name-unique table
//! - [`archive`] - an open archive: table plus the files behind it
//! - [`allocator`] - sector layout for rebuilds, layout statistics
//! - [`rebuild`] - crash-safe rebuild with staged files and renames
//! - [`batch`] - rebuilding many archives, with backups
//! - [`session`] - a workspace of open archives
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ Workspace (session ids -> ArchiveHandle)   │
//! ├────────────────────────────────────────────┤
//! │ ArchiveHandle                              │
//! │  - EntryTable (order + name index)         │
//! │  - lazily opened .img data file            │
//! ├────────────────────────────────────────────┤
//! │ RebuildEngine                              │
//! │  - snapshot -> LayoutPlanner -> RebuildPlan│
//! │  - StagedFile writes, fsync, rename        │
//! ├────────────────────────────────────────────┤
//! │ codec: V1 .dir/.img pair | V2 VER2 .img    │
//! └────────────────────────────────────────────┘
//! ```

pub mod allocator;
pub mod archive;
#[cfg(feature = "async")]
pub mod async_ops;
pub mod batch;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod io;
pub mod pattern;
pub mod rebuild;
pub mod session;
pub mod table;
pub mod validation;

// Re-export commonly used types
pub use allocator::{Extent, LayoutPlanner, LayoutStats, RebuildPlan};
pub use archive::ArchiveHandle;
pub use batch::{find_archives, rebuild_all, BatchOptions, BatchReport, FileOutcome};
pub use codec::{detect_version, ReadMode, Version, SECTOR_SIZE};
pub use config::EngineConfig;
pub use entry::{ArchiveEntry, EntryStatus, PayloadSource};
pub use error::{ImgError, Result};
pub use rebuild::{
    share, spawn_rebuild, CancelToken, RebuildEngine, RebuildMode, RebuildPhase, RebuildReport,
    SharedArchive, SkippedEntry,
};
pub use session::{SessionId, Workspace};
pub use table::{EntryTable, TableMutation};
