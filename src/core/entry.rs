//! Archive entry structures

use crate::codec::{sectors_for, RawDirRecord, SECTOR_SIZE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle state of an entry relative to the archive on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Unchanged since the archive was opened or last rebuilt
    Original,
    /// Added since the last rebuild
    New,
    /// Payload replaced or name changed since the last rebuild
    Modified,
    /// Pending removal; excluded from the next rebuild
    Deleted,
}

/// Where an entry's bytes currently live
#[derive(Debug, Clone)]
pub enum PayloadSource {
    /// Held in memory (imported or replaced, not yet written)
    Resident(Arc<[u8]>),
    /// In the archive's data file
    OnDisk { offset_sectors: u32, size_sectors: u32 },
}

/// One named blob in an archive
///
/// `offset_sectors`/`size_sectors` mirror the directory record last read or
/// written. For `Modified` entries they are stale until the next rebuild;
/// for `New` entries they are zero.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Name as stored in the directory
    pub name: String,

    /// Directory offset in sectors
    pub offset_sectors: u32,

    /// Directory size in sectors
    pub size_sectors: u32,

    /// Payload length in bytes. Sector-rounded for entries read from disk,
    /// exact for resident payloads.
    pub logical_size: u64,

    /// Where to fetch the payload from
    pub source: PayloadSource,

    /// Lifecycle state
    pub status: EntryStatus,
}

impl ArchiveEntry {
    /// Entry backed by a directory record of an existing archive.
    pub fn from_record(record: &RawDirRecord) -> Self {
        ArchiveEntry {
            name: record.name_str(),
            offset_sectors: record.offset_sectors,
            size_sectors: record.size_sectors,
            logical_size: record.size_sectors as u64 * SECTOR_SIZE as u64,
            source: PayloadSource::OnDisk {
                offset_sectors: record.offset_sectors,
                size_sectors: record.size_sectors,
            },
            status: EntryStatus::Original,
        }
    }

    /// Entry whose payload exists only in memory.
    pub fn resident(name: impl Into<String>, payload: Vec<u8>) -> Self {
        ArchiveEntry {
            name: name.into(),
            offset_sectors: 0,
            size_sectors: 0,
            logical_size: payload.len() as u64,
            source: PayloadSource::Resident(Arc::from(payload)),
            status: EntryStatus::New,
        }
    }

    /// Swap in a new in-memory payload, keeping the directory fields as hints.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.logical_size = payload.len() as u64;
        self.source = PayloadSource::Resident(Arc::from(payload));
    }

    /// Sectors the payload needs, derived from the logical size.
    pub fn allocated_sectors(&self) -> u64 {
        sectors_for(self.logical_size)
    }

    /// True if the payload is held in memory.
    pub fn is_resident(&self) -> bool {
        matches!(self.source, PayloadSource::Resident(_))
    }

    /// True if the entry is excluded from the next rebuild.
    pub fn is_deleted(&self) -> bool {
        self.status == EntryStatus::Deleted
    }

    /// Lower-cased extension without the dot
    pub fn extension(&self) -> Option<String> {
        crate::validation::extension_of(&self.name)
    }

    /// Record the layout this entry received in a freshly written archive.
    pub(crate) fn settle(&mut self, offset_sectors: u32, size_sectors: u32) {
        self.offset_sectors = offset_sectors;
        self.size_sectors = size_sectors;
        self.source = PayloadSource::OnDisk {
            offset_sectors,
            size_sectors,
        };
        self.status = EntryStatus::Original;
    }
}
