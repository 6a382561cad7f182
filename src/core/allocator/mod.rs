//! Layout planning
//!
//! Places entries into 2048-byte sectors for a rebuild. Placement is
//! order-preserving and contiguous: entry `i + 1` starts where entry `i`
//! ends. The planner never reorders entries.
//!
//! ```text
//! V2:  [VER2|count|records...|pad][entry 0][entry 1]...
//!      ^ sector 0               ^ data_start_sector
//!
//! V1:  .dir  [records...]
//!      .img  [entry 0][entry 1]...
//!            ^ sector 0
//! ```

pub mod extent;

pub use extent::{Extent, LayoutStats};

use crate::codec::{Version, RECORD_SIZE, SECTOR_SIZE};
use crate::entry::ArchiveEntry;
use crate::error::{ImgError, Result};
use tracing::debug;

/// Layout of a rebuilt archive
///
/// `entry_layout[i]` belongs to the `i`-th non-deleted entry of the slice
/// the plan was made from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildPlan {
    pub version: Version,

    /// Bytes before the first record (V2 signature and count)
    pub header_size_bytes: usize,

    /// Bytes taken by the records alone
    pub directory_size_bytes: usize,

    /// First sector of the data region (0 for V1)
    pub data_start_sector: u32,

    /// Placement of each entry, in table order
    pub entry_layout: Vec<Extent>,

    /// Sectors the data file occupies, including the V2 directory region
    pub total_sectors: u64,
}

impl RebuildPlan {
    /// Number of entries placed
    pub fn len(&self) -> usize {
        self.entry_layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_layout.is_empty()
    }

    /// Bytes of the directory region as written, padding included
    pub fn directory_region_bytes(&self) -> u64 {
        match self.version {
            Version::V1 => (self.header_size_bytes + self.directory_size_bytes) as u64,
            Version::V2 => self.data_start_sector as u64 * SECTOR_SIZE as u64,
        }
    }

    /// Final size of the data file in bytes
    pub fn data_file_bytes(&self) -> u64 {
        self.total_sectors * SECTOR_SIZE as u64
    }

    /// Layout statistics of the planned archive
    pub fn stats(&self) -> LayoutStats {
        LayoutStats::analyze(&self.entry_layout, self.data_start_sector)
    }
}

/// Deterministic sector allocator
pub struct LayoutPlanner;

impl LayoutPlanner {
    /// Plan the layout of `entries` for `version`
    ///
    /// `Deleted` entries are skipped. Zero-length entries get a record with
    /// zero sectors at the current cursor.
    ///
    /// # Errors
    ///
    /// `LayoutOverflow` if an offset or size no longer fits in a u32.
    pub fn plan(entries: &[ArchiveEntry], version: Version) -> Result<RebuildPlan> {
        let placed: Vec<&ArchiveEntry> = entries.iter().filter(|e| !e.is_deleted()).collect();

        let header_size_bytes = version.header_size();
        let directory_size_bytes = placed.len() * RECORD_SIZE;

        let data_start_sector = match version {
            Version::V1 => 0,
            Version::V2 => {
                let sectors = (header_size_bytes + directory_size_bytes).div_ceil(SECTOR_SIZE);
                u32::try_from(sectors).map_err(|_| {
                    ImgError::LayoutOverflow(format!(
                        "directory of {} entries does not fit in 32-bit sectors",
                        placed.len()
                    ))
                })?
            }
        };

        let mut cursor = data_start_sector as u64;
        let mut entry_layout = Vec::with_capacity(placed.len());

        for entry in placed {
            let size = entry.allocated_sectors();
            let offset_sectors = u32::try_from(cursor).map_err(|_| {
                ImgError::LayoutOverflow(format!("offset of {} exceeds 32-bit sectors", entry.name))
            })?;
            let size_sectors = u32::try_from(size).map_err(|_| {
                ImgError::LayoutOverflow(format!("size of {} exceeds 32-bit sectors", entry.name))
            })?;

            debug!(
                "Placing {} at sector {} ({} sectors)",
                entry.name, offset_sectors, size_sectors
            );
            entry_layout.push(Extent::new(offset_sectors, size_sectors));
            cursor += size;
        }

        if cursor > u32::MAX as u64 {
            return Err(ImgError::LayoutOverflow(format!(
                "archive needs {} sectors",
                cursor
            )));
        }

        Ok(RebuildPlan {
            version,
            header_size_bytes,
            directory_size_bytes,
            data_start_sector,
            entry_layout,
            total_sectors: cursor,
        })
    }
}
