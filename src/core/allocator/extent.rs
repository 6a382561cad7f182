//! Sector extents and layout statistics
//!
//! An extent is a contiguous run of sectors in the data file. Layout
//! statistics describe how a set of extents uses the file: gaps between
//! entries, overlaps, and the share of the file that is wasted.

use serde::{Deserialize, Serialize};

/// A contiguous range of sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// First sector
    pub offset_sectors: u32,
    /// Number of sectors
    pub size_sectors: u32,
}

impl Extent {
    pub fn new(offset_sectors: u32, size_sectors: u32) -> Self {
        Extent {
            offset_sectors,
            size_sectors,
        }
    }

    /// One past the last sector
    pub fn end(&self) -> u64 {
        self.offset_sectors as u64 + self.size_sectors as u64
    }

    /// Check if this extent shares a sector with another
    pub fn overlaps(&self, other: &Extent) -> bool {
        if self.size_sectors == 0 || other.size_sectors == 0 {
            return false;
        }
        (self.offset_sectors as u64) < other.end() && (other.offset_sectors as u64) < self.end()
    }

    /// Check if `other` starts exactly where this extent ends
    pub fn is_followed_by(&self, other: &Extent) -> bool {
        self.end() == other.offset_sectors as u64
    }
}

/// How a set of extents occupies the data file
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LayoutStats {
    /// Number of extents examined
    pub entries: usize,
    /// Sectors covered by entries
    pub used_sectors: u64,
    /// First sector after the last entry
    pub end_sector: u64,
    /// Runs of unused sectors between entries
    pub gaps: usize,
    /// Unused sectors between entries
    pub gap_sectors: u64,
    /// Pairs of entries sharing sectors
    pub overlaps: usize,
}

impl LayoutStats {
    /// Examine extents, starting from `data_start_sector`
    ///
    /// Sectors before `data_start_sector` (the V2 directory region) are not
    /// counted as a gap.
    pub fn analyze(extents: &[Extent], data_start_sector: u32) -> Self {
        let mut sorted: Vec<Extent> = extents.to_vec();
        sorted.sort_by_key(|e| (e.offset_sectors, e.size_sectors));

        let mut stats = LayoutStats {
            entries: sorted.len(),
            ..Default::default()
        };

        let mut cursor = data_start_sector as u64;
        for extent in &sorted {
            stats.used_sectors += extent.size_sectors as u64;
            if extent.size_sectors == 0 {
                continue;
            }

            let start = extent.offset_sectors as u64;
            if start > cursor {
                stats.gaps += 1;
                stats.gap_sectors += start - cursor;
            } else if start < cursor {
                stats.overlaps += 1;
            }
            cursor = cursor.max(extent.end());
        }

        stats.end_sector = cursor;
        stats
    }

    /// Share of the data region lost to gaps, in percent
    pub fn fragmentation_percent(&self) -> f64 {
        let total = self.used_sectors + self.gap_sectors;
        if total == 0 {
            return 0.0;
        }
        self.gap_sectors as f64 / total as f64 * 100.0
    }

    /// Data region size in bytes, as the file would need
    pub fn end_bytes(&self) -> u64 {
        self.end_sector * crate::codec::SECTOR_SIZE as u64
    }
}
