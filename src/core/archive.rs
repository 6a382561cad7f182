//! Archive handle
//!
//! Ties an [`EntryTable`] to the files it was read from. Opening parses the
//! directory and leaves every payload on disk; mutations only touch the
//! table. The data file is opened lazily on the first payload read and kept
//! open until a rebuild swaps new files into place.

use crate::allocator::{Extent, LayoutStats};
use crate::codec::{
    locate, parse_directory, Version, ReadMode, RECORD_SIZE, SECTOR_SIZE, V2_HEADER_SIZE,
    V2_MAGIC,
};
use crate::entry::{ArchiveEntry, EntryStatus, PayloadSource};
use crate::error::{ImgError, Result};
use crate::io::ImgFile;
use crate::pattern::NamePattern;
use crate::table::{EntryTable, TableMutation};
use crate::validation::{companion_path, has_extension};
use parking_lot::Mutex;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An open IMG archive
pub struct ArchiveHandle {
    version: Version,
    img_path: PathBuf,
    dir_path: Option<PathBuf>,
    table: EntryTable,
    read_mode: ReadMode,
    source: Mutex<Option<ImgFile>>,
    on_disk: bool,
}

impl ArchiveHandle {
    /// Open an existing archive with the default (lenient) read mode
    ///
    /// `path` may be the `.img` of either version or the `.dir` of a V1 pair.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ReadMode::default())
    }

    /// Open an existing archive
    ///
    /// # Errors
    ///
    /// - `UnknownFormat` if the path is not an IMG archive
    /// - `Truncated` / `Malformed` if the directory cannot be parsed
    /// - `Io` on any read failure
    pub fn open_with<P: AsRef<Path>>(path: P, read_mode: ReadMode) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening IMG archive at {:?}", path);

        let location = locate(path)?;
        let directory = match location.version {
            Version::V1 => std::fs::read(location.directory_path())?,
            Version::V2 => read_v2_directory(&location.img_path)?,
        };

        let records = parse_directory(&directory, location.version, read_mode)?;
        let entries: Vec<ArchiveEntry> = records.iter().map(ArchiveEntry::from_record).collect();

        info!(
            "Opened {} archive {:?} with {} entries",
            location.version,
            location.img_path,
            entries.len()
        );

        Ok(ArchiveHandle {
            version: location.version,
            img_path: location.img_path,
            dir_path: location.dir_path,
            table: EntryTable::from_entries(entries),
            read_mode,
            source: Mutex::new(None),
            on_disk: true,
        })
    }

    /// Start a new, empty archive
    ///
    /// Nothing is written until the first rebuild. For V1 the `.dir`
    /// companion is derived from `path` (either half of the pair may be
    /// given).
    pub fn create<P: AsRef<Path>>(path: P, version: Version) -> Result<Self> {
        let path = path.as_ref();
        info!("Creating {} archive at {:?}", version, path);

        let (img_path, dir_path) = match version {
            Version::V1 if has_extension(path, "dir") => {
                (companion_path(path, "img"), Some(path.to_path_buf()))
            }
            Version::V1 => (path.to_path_buf(), Some(companion_path(path, "dir"))),
            Version::V2 => (path.to_path_buf(), None),
        };

        if img_path.exists() {
            warn!("{:?} already exists and will be replaced on rebuild", img_path);
        }

        Ok(ArchiveHandle {
            version,
            img_path,
            dir_path,
            table: EntryTable::new(),
            read_mode: ReadMode::default(),
            source: Mutex::new(None),
            on_disk: false,
        })
    }

    /// Archive layout version
    pub fn version(&self) -> Version {
        self.version
    }

    /// The `.img` file (payloads live here for both versions)
    pub fn img_path(&self) -> &Path {
        &self.img_path
    }

    /// The `.dir` companion of a V1 pair
    pub fn dir_path(&self) -> Option<&Path> {
        self.dir_path.as_deref()
    }

    /// Read mode the directory was parsed with
    pub fn read_mode(&self) -> ReadMode {
        self.read_mode
    }

    /// True once the archive exists on disk (after open or a first rebuild)
    pub fn is_on_disk(&self) -> bool {
        self.on_disk
    }

    /// The entry table
    pub fn table(&self) -> &EntryTable {
        &self.table
    }

    pub(crate) fn table_mut(&mut self) -> &mut EntryTable {
        &mut self.table
    }

    /// True if the table differs from what is on disk
    pub fn is_modified(&self) -> bool {
        !self.on_disk || self.table.is_modified()
    }

    /// Non-deleted entries in directory order
    pub fn list_entries(&self) -> impl Iterator<Item = &ArchiveEntry> + '_ {
        self.table.list_active()
    }

    /// Case-insensitive lookup among non-deleted entries
    pub fn find_entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.table.find_by_name(name)
    }

    /// Non-deleted entries matching a wildcard pattern (`*.dff`, `cop??.txd`)
    pub fn select(&self, pattern: &str) -> Result<Vec<&ArchiveEntry>> {
        let pattern = NamePattern::new(pattern)?;
        Ok(self.table.select(&pattern))
    }

    /// Non-deleted entries with the given extension
    pub fn entries_by_extension(&self, ext: &str) -> Vec<&ArchiveEntry> {
        self.table.by_extension(ext)
    }

    /// Apply a table mutation
    pub fn apply(&mut self, mutation: TableMutation) -> Result<()> {
        self.table.apply(mutation)
    }

    /// Add a new entry (`DuplicateName` if the name is taken)
    pub fn add_entry(&mut self, name: impl Into<String>, payload: Vec<u8>) -> Result<()> {
        self.table.add(name, payload)
    }

    /// Replace an entry's payload (`NotFound` if there is no such entry)
    pub fn replace_entry(&mut self, name: impl Into<String>, payload: Vec<u8>) -> Result<()> {
        self.table.replace(name, payload)
    }

    /// Mark an entry for removal on the next rebuild
    pub fn remove_entry(&mut self, name: impl Into<String>) -> Result<()> {
        self.table.remove(name)
    }

    /// Payload of a named entry
    pub fn read_entry(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .table
            .find_by_name(name)
            .ok_or_else(|| ImgError::NotFound(name.to_string()))?;
        self.read_entry_payload(entry)
    }

    /// Payload of an entry, trimmed to its logical size
    pub fn read_entry_payload(&self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        match &entry.source {
            PayloadSource::Resident(data) => Ok(data.to_vec()),
            PayloadSource::OnDisk {
                offset_sectors,
                size_sectors,
            } => {
                let mut data =
                    self.with_source(|file| file.read_extent(*offset_sectors, *size_sectors))?;
                let logical = usize::try_from(entry.logical_size).unwrap_or(usize::MAX);
                data.truncate(logical);
                Ok(data)
            }
        }
    }

    /// Check that an entry's payload can be fetched, without reading it
    ///
    /// On-disk payloads are resolvable when the data file opens and the
    /// extent lies inside it. The error is a human-readable reason.
    pub(crate) fn probe_entry(&self, entry: &ArchiveEntry) -> std::result::Result<(), String> {
        let (offset_sectors, size_sectors) = match entry.source {
            PayloadSource::Resident(_) => return Ok(()),
            PayloadSource::OnDisk {
                offset_sectors,
                size_sectors,
            } => (offset_sectors, size_sectors),
        };

        if size_sectors == 0 {
            return Ok(());
        }

        let fits = self.with_source(|file| {
            Ok((
                file.contains_extent(offset_sectors, size_sectors),
                file.len(),
            ))
        });

        match fits {
            Ok((true, _)) => Ok(()),
            Ok((false, len)) => Err(format!(
                "sectors {}..{} lie beyond the end of the data file ({} bytes)",
                offset_sectors,
                offset_sectors as u64 + size_sectors as u64,
                len
            )),
            Err(e) => Err(format!("data file unavailable: {}", e)),
        }
    }

    fn with_source<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ImgFile) -> Result<T>,
    {
        let mut source = self.source.lock();
        if source.is_none() {
            debug!("Opening data file {:?}", self.img_path);
            *source = Some(ImgFile::open(&self.img_path)?);
        }
        match source.as_mut() {
            Some(file) => f(file),
            None => Err(ImgError::NotFound(self.img_path.display().to_string())),
        }
    }

    /// Close the data file; the next payload read reopens it
    pub fn release_source(&self) {
        if self.source.lock().take().is_some() {
            debug!("Released data file {:?}", self.img_path);
        }
    }

    /// Layout statistics of the archive as it is on disk
    ///
    /// Entries that were never written are left out; `Modified` and
    /// `Deleted` entries still occupy their old sectors.
    pub fn layout_stats(&self) -> LayoutStats {
        let written: Vec<Extent> = self
            .table
            .all()
            .iter()
            .filter(|e| e.status != EntryStatus::New)
            .map(|e| Extent::new(e.offset_sectors, e.size_sectors))
            .collect();

        let data_start = match self.version {
            Version::V1 => 0,
            Version::V2 => {
                let bytes = V2_HEADER_SIZE + written.len() * RECORD_SIZE;
                u32::try_from(bytes.div_ceil(SECTOR_SIZE)).unwrap_or(u32::MAX)
            }
        };

        LayoutStats::analyze(&written, data_start)
    }

    /// Bytes currently used on disk by the archive's files
    pub fn disk_size(&self) -> u64 {
        let size_of = |p: &Path| std::fs::metadata(p).map(|m| m.len()).unwrap_or(0);
        size_of(&self.img_path) + self.dir_path.as_deref().map(size_of).unwrap_or(0)
    }

    /// Point the handle at freshly written files
    pub(crate) fn settle_on_disk(&mut self, img_path: PathBuf, dir_path: Option<PathBuf>) {
        self.release_source();
        self.img_path = img_path;
        self.dir_path = dir_path;
        self.on_disk = true;
    }
}

impl std::fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("version", &self.version)
            .field("img_path", &self.img_path)
            .field("dir_path", &self.dir_path)
            .field("entries", &self.table.active_len())
            .field("modified", &self.is_modified())
            .finish()
    }
}

/// Read the header and records at the start of a V2 `.img`
///
/// A file that does not start with the `VER2` signature is not a V2 archive.
fn read_v2_directory(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;

    let mut header = Vec::with_capacity(V2_HEADER_SIZE);
    (&mut file).take(V2_HEADER_SIZE as u64).read_to_end(&mut header)?;

    if header.len() < V2_MAGIC.len() || header[..V2_MAGIC.len()] != V2_MAGIC {
        return Err(ImgError::UnknownFormat(path.to_path_buf()));
    }
    if header.len() < V2_HEADER_SIZE {
        return Err(ImgError::Truncated {
            expected: V2_HEADER_SIZE,
            found: header.len(),
        });
    }

    let count = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
    let records_len = count * RECORD_SIZE as u64;

    let mut directory = header;
    (&mut file).take(records_len).read_to_end(&mut directory)?;
    Ok(directory)
}
