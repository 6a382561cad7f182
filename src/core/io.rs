//! Disk I/O for IMG archives
//!
//! [`ImgFile`] reads payloads from an existing data file. [`StagedFile`]
//! writes a replacement next to its target and swaps it into place with a
//! write-fsync-rename sequence. A staged file that is dropped before it is
//! committed removes itself.

use crate::codec::{read_payload, SECTOR_SIZE};
use crate::error::{ImgError, Result};
use crate::validation::staging_path;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Read-only handle on an archive's `.img` data file
pub struct ImgFile {
    reader: BufReader<File>,
    path: PathBuf,
    len: u64,
}

impl ImgFile {
    /// Open an existing data file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let len = file.metadata()?.len();

        Ok(ImgFile {
            reader: BufReader::new(file),
            path: path.as_ref().to_path_buf(),
            len,
        })
    }

    /// Read whole sectors of payload
    ///
    /// Extents reaching past the end of the file are `UnexpectedEof`.
    pub fn read_extent(&mut self, offset_sectors: u32, size_sectors: u32) -> Result<Vec<u8>> {
        if !self.contains_extent(offset_sectors, size_sectors) {
            return Err(ImgError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "extent {}+{} sectors lies past the end of {:?} ({} bytes)",
                    offset_sectors, size_sectors, self.path, self.len
                ),
            )));
        }
        read_payload(&mut self.reader, offset_sectors, size_sectors)
    }

    /// True if the extent lies completely inside the file
    pub fn contains_extent(&self, offset_sectors: u32, size_sectors: u32) -> bool {
        let end = (offset_sectors as u64 + size_sectors as u64) * SECTOR_SIZE as u64;
        end <= self.len
    }

    /// File length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replacement file being written next to its target
pub struct StagedFile {
    writer: Option<BufWriter<File>>,
    staging: PathBuf,
    target: PathBuf,
    written: u64,
    committed: bool,
    keep_on_failure: bool,
}

impl StagedFile {
    /// Create `<target>.tmp`, truncating any leftover from an earlier run
    pub fn create<P: AsRef<Path>>(target: P) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        let staging = staging_path(&target);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&staging)?;

        debug!("Staging {:?} for {:?}", staging, target);

        Ok(StagedFile {
            writer: Some(BufWriter::new(file)),
            staging,
            target,
            written: 0,
            committed: false,
            keep_on_failure: false,
        })
    }

    fn writer(&mut self) -> std::io::Result<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "staged file already finished")
        })
    }

    /// Append bytes
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.writer()?.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Zero-fill up to the next sector boundary
    pub fn pad_to_sector(&mut self) -> Result<()> {
        let rem = (self.written % SECTOR_SIZE as u64) as usize;
        if rem != 0 {
            let padding = vec![0u8; SECTOR_SIZE - rem];
            self.write_all(&padding)?;
        }
        Ok(())
    }

    /// Zero-fill up to an absolute byte position
    pub fn pad_to(&mut self, position: u64) -> Result<()> {
        if position > self.written {
            let padding = vec![0u8; (position - self.written) as usize];
            self.write_all(&padding)?;
        }
        Ok(())
    }

    /// Bytes written so far
    pub fn position(&self) -> u64 {
        self.written
    }

    /// Flush and fsync; the file stays staged until [`StagedFile::commit`]
    pub fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Leave the staged file on disk if the final rename fails
    pub fn keep_on_failure(&mut self) {
        self.keep_on_failure = true;
    }

    /// Rename the staged file over its target
    pub fn commit(mut self) -> Result<PathBuf> {
        self.finish()?;
        if let Err(e) = std::fs::rename(&self.staging, &self.target) {
            if self.keep_on_failure {
                self.committed = true;
                warn!("Keeping staged file {:?} after failed rename", self.staging);
            }
            return Err(e.into());
        }
        self.committed = true;
        debug!("Committed {:?}", self.target);
        Ok(self.target.clone())
    }

    /// Staged path (`<target>.tmp`)
    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// Path this file will replace
    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Close before unlinking (required on Windows)
        self.writer.take();
        if let Err(e) = std::fs::remove_file(&self.staging) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staged file {:?}: {}", self.staging, e);
            }
        } else {
            debug!("Discarded staged file {:?}", self.staging);
        }
    }
}
