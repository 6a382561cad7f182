//! Binary codec for IMG directories
//!
//! Two on-disk layouts exist:
//!
//! ```text
//! V1 (pair)    gta3.dir   count x [name: 24][offset: u32][size: u32]
//!              gta3.img   payloads only, entry i at offset[i] * 2048
//!
//! V2 (single)  gta3.img   "VER2" [count: u32]
//!                         count x [offset: u32][size: u32][name: 24]
//!                         zero padding to the next 2048-byte boundary
//!                         payloads
//! ```
//!
//! The record field order differs between the versions and must stay that
//! way. Offsets and sizes are in 2048-byte sectors, little-endian.

use crate::error::{ImgError, Result};
use crate::validation::{find_companion, has_extension, MAX_NAME_LEN};
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Allocation unit for offsets and sizes.
pub const SECTOR_SIZE: usize = 2048;

/// Width of the fixed name field in a directory record.
pub const NAME_FIELD_LEN: usize = 24;

/// Size of one directory record in both versions.
pub const RECORD_SIZE: usize = 32;

/// Signature at the start of a V2 archive.
pub const V2_MAGIC: [u8; 4] = *b"VER2";

/// Signature plus entry count.
pub const V2_HEADER_SIZE: usize = 8;

/// On-disk layout of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    /// Separate `.dir` directory and `.img` data file
    V1,
    /// Single `.img` with embedded header and directory
    V2,
}

impl Version {
    /// Bytes preceding the first directory record.
    pub fn header_size(self) -> usize {
        match self {
            Version::V1 => 0,
            Version::V2 => V2_HEADER_SIZE,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Version::V1 => write!(f, "V1 (DIR/IMG)"),
            Version::V2 => write!(f, "V2 (VER2)"),
        }
    }
}

/// How strictly directory names are checked while parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Unterminated name fields are `Malformed`
    Strict,
    /// Unterminated name fields are used as-is (all 24 bytes) with a warning
    #[default]
    Lenient,
}

/// Files making up one archive on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLocation {
    pub version: Version,
    /// The `.img` file; payloads always live here
    pub img_path: PathBuf,
    /// The `.dir` companion (V1 only)
    pub dir_path: Option<PathBuf>,
}

impl ArchiveLocation {
    /// File holding the directory.
    pub fn directory_path(&self) -> &Path {
        self.dir_path.as_deref().unwrap_or(&self.img_path)
    }
}

/// Work out which files make up the archive at `path` and its version
///
/// Detection goes by file pairing rather than magic bytes: a `.dir` next to
/// the `.img` (or an `.img` next to a given `.dir`) means V1, a lone `.img`
/// means V2. Anything else is `UnknownFormat`.
pub fn locate(path: &Path) -> Result<ArchiveLocation> {
    if has_extension(path, "dir") {
        let img = find_companion(path, "img")
            .ok_or_else(|| ImgError::UnknownFormat(path.to_path_buf()))?;
        return Ok(ArchiveLocation {
            version: Version::V1,
            img_path: img,
            dir_path: Some(path.to_path_buf()),
        });
    }

    if has_extension(path, "img") && path.is_file() {
        return Ok(match find_companion(path, "dir") {
            Some(dir) => ArchiveLocation {
                version: Version::V1,
                img_path: path.to_path_buf(),
                dir_path: Some(dir),
            },
            None => ArchiveLocation {
                version: Version::V2,
                img_path: path.to_path_buf(),
                dir_path: None,
            },
        });
    }

    Err(ImgError::UnknownFormat(path.to_path_buf()))
}

/// Detect the archive version of `path`.
pub fn detect_version(path: &Path) -> Result<Version> {
    locate(path).map(|loc| loc.version)
}

/// One directory record as stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDirRecord {
    pub name: [u8; NAME_FIELD_LEN],
    pub offset_sectors: u32,
    pub size_sectors: u32,
}

impl RawDirRecord {
    /// Build a record, NUL-padding the name (cut to 23 bytes so a terminator
    /// always remains).
    pub fn new(name: &str, offset_sectors: u32, size_sectors: u32) -> Self {
        RawDirRecord {
            name: encode_name(name),
            offset_sectors,
            size_sectors,
        }
    }

    /// Name up to the first NUL, with non-ASCII bytes replaced.
    pub fn name_str(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_FIELD_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// True if the name field contains a NUL terminator.
    pub fn is_terminated(&self) -> bool {
        self.name.contains(&0)
    }

    /// Serialize in the field order of `version`
    pub fn to_bytes(&self, version: Version) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        match version {
            Version::V1 => {
                bytes[0..24].copy_from_slice(&self.name);
                bytes[24..28].copy_from_slice(&self.offset_sectors.to_le_bytes());
                bytes[28..32].copy_from_slice(&self.size_sectors.to_le_bytes());
            }
            Version::V2 => {
                bytes[0..4].copy_from_slice(&self.offset_sectors.to_le_bytes());
                bytes[4..8].copy_from_slice(&self.size_sectors.to_le_bytes());
                bytes[8..32].copy_from_slice(&self.name);
            }
        }
        bytes
    }

    /// Deserialize from exactly one record in the field order of `version`
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE], version: Version) -> Self {
        let mut name = [0u8; NAME_FIELD_LEN];
        let (name_at, offset_at, size_at) = match version {
            Version::V1 => (0, 24, 28),
            Version::V2 => (8, 0, 4),
        };

        name.copy_from_slice(&bytes[name_at..name_at + NAME_FIELD_LEN]);

        RawDirRecord {
            name,
            offset_sectors: read_u32(bytes, offset_at),
            size_sectors: read_u32(bytes, size_at),
        }
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn encode_name(name: &str) -> [u8; NAME_FIELD_LEN] {
    let mut field = [0u8; NAME_FIELD_LEN];
    let bytes = name.as_bytes();
    let len = bytes.len().min(MAX_NAME_LEN);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

/// Number of records a V2 header announces, or `None` if `bytes` does not
/// start with a V2 header.
pub fn v2_entry_count(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < V2_HEADER_SIZE || bytes[0..4] != V2_MAGIC {
        return None;
    }
    Some(read_u32(bytes, 4))
}

/// Parse a directory
///
/// For V1 `bytes` is the whole `.dir` file. For V2 it is the start of the
/// `.img` file (at least the header and all records; anything after the last
/// record is ignored).
///
/// # Errors
///
/// - `Truncated` if fewer bytes remain than the records need (in lenient
///   mode a V1 directory drops a trailing partial record instead)
/// - `Malformed` if a V2 signature is missing, or (in strict mode) a name
///   field has no NUL terminator
pub fn parse_directory(bytes: &[u8], version: Version, mode: ReadMode) -> Result<Vec<RawDirRecord>> {
    let (count, body) = match version {
        Version::V1 => {
            let trailing = bytes.len() % RECORD_SIZE;
            match mode {
                ReadMode::Strict => (bytes.len().div_ceil(RECORD_SIZE), bytes),
                ReadMode::Lenient => {
                    if trailing != 0 {
                        warn!(
                            "Directory ends with a partial record, ignoring the last {} bytes",
                            trailing
                        );
                    }
                    (bytes.len() / RECORD_SIZE, bytes)
                }
            }
        }
        Version::V2 => {
            if bytes.len() < V2_HEADER_SIZE {
                return Err(ImgError::Truncated {
                    expected: V2_HEADER_SIZE,
                    found: bytes.len(),
                });
            }
            let count = v2_entry_count(bytes).ok_or_else(|| ImgError::Malformed {
                record: 0,
                reason: "missing VER2 signature".to_string(),
            })?;
            (count as usize, &bytes[V2_HEADER_SIZE..])
        }
    };

    let needed = count
        .checked_mul(RECORD_SIZE)
        .ok_or(ImgError::Truncated {
            expected: usize::MAX,
            found: body.len(),
        })?;
    if body.len() < needed {
        return Err(ImgError::Truncated {
            expected: needed + version.header_size(),
            found: bytes.len(),
        });
    }

    let mut records = Vec::with_capacity(count);
    for (index, chunk) in body[..needed].chunks_exact(RECORD_SIZE).enumerate() {
        let mut raw = [0u8; RECORD_SIZE];
        raw.copy_from_slice(chunk);
        let record = RawDirRecord::from_bytes(&raw, version);

        if !record.is_terminated() {
            match mode {
                ReadMode::Strict => {
                    return Err(ImgError::Malformed {
                        record: index,
                        reason: "name field has no NUL terminator".to_string(),
                    });
                }
                ReadMode::Lenient => {
                    warn!(
                        "Directory record {} has an unterminated name, using all {} bytes: {:?}",
                        index,
                        NAME_FIELD_LEN,
                        record.name_str()
                    );
                }
            }
        }

        records.push(record);
    }

    Ok(records)
}

/// Serialize a directory: the V2 header (if any) followed by one record per
/// entry. Padding to the data region is left to the writer.
pub fn write_directory(records: &[RawDirRecord], version: Version) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(version.header_size() + records.len() * RECORD_SIZE);

    if version == Version::V2 {
        bytes.extend_from_slice(&V2_MAGIC);
        bytes.extend_from_slice(&(records.len() as u32).to_le_bytes());
    }

    for record in records {
        bytes.extend_from_slice(&record.to_bytes(version));
    }

    bytes
}

/// Read `size_sectors` sectors starting at sector `offset_sectors`
///
/// The buffer grows with what is actually read, so a bogus size in a damaged
/// directory fails with `UnexpectedEof` instead of allocating up front.
pub fn read_payload<R: Read + Seek>(
    reader: &mut R,
    offset_sectors: u32,
    size_sectors: u32,
) -> Result<Vec<u8>> {
    let len = size_sectors as u64 * SECTOR_SIZE as u64;
    reader.seek(SeekFrom::Start(offset_sectors as u64 * SECTOR_SIZE as u64))?;

    let mut buffer = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut buffer)?;
    if (buffer.len() as u64) < len {
        return Err(ImgError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "payload at sector {} needs {} bytes, only {} available",
                offset_sectors,
                len,
                buffer.len()
            ),
        )));
    }
    Ok(buffer)
}

/// Sectors needed to hold `len` bytes.
pub fn sectors_for(len: u64) -> u64 {
    len.div_ceil(SECTOR_SIZE as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_record_field_order_differs() {
        let record = RawDirRecord::new("a.dff", 1, 2);

        let v1 = record.to_bytes(Version::V1);
        assert_eq!(&v1[0..5], b"a.dff");
        assert_eq!(&v1[24..28], &1u32.to_le_bytes());
        assert_eq!(&v1[28..32], &2u32.to_le_bytes());

        let v2 = record.to_bytes(Version::V2);
        assert_eq!(&v2[0..4], &1u32.to_le_bytes());
        assert_eq!(&v2[4..8], &2u32.to_le_bytes());
        assert_eq!(&v2[8..13], b"a.dff");
    }

    #[test]
    fn test_directory_round_trip_both_versions() {
        let records = vec![
            RawDirRecord::new("infernus.dff", 1, 10),
            RawDirRecord::new("infernus.txd", 11, 3),
            RawDirRecord::new("empty.col", 14, 0),
        ];

        for version in [Version::V1, Version::V2] {
            let bytes = write_directory(&records, version);
            assert_eq!(bytes.len(), version.header_size() + 3 * RECORD_SIZE);

            let parsed = parse_directory(&bytes, version, ReadMode::Strict).unwrap();
            assert_eq!(parsed, records);
        }
    }

    #[test]
    fn test_v2_header() {
        let bytes = write_directory(&[RawDirRecord::new("a.dff", 1, 1)], Version::V2);
        assert_eq!(&bytes[0..4], b"VER2");
        assert_eq!(v2_entry_count(&bytes), Some(1));
    }

    #[test]
    fn test_truncated_directories() {
        let records = vec![RawDirRecord::new("a.dff", 0, 1), RawDirRecord::new("b.dff", 1, 1)];

        let v1 = write_directory(&records, Version::V1);
        assert!(matches!(
            parse_directory(&v1[..40], Version::V1, ReadMode::Strict),
            Err(ImgError::Truncated { .. })
        ));
        // Lenient reads keep the whole records and drop the partial one
        let lenient = parse_directory(&v1[..40], Version::V1, ReadMode::Lenient).unwrap();
        assert_eq!(lenient, records[..1].to_vec());

        let v2 = write_directory(&records, Version::V2);
        assert!(matches!(
            parse_directory(&v2[..50], Version::V2, ReadMode::Strict),
            Err(ImgError::Truncated { .. })
        ));
        assert!(matches!(
            parse_directory(&v2[..4], Version::V2, ReadMode::Strict),
            Err(ImgError::Truncated { expected: 8, found: 4 })
        ));
    }

    #[test]
    fn test_missing_signature_is_malformed() {
        let bytes = [0u8; 64];
        assert!(matches!(
            parse_directory(&bytes, Version::V2, ReadMode::Lenient),
            Err(ImgError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unterminated_name_strict_vs_lenient() {
        let mut record = RawDirRecord::new("x", 0, 1);
        record.name = *b"abcdefghijklmnopqrstuvwx";
        let bytes = write_directory(&[record], Version::V1);

        assert!(matches!(
            parse_directory(&bytes, Version::V1, ReadMode::Strict),
            Err(ImgError::Malformed { record: 0, .. })
        ));

        let parsed = parse_directory(&bytes, Version::V1, ReadMode::Lenient).unwrap();
        assert_eq!(parsed[0].name_str(), "abcdefghijklmnopqrstuvwx");
    }

    #[test]
    fn test_long_names_keep_terminator() {
        let record = RawDirRecord::new("abcdefghijklmnopqrstuvwxyz.dff", 0, 0);
        assert!(record.is_terminated());
        assert_eq!(record.name_str().len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_read_payload() {
        let mut data = vec![0u8; SECTOR_SIZE * 3];
        data[SECTOR_SIZE..SECTOR_SIZE + 4].copy_from_slice(b"DFF!");
        let mut cursor = Cursor::new(data);

        let payload = read_payload(&mut cursor, 1, 1).unwrap();
        assert_eq!(payload.len(), SECTOR_SIZE);
        assert_eq!(&payload[..4], b"DFF!");

        assert!(matches!(read_payload(&mut cursor, 2, 2), Err(ImgError::Io(_))));

        // A directory claiming ~8 TB reads what exists and stops
        match read_payload(&mut cursor, 1, u32::MAX) {
            Err(ImgError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected UnexpectedEof, got {:?}", other.map(|p| p.len())),
        }
    }

    #[test]
    fn test_locate_pairs_and_singles() {
        let dir = tempfile::TempDir::new().unwrap();

        let single = dir.path().join("gta_int.img");
        std::fs::write(&single, b"VER2\0\0\0\0").unwrap();
        assert_eq!(detect_version(&single).unwrap(), Version::V2);

        let pair_img = dir.path().join("gta3.img");
        let pair_dir = dir.path().join("gta3.dir");
        std::fs::write(&pair_img, b"").unwrap();
        std::fs::write(&pair_dir, b"").unwrap();
        assert_eq!(detect_version(&pair_img).unwrap(), Version::V1);

        let loc = locate(&pair_dir).unwrap();
        assert_eq!(loc.img_path, pair_img);
        assert_eq!(loc.directory_path(), pair_dir.as_path());

        let orphan = dir.path().join("orphan.dir");
        std::fs::write(&orphan, b"").unwrap();
        assert!(matches!(locate(&orphan), Err(ImgError::UnknownFormat(_))));
        assert!(matches!(
            locate(&dir.path().join("missing.img")),
            Err(ImgError::UnknownFormat(_))
        ));
        assert!(matches!(
            locate(&dir.path().join("model.dff")),
            Err(ImgError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_sectors_for() {
        assert_eq!(sectors_for(0), 0);
        assert_eq!(sectors_for(1), 1);
        assert_eq!(sectors_for(2048), 1);
        assert_eq!(sectors_for(5000), 3);
    }
}
