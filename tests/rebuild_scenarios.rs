//! End-to-end rebuild scenarios
//!
//! Each test works on archives in its own temp directory and checks the
//! bytes on disk, not just the handle.

use img_factory_rs::core::codec::{write_directory, RawDirRecord, RECORD_SIZE};
use img_factory_rs::{
    ArchiveHandle, CancelToken, EntryStatus, ImgError, RebuildEngine, RebuildMode, RebuildPhase,
    Version, SECTOR_SIZE,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn digest(path: &Path) -> Vec<u8> {
    Sha256::digest(std::fs::read(path).unwrap()).to_vec()
}

fn tmp_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().ends_with(".tmp"))
        .collect()
}

/// V2 archive with `count` one-sector entries; `broken` entries point past
/// the end of the file.
fn write_v2_with_broken(path: &Path, count: u32, broken: &[u32]) {
    let data_start = 1u32;
    let records: Vec<_> = (0..count)
        .map(|i| {
            let offset = if broken.contains(&i) { 10_000 + i } else { data_start + i };
            RawDirRecord::new(&format!("entry{}.dff", i), offset, 1)
        })
        .collect();

    let mut bytes = write_directory(&records, Version::V2);
    bytes.resize(SECTOR_SIZE, 0);
    for i in 0..count {
        bytes.extend(vec![i as u8 + 1; SECTOR_SIZE]);
    }
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn test_v2_two_entry_layout() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("scenario.img");

    let a: Vec<u8> = (0..100u32).map(|i| i as u8).collect();
    let b: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

    let mut handle = ArchiveHandle::create(&path, Version::V2).unwrap();
    handle.add_entry("a.dff", a.clone()).unwrap();
    handle.add_entry("b.txd", b.clone()).unwrap();
    RebuildEngine::new(RebuildMode::Fast).rebuild(&mut handle).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[0..4], b"VER2");
    assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 2);
    // Directory (8 + 64 bytes) is padded to one sector
    assert!(bytes[8 + 2 * RECORD_SIZE..SECTOR_SIZE].iter().all(|&x| x == 0));
    assert_eq!(bytes.len(), 5 * SECTOR_SIZE);

    let reopened = ArchiveHandle::open(&path).unwrap();
    let entries: Vec<_> = reopened.list_entries().collect();
    assert_eq!(entries[0].name, "a.dff");
    assert_eq!((entries[0].offset_sectors, entries[0].size_sectors), (1, 1));
    assert_eq!(entries[1].name, "b.txd");
    assert_eq!((entries[1].offset_sectors, entries[1].size_sectors), (2, 3));

    // Re-opened sizes are sector-rounded; the tail is zero padding
    let read_a = reopened.read_entry("a.dff").unwrap();
    assert_eq!(&read_a[..100], a.as_slice());
    assert!(read_a[100..].iter().all(|&x| x == 0));
    let read_b = reopened.read_entry("b.txd").unwrap();
    assert_eq!(&read_b[..5000], b.as_slice());

    // The handle that wrote the archive keeps exact sizes
    assert_eq!(handle.read_entry("a.dff").unwrap(), a);
    assert_eq!(handle.read_entry("b.txd").unwrap(), b);
}

#[test]
fn test_v1_rebuild_writes_headerless_pair() {
    let temp_dir = TempDir::new().unwrap();
    let img = temp_dir.path().join("gta3.img");
    let dir = temp_dir.path().join("gta3.dir");

    let mut handle = ArchiveHandle::create(&img, Version::V1).unwrap();
    handle.add_entry("a.dff", vec![1u8; 10]).unwrap();
    handle.add_entry("b.txd", vec![2u8; 4097]).unwrap();
    RebuildEngine::default().rebuild(&mut handle).unwrap();

    let dir_bytes = std::fs::read(&dir).unwrap();
    assert_eq!(dir_bytes.len(), 2 * RECORD_SIZE);
    assert_eq!(&dir_bytes[0..5], b"a.dff");
    // Name first, then offset and size
    assert_eq!(u32::from_le_bytes(dir_bytes[24..28].try_into().unwrap()), 0);
    assert_eq!(u32::from_le_bytes(dir_bytes[28..32].try_into().unwrap()), 1);
    assert_eq!(u32::from_le_bytes(dir_bytes[56..60].try_into().unwrap()), 1);
    assert_eq!(u32::from_le_bytes(dir_bytes[60..64].try_into().unwrap()), 3);

    let img_bytes = std::fs::read(&img).unwrap();
    assert_eq!(img_bytes.len(), 4 * SECTOR_SIZE);
    assert_eq!(&img_bytes[..10], &[1u8; 10]);
    assert_eq!(img_bytes[SECTOR_SIZE], 2);

    let reopened = ArchiveHandle::open(&dir).unwrap();
    assert_eq!(reopened.version(), Version::V1);
    assert_eq!(reopened.list_entries().count(), 2);
}

#[test]
fn test_rebuild_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("idem.img");

    let mut handle = ArchiveHandle::create(&path, Version::V2).unwrap();
    for i in 0..12 {
        handle
            .add_entry(format!("model{}.dff", i), vec![i as u8; 300 * (i + 1)])
            .unwrap();
    }
    handle.add_entry("empty.col", Vec::new()).unwrap();

    RebuildEngine::default().rebuild(&mut handle).unwrap();
    let first = std::fs::read(&path).unwrap();

    RebuildEngine::default().rebuild(&mut handle).unwrap();
    let second = std::fs::read(&path).unwrap();
    assert_eq!(first, second);

    // A fresh handle produces the same bytes as well
    let mut reopened = ArchiveHandle::open(&path).unwrap();
    RebuildEngine::new(RebuildMode::Safe).rebuild(&mut reopened).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), first);
}

#[test]
fn test_fast_mode_fails_and_leaves_original() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.img");
    write_v2_with_broken(&path, 10, &[6]);
    let before = digest(&path);

    let mut handle = ArchiveHandle::open(&path).unwrap();
    handle.add_entry("new.txd", vec![9u8; 100]).unwrap();

    let result = RebuildEngine::new(RebuildMode::Fast).rebuild(&mut handle);
    match result {
        Err(ImgError::UnresolvableEntry { name, .. }) => assert_eq!(name, "entry6.dff"),
        other => panic!("expected UnresolvableEntry, got {:?}", other),
    }

    assert_eq!(digest(&path), before);
    assert!(tmp_files(temp_dir.path()).is_empty());
    // The table is untouched too
    assert!(handle.is_modified());
    assert_eq!(handle.list_entries().count(), 11);
}

#[test]
fn test_safe_mode_skips_one_of_ten() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("partial.img");
    write_v2_with_broken(&path, 10, &[3]);

    let mut handle = ArchiveHandle::open(&path).unwrap();
    let report = RebuildEngine::new(RebuildMode::Safe)
        .rebuild(&mut handle)
        .unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].name, "entry3.dff");
    assert_eq!(report.entries_written, 9);
    assert!(!handle.is_modified());

    let reopened = ArchiveHandle::open(&path).unwrap();
    let names: Vec<_> = reopened.list_entries().map(|e| e.name.clone()).collect();
    assert_eq!(names.len(), 9);
    assert!(!names.contains(&"entry3.dff".to_string()));

    // Payloads moved but kept their contents
    let e4 = reopened.read_entry("entry4.dff").unwrap();
    assert!(e4.iter().all(|&x| x == 5));
}

#[test]
fn test_remove_and_replace_then_rebuild() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("edit.img");
    write_v2_with_broken(&path, 4, &[]);

    let mut handle = ArchiveHandle::open(&path).unwrap();
    handle.remove_entry("entry1.dff").unwrap();
    handle.replace_entry("entry2.dff", vec![0xEE; 3000]).unwrap();
    assert_eq!(
        handle.find_entry("entry2.dff").unwrap().status,
        EntryStatus::Modified
    );

    let report = RebuildEngine::default().rebuild(&mut handle).unwrap();
    assert_eq!(report.entries_written, 3);

    let entries: Vec<_> = handle.list_entries().collect();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.status == EntryStatus::Original));
    assert_eq!(entries[1].name, "entry2.dff");
    assert_eq!((entries[1].offset_sectors, entries[1].size_sectors), (2, 2));
    assert_eq!(handle.read_entry("entry2.dff").unwrap(), vec![0xEE; 3000]);
}

#[test]
fn test_cancelled_rebuild_leaves_no_trace() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cancel.img");
    write_v2_with_broken(&path, 5, &[]);
    let before = digest(&path);

    let mut handle = ArchiveHandle::open(&path).unwrap();
    handle.add_entry("late.dff", vec![1u8; 10]).unwrap();

    let token = CancelToken::new();
    let trigger = token.clone();
    let result = RebuildEngine::new(RebuildMode::Safe)
        .with_cancel(token)
        .on_phase(move |phase| {
            if phase == RebuildPhase::Writing {
                trigger.cancel();
            }
        })
        .rebuild(&mut handle);

    assert!(matches!(result, Err(ImgError::Cancelled)));
    assert_eq!(digest(&path), before);
    assert!(tmp_files(temp_dir.path()).is_empty());
    assert!(handle.find_entry("late.dff").is_some());
}

#[test]
fn test_sanitised_name_is_stored() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("names.img");

    let mut handle = ArchiveHandle::create(&path, Version::V2).unwrap();
    handle.add_entry("bad\0/name.dff", vec![1u8; 4]).unwrap();
    handle
        .add_entry("a_really_long_texture_name.txd", vec![2u8; 4])
        .unwrap();
    RebuildEngine::default().rebuild(&mut handle).unwrap();

    let reopened = ArchiveHandle::open(&path).unwrap();
    let names: Vec<_> = reopened.list_entries().map(|e| e.name.clone()).collect();
    assert_eq!(names[0], "bad_name.dff");
    assert_eq!(names[1].len(), 23);
}

#[test]
fn test_rebuild_as_leaves_source_alone() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("source.img");
    write_v2_with_broken(&source, 3, &[]);
    let before = digest(&source);

    let mut handle = ArchiveHandle::open(&source).unwrap();
    handle.remove_entry("entry0.dff").unwrap();

    let target = temp_dir.path().join("slim.img");
    RebuildEngine::default()
        .output_to(&target)
        .rebuild(&mut handle)
        .unwrap();

    assert_eq!(digest(&source), before);
    assert_eq!(handle.img_path(), target.as_path());
    assert_eq!(ArchiveHandle::open(&target).unwrap().list_entries().count(), 2);
}
