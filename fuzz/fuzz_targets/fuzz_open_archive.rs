#![no_main]
use arbitrary::Arbitrary;
use img_factory_rs::{ArchiveHandle, ReadMode, RebuildEngine, RebuildMode};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    pair: bool,
    safe: bool,
    directory: Vec<u8>,
    data: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let Ok(temp_dir) = tempfile::TempDir::new() else {
        return;
    };
    let img = temp_dir.path().join("fuzz.img");

    if input.pair {
        if std::fs::write(temp_dir.path().join("fuzz.dir"), &input.directory).is_err() {
            return;
        }
        if std::fs::write(&img, &input.data).is_err() {
            return;
        }
    } else {
        let mut bytes = input.directory.clone();
        bytes.extend_from_slice(&input.data);
        if std::fs::write(&img, bytes).is_err() {
            return;
        }
    }

    let Ok(mut handle) = ArchiveHandle::open_with(&img, ReadMode::Lenient) else {
        return;
    };
    for entry in handle.list_entries().map(|e| e.name.clone()).collect::<Vec<_>>() {
        let _ = handle.read_entry(&entry);
    }

    let mode = if input.safe { RebuildMode::Safe } else { RebuildMode::Fast };
    let _ = RebuildEngine::new(mode).rebuild(&mut handle);
});
