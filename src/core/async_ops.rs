//! Async wrappers (feature `async`)
//!
//! Rebuilds are blocking file I/O. These helpers move them onto tokio's
//! blocking pool so an async caller can await them.

use crate::archive::ArchiveHandle;
use crate::batch::{rebuild_all, BatchOptions, BatchReport};
use crate::error::{ImgError, Result};
use crate::rebuild::{RebuildEngine, RebuildMode, RebuildReport, SharedArchive};
use std::path::PathBuf;

fn join_error(e: tokio::task::JoinError) -> ImgError {
    ImgError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// Open an archive on the blocking pool
pub async fn open(path: PathBuf) -> Result<ArchiveHandle> {
    tokio::task::spawn_blocking(move || ArchiveHandle::open(path))
        .await
        .map_err(join_error)?
}

/// Rebuild a shared archive on the blocking pool
pub async fn rebuild(archive: SharedArchive, engine: RebuildEngine) -> Result<RebuildReport> {
    tokio::task::spawn_blocking(move || {
        let mut handle = archive.lock();
        engine.rebuild(&mut handle)
    })
    .await
    .map_err(join_error)?
}

/// Batch rebuild on the blocking pool
pub async fn rebuild_all_async(
    paths: Vec<PathBuf>,
    mode: RebuildMode,
    options: BatchOptions,
) -> Result<BatchReport> {
    tokio::task::spawn_blocking(move || rebuild_all(&paths, mode, &options))
        .await
        .map_err(join_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Version;
    use crate::rebuild::share;

    #[tokio::test]
    async fn test_async_rebuild_and_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("async.img");

        let mut handle = ArchiveHandle::create(&path, Version::V2).unwrap();
        handle.add_entry("a.dff", vec![5u8; 700]).unwrap();

        let report = rebuild(share(handle), RebuildEngine::default()).await.unwrap();
        assert_eq!(report.entries_written, 1);

        let reopened = open(path.clone()).await.unwrap();
        assert_eq!(reopened.list_entries().count(), 1);

        let batch = rebuild_all_async(vec![path], RebuildMode::Safe, BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(batch.succeeded, 1);
    }
}
