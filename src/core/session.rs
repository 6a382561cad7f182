//! Workspace of open archives
//!
//! Owns every open [`ArchiveHandle`] under a [`SessionId`] and tracks which
//! one is active. A file can only be open once.

use crate::archive::ArchiveHandle;
use crate::codec::{locate, ReadMode, Version};
use crate::error::{ImgError, Result};
use crate::rebuild::{RebuildEngine, RebuildReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Identifier of an open archive within a [`Workspace`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Session {
    handle: ArchiveHandle,
    key: PathBuf,
}

/// Set of open archives
#[derive(Default)]
pub struct Workspace {
    sessions: BTreeMap<SessionId, Session>,
    active: Option<SessionId>,
    next_id: u64,
    read_mode: ReadMode,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workspace that opens archives with `read_mode`
    pub fn with_read_mode(read_mode: ReadMode) -> Self {
        Workspace {
            read_mode,
            ..Self::default()
        }
    }

    /// Open an archive and make it active
    ///
    /// Fails with `AlreadyOpen` if the same file (through either half of a
    /// V1 pair) is open already.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<SessionId> {
        let location = locate(path.as_ref())?;
        let key = identity(&location.img_path);
        self.ensure_closed(&key)?;

        let handle = ArchiveHandle::open_with(path, self.read_mode)?;
        Ok(self.insert(handle, key))
    }

    /// Start a new archive and make it active
    pub fn create<P: AsRef<Path>>(&mut self, path: P, version: Version) -> Result<SessionId> {
        let handle = ArchiveHandle::create(path, version)?;
        let key = identity(handle.img_path());
        self.ensure_closed(&key)?;
        Ok(self.insert(handle, key))
    }

    fn ensure_closed(&self, key: &Path) -> Result<()> {
        if self.sessions.values().any(|s| s.key == key) {
            return Err(ImgError::AlreadyOpen(key.to_path_buf()));
        }
        Ok(())
    }

    fn insert(&mut self, handle: ArchiveHandle, key: PathBuf) -> SessionId {
        self.next_id += 1;
        let id = SessionId(self.next_id);
        info!("Session {} holds {:?}", id, handle.img_path());
        self.sessions.insert(id, Session { handle, key });
        self.active = Some(id);
        id
    }

    /// Archive of a session
    pub fn get(&self, id: SessionId) -> Option<&ArchiveHandle> {
        self.sessions.get(&id).map(|s| &s.handle)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut ArchiveHandle> {
        self.sessions.get_mut(&id).map(|s| &mut s.handle)
    }

    /// Close a session and hand back its archive
    ///
    /// Unsaved changes are not written. If the closed session was active, the
    /// most recently opened remaining session becomes active.
    pub fn close(&mut self, id: SessionId) -> Option<ArchiveHandle> {
        let session = self.sessions.remove(&id)?;
        debug!("Closed session {} ({:?})", id, session.key);
        if self.active == Some(id) {
            self.active = self.sessions.keys().next_back().copied();
        }
        Some(session.handle)
    }

    /// Id of the active session
    pub fn active_id(&self) -> Option<SessionId> {
        self.active
    }

    /// The active archive
    pub fn active(&self) -> Option<&ArchiveHandle> {
        self.active.and_then(|id| self.get(id))
    }

    pub fn active_mut(&mut self) -> Option<&mut ArchiveHandle> {
        let id = self.active?;
        self.get_mut(id)
    }

    /// Switch the active session
    pub fn set_active(&mut self, id: SessionId) -> Result<()> {
        if !self.sessions.contains_key(&id) {
            return Err(ImgError::NotFound(id.to_string()));
        }
        self.active = Some(id);
        Ok(())
    }

    /// Session holding the file at `path`, if any
    pub fn find_by_path<P: AsRef<Path>>(&self, path: P) -> Option<SessionId> {
        let key = match locate(path.as_ref()) {
            Ok(location) => identity(&location.img_path),
            Err(_) => identity(path.as_ref()),
        };
        self.sessions
            .iter()
            .find(|(_, s)| s.key == key)
            .map(|(id, _)| *id)
    }

    /// Open session ids in opening order
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions with unsaved changes
    pub fn modified(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|(_, s)| s.handle.is_modified())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Rebuild one session's archive
    ///
    /// A rebuild written to another path moves the session to that path.
    pub fn rebuild(&mut self, id: SessionId, engine: &RebuildEngine) -> Result<RebuildReport> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| ImgError::NotFound(id.to_string()))?;
        let report = engine.rebuild(&mut session.handle)?;
        session.key = identity(session.handle.img_path());
        Ok(report)
    }
}

/// Path used to tell archives apart
///
/// Canonical if the file exists, otherwise the absolute form of the path.
fn identity(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn saved(dir: &TempDir, name: &str, version: Version) -> PathBuf {
        let path = dir.path().join(name);
        let mut handle = ArchiveHandle::create(&path, version).unwrap();
        handle.add_entry("a.dff", vec![1u8; 10]).unwrap();
        RebuildEngine::default().rebuild(&mut handle).unwrap();
        path
    }

    #[test]
    fn test_same_file_cannot_open_twice() {
        let dir = TempDir::new().unwrap();
        let path = saved(&dir, "gta3.img", Version::V1);

        let mut ws = Workspace::new();
        let id = ws.open(&path).unwrap();
        assert_eq!(ws.active_id(), Some(id));

        assert!(matches!(ws.open(&path), Err(ImgError::AlreadyOpen(_))));
        // The .dir half names the same archive
        assert!(matches!(
            ws.open(dir.path().join("gta3.dir")),
            Err(ImgError::AlreadyOpen(_))
        ));
        assert_eq!(ws.find_by_path(dir.path().join("gta3.dir")), Some(id));

        ws.close(id).unwrap();
        assert!(ws.open(&path).is_ok());
    }

    #[test]
    fn test_active_session_follows_close() {
        let dir = TempDir::new().unwrap();
        let a = saved(&dir, "a.img", Version::V2);
        let b = saved(&dir, "b.img", Version::V2);

        let mut ws = Workspace::new();
        let first = ws.open(&a).unwrap();
        let second = ws.open(&b).unwrap();
        assert_eq!(ws.ids(), vec![first, second]);

        ws.set_active(first).unwrap();
        assert_eq!(ws.active().unwrap().img_path(), a.as_path());

        ws.close(first);
        assert_eq!(ws.active_id(), Some(second));
        ws.close(second);
        assert!(ws.active().is_none());
        assert!(ws.is_empty());
    }

    #[test]
    fn test_rebuild_through_workspace() {
        let dir = TempDir::new().unwrap();
        let mut ws = Workspace::new();
        let id = ws.create(dir.path().join("new.img"), Version::V2).unwrap();

        ws.active_mut().unwrap().add_entry("x.txd", vec![9u8; 3000]).unwrap();
        assert_eq!(ws.modified(), vec![id]);

        let report = ws.rebuild(id, &RebuildEngine::default()).unwrap();
        assert_eq!(report.entries_written, 1);
        assert!(ws.modified().is_empty());
        assert_eq!(ws.find_by_path(dir.path().join("new.img")), Some(id));
    }

    #[test]
    fn test_unknown_session() {
        let mut ws = Workspace::new();
        assert!(ws.set_active(SessionId(42)).is_err());
        assert!(ws.close(SessionId(42)).is_none());
    }
}
