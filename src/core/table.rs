//! Entry table
//!
//! Ordered, name-unique collection of entries. Order is directory order and
//! is preserved by rebuilds. Names are unique case-insensitively among
//! entries that are not `Deleted`; the index maps each such name to its
//! position.
//!
//! All mutations go through [`TableMutation`] so that entry status and the
//! archive's modified state change together.

use crate::entry::{ArchiveEntry, EntryStatus};
use crate::error::{ImgError, Result};
use crate::pattern::NamePattern;
use crate::validation::{is_clean_name, name_key, sanitize_name, unique_variant};
use ahash::{AHashMap, AHashSet};
use tracing::{debug, warn};

/// A change to the table
#[derive(Debug, Clone)]
pub enum TableMutation {
    /// Insert a new entry at the end
    Add { name: String, payload: Vec<u8> },
    /// Swap the payload of an existing entry
    Replace { name: String, payload: Vec<u8> },
    /// Mark an entry for removal
    Remove { name: String },
    /// Give an existing entry a new name
    Rename { name: String, to: String },
}

/// Ordered entry collection with a case-insensitive name index
#[derive(Debug, Clone, Default)]
pub struct EntryTable {
    entries: Vec<ArchiveEntry>,
    index: AHashMap<String, usize>,
}

impl EntryTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from entries in directory order
    ///
    /// Directories read from disk may repeat a name; the first occurrence
    /// wins lookups, later ones stay in the table and are written back.
    pub fn from_entries(entries: Vec<ArchiveEntry>) -> Self {
        let mut table = EntryTable {
            entries,
            index: AHashMap::new(),
        };
        table.reindex();
        table
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (pos, entry) in self.entries.iter().enumerate() {
            if entry.is_deleted() {
                continue;
            }
            let key = name_key(&entry.name);
            if self.index.contains_key(&key) {
                warn!("Duplicate entry name in directory: {}", entry.name);
                continue;
            }
            self.index.insert(key, pos);
        }
    }

    /// Apply one mutation
    pub fn apply(&mut self, mutation: TableMutation) -> Result<()> {
        match mutation {
            TableMutation::Add { name, payload } => {
                let key = name_key(&name);
                if self.index.contains_key(&key) {
                    return Err(ImgError::DuplicateName(name));
                }
                debug!("Adding entry {} ({} bytes)", name, payload.len());
                self.entries.push(ArchiveEntry::resident(name, payload));
                self.index.insert(key, self.entries.len() - 1);
            }
            TableMutation::Replace { name, payload } => {
                let pos = self.position(&name).ok_or(ImgError::NotFound(name))?;
                let entry = &mut self.entries[pos];
                debug!("Replacing entry {} ({} bytes)", entry.name, payload.len());
                entry.set_payload(payload);
                if entry.status != EntryStatus::New {
                    entry.status = EntryStatus::Modified;
                }
            }
            TableMutation::Remove { name } => {
                let key = name_key(&name);
                let pos = self.index.remove(&key).ok_or(ImgError::NotFound(name))?;
                debug!("Marking entry {} for removal", self.entries[pos].name);
                self.entries[pos].status = EntryStatus::Deleted;
            }
            TableMutation::Rename { name, to } => {
                let pos = self.position(&name).ok_or(ImgError::NotFound(name))?;
                if self.position(&to).is_some_and(|other| other != pos) {
                    return Err(ImgError::DuplicateName(to));
                }
                self.rename_at(pos, to);
                self.reindex();
            }
        }
        Ok(())
    }

    /// Rename the entry at `pos`; the index is left to the caller
    fn rename_at(&mut self, pos: usize, to: String) {
        let entry = &mut self.entries[pos];
        debug!("Renaming entry {} -> {}", entry.name, to);
        entry.name = to;
        if entry.status == EntryStatus::Original {
            entry.status = EntryStatus::Modified;
        }
    }

    /// Insert a new entry; fails with `DuplicateName` if the name is taken.
    pub fn add(&mut self, name: impl Into<String>, payload: Vec<u8>) -> Result<()> {
        self.apply(TableMutation::Add {
            name: name.into(),
            payload,
        })
    }

    /// Replace the payload of an existing entry.
    pub fn replace(&mut self, name: impl Into<String>, payload: Vec<u8>) -> Result<()> {
        self.apply(TableMutation::Replace {
            name: name.into(),
            payload,
        })
    }

    /// Mark an entry as `Deleted`.
    pub fn remove(&mut self, name: impl Into<String>) -> Result<()> {
        self.apply(TableMutation::Remove { name: name.into() })
    }

    /// Rename an entry; fails with `DuplicateName` if the new name is taken.
    pub fn rename(&mut self, name: impl Into<String>, to: impl Into<String>) -> Result<()> {
        self.apply(TableMutation::Rename {
            name: name.into(),
            to: to.into(),
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.index.get(&name_key(name)).copied()
    }

    /// Case-insensitive lookup among non-deleted entries
    pub fn find_by_name(&self, name: &str) -> Option<&ArchiveEntry> {
        self.position(name).map(|pos| &self.entries[pos])
    }

    /// True if a non-deleted entry has this name.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Non-deleted entries in directory order
    pub fn list_active(&self) -> impl Iterator<Item = &ArchiveEntry> + '_ {
        self.entries.iter().filter(|e| !e.is_deleted())
    }

    /// Every entry, including those pending removal
    pub fn all(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Number of non-deleted entries
    pub fn active_len(&self) -> usize {
        self.list_active().count()
    }

    /// Total number of entries, including deleted ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if anything differs from the archive on disk
    pub fn is_modified(&self) -> bool {
        self.entries.iter().any(|e| e.status != EntryStatus::Original)
    }

    /// Non-deleted entries whose names match a wildcard pattern
    pub fn select(&self, pattern: &NamePattern) -> Vec<&ArchiveEntry> {
        self.list_active()
            .filter(|e| pattern.matches(&e.name))
            .collect()
    }

    /// Non-deleted entries with the given extension (case-insensitive, no dot)
    pub fn by_extension(&self, ext: &str) -> Vec<&ArchiveEntry> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.list_active()
            .filter(|e| e.extension().as_deref() == Some(ext.as_str()))
            .collect()
    }

    /// Sanitise every non-deleted name in place
    ///
    /// Returns `(old, new)` for each renamed entry. A sanitised name that
    /// collides with another entry gets a numeric suffix.
    pub fn sanitize_names(&mut self) -> Vec<(String, String)> {
        let mut renamed = Vec::new();

        // Names that are already clean keep priority over renamed ones
        let mut taken: AHashSet<String> = self
            .list_active()
            .filter(|e| is_clean_name(&e.name))
            .map(|e| name_key(&e.name))
            .collect();

        // Positions rather than names: directories read from disk may repeat a name
        for pos in 0..self.entries.len() {
            let entry = &self.entries[pos];
            if entry.is_deleted() || is_clean_name(&entry.name) {
                continue;
            }
            let original = entry.name.clone();
            let clean = unique_variant(&sanitize_name(&original), |n| taken.contains(&name_key(n)));
            taken.insert(name_key(&clean));

            warn!("Sanitised entry name {:?} -> {:?}", original, clean);
            self.rename_at(pos, clean.clone());
            renamed.push((original, clean));
        }

        if !renamed.is_empty() {
            self.reindex();
        }
        renamed
    }

    /// Copy of the non-deleted entries, in order
    ///
    /// Resident payloads are shared, so this is cheap. Rebuilds plan and
    /// write from one snapshot so both phases see the same entries.
    pub fn snapshot(&self) -> Vec<ArchiveEntry> {
        self.list_active().cloned().collect()
    }

    /// Replace the contents with the entries of a freshly written archive.
    pub(crate) fn commit(&mut self, entries: Vec<ArchiveEntry>) {
        self.entries = entries;
        self.reindex();
    }
}
