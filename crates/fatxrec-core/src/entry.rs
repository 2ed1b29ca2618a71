//! Recovered directory entries and their arena storage.
//!
//! Entries form a graph with parent back-references, so the whole scan
//! session's entries live in one owned arena addressed by stable
//! indices. Parent and children are [`EntryId`]s, never references,
//! which keeps navigation O(1) in both directions without reference
//! cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// FATX attribute bits (shared layout with FAT).
pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;

/// Index of an entry within its [`EntryArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub usize);

/// One recovered filesystem object, as handed over by the metadata
/// scanner. Immutable from the engine's perspective once the arena is
/// assembled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub file_name: String,
    /// Start of the content chain. Meaningless when `is_deleted`.
    pub first_cluster: u32,
    /// Cluster the entry record was physically found in. Fixed at scan
    /// time, independent of logical tree position.
    pub discovery_cluster: u32,
    /// Authoritative content length in bytes.
    pub file_size: u32,
    pub attributes: u8,
    pub is_deleted: bool,
    pub creation_time: DateTime<Utc>,
    pub last_write_time: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    /// Back-reference into the arena. Absent for orphans and roots.
    pub parent: Option<EntryId>,
    /// Children in on-disk order. Empty for files.
    pub children: Vec<EntryId>,
}

impl DirectoryEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }
}

/// Owning collection for one scan session's entries.
///
/// Ids are positions in insertion order; looking up an id minted by a
/// different arena is a caller bug and panics.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EntryArena {
    entries: Vec<DirectoryEntry>,
}

impl EntryArena {
    pub fn new() -> Self {
        EntryArena::default()
    }

    pub fn push(&mut self, entry: DirectoryEntry) -> EntryId {
        let id = EntryId(self.entries.len());
        self.entries.push(entry);
        id
    }

    pub fn get(&self, id: EntryId) -> &DirectoryEntry {
        &self.entries[id.0]
    }

    /// Replace an entry's child list. Only meaningful while the arena
    /// is being assembled from scanner output.
    pub fn set_children(&mut self, id: EntryId, children: Vec<EntryId>) {
        self.entries[id.0].children = children;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntryId> {
        (0..self.entries.len()).map(EntryId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &DirectoryEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (EntryId(i), e))
    }

    /// Number of nodes in the subtree rooted at `id`, including `id`
    /// itself and any deleted entries.
    pub fn count_subtree(&self, id: EntryId) -> usize {
        let entry = self.get(id);
        1 + entry
            .children
            .iter()
            .map(|&child| self.count_subtree(child))
            .sum::<usize>()
    }
}
