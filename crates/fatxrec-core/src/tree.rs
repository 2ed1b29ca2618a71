//! Logical and by-cluster views over one scan's entries.
//!
//! Both views are alternate groupings of the same immutable arena.
//! Nothing is copied or re-parented: the logical view walks the
//! parent/child links the scanner produced, and the cluster view
//! re-roots a discovery group's entries as top-level nodes for cases
//! where no reliable parent exists (deleted or orphaned directories).

use std::path::PathBuf;

use crate::entry::{DirectoryEntry, EntryArena, EntryId};
use crate::index::ClusterGroupIndex;

/// Read-only forest view of the entries reachable from the scanner's
/// root list.
pub struct EntryTree<'a> {
    arena: &'a EntryArena,
    roots: Vec<EntryId>,
}

impl<'a> EntryTree<'a> {
    /// Build the logical view from the scanner-supplied root list. The
    /// tree only traverses links the scanner produced; it never invents
    /// parent/child relationships.
    pub fn new(arena: &'a EntryArena, roots: Vec<EntryId>) -> Self {
        EntryTree { arena, roots }
    }

    pub fn arena(&self) -> &'a EntryArena {
        self.arena
    }

    /// Top-level entries of the logical view, in discovery order.
    pub fn roots(&self) -> &[EntryId] {
        &self.roots
    }

    pub fn entry(&self, id: EntryId) -> &'a DirectoryEntry {
        self.arena.get(id)
    }

    /// Preorder traversal of the subtree rooted at `id`, children in
    /// on-disk order.
    pub fn iter_subtree(&self, id: EntryId) -> SubtreeIter<'a> {
        SubtreeIter {
            arena: self.arena,
            stack: vec![id],
        }
    }

    /// Entries of `cluster`'s discovery group, re-rooted as top-level
    /// nodes. Same ids as the logical view, grouped differently.
    pub fn cluster_roots(&self, index: &ClusterGroupIndex, cluster: u32) -> Vec<EntryId> {
        index.group(cluster).to_vec()
    }

    /// The entries sharing a directory with `id`: its parent's children,
    /// or the root list for top-level entries.
    pub fn siblings(&self, id: EntryId) -> &[EntryId] {
        match self.arena.get(id).parent {
            Some(parent) => &self.arena.get(parent).children,
            None => &self.roots,
        }
    }

    /// Slash-joined path from the logical root down to `id`.
    pub fn full_path(&self, id: EntryId) -> PathBuf {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            let entry = self.arena.get(node);
            names.push(entry.file_name.as_str());
            current = entry.parent;
        }

        names.iter().rev().collect()
    }

    /// Total node count across all logical roots, deleted entries
    /// included.
    pub fn node_count(&self) -> usize {
        self.roots
            .iter()
            .map(|&root| self.arena.count_subtree(root))
            .sum()
    }
}

/// Preorder iterator over a subtree.
pub struct SubtreeIter<'a> {
    arena: &'a EntryArena,
    stack: Vec<EntryId>,
}

impl<'a> Iterator for SubtreeIter<'a> {
    type Item = EntryId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        // Reversed so the first child is popped next
        self.stack
            .extend(self.arena.get(id).children.iter().rev().copied());
        Some(id)
    }
}
