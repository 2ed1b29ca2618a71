//! Groups directory entries by the cluster where each was discovered.

use std::collections::BTreeMap;

use crate::entry::{EntryArena, EntryId};

/// Mapping from discovery cluster to the entries found there.
///
/// Every indexed entry belongs to exactly one group, keyed by its
/// `discovery_cluster`; entries within a group keep insertion order.
/// `BTreeMap` keys give the ascending, reproducible cluster enumeration
/// the orphan views and the exporter rely on.
#[derive(Debug, Default, Clone)]
pub struct ClusterGroupIndex {
    groups: BTreeMap<u32, Vec<EntryId>>,
}

impl ClusterGroupIndex {
    /// Single pass over `ids`, keyed by each entry's discovery cluster.
    /// Directories and files are both indexed; nothing is dropped or
    /// merged.
    pub fn build(arena: &EntryArena, ids: impl IntoIterator<Item = EntryId>) -> Self {
        let mut groups: BTreeMap<u32, Vec<EntryId>> = BTreeMap::new();
        for id in ids {
            let cluster = arena.get(id).discovery_cluster;
            groups.entry(cluster).or_default().push(id);
        }

        tracing::debug!(groups = groups.len(), "built cluster group index");
        ClusterGroupIndex { groups }
    }

    /// Entries discovered in `cluster`, in insertion order.
    pub fn group(&self, cluster: u32) -> &[EntryId] {
        self.groups.get(&cluster).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Clusters with at least one entry, ascending.
    pub fn clusters(&self) -> impl Iterator<Item = u32> + '_ {
        self.groups.keys().copied()
    }

    /// All groups in ascending cluster order.
    pub fn groups_by_cluster(&self) -> impl Iterator<Item = (u32, &[EntryId])> + '_ {
        self.groups.iter().map(|(&c, ids)| (c, ids.as_slice()))
    }

    /// Number of non-empty groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total entries across all groups.
    pub fn entry_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::DirectoryEntry;
    use chrono::{TimeZone, Utc};

    fn entry(name: &str, discovery_cluster: u32) -> DirectoryEntry {
        let stamp = Utc.with_ymd_and_hms(2005, 3, 1, 0, 0, 0).unwrap();
        DirectoryEntry {
            file_name: name.to_string(),
            first_cluster: 0,
            discovery_cluster,
            file_size: 0,
            attributes: 0,
            is_deleted: false,
            creation_time: stamp,
            last_write_time: stamp,
            last_access_time: stamp,
            parent: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_partitions_entries_by_discovery_cluster() {
        let mut arena = EntryArena::new();
        let a = arena.push(entry("a", 9));
        let b = arena.push(entry("b", 4));
        let c = arena.push(entry("c", 9));
        let d = arena.push(entry("d", 4));

        let index = ClusterGroupIndex::build(&arena, arena.ids());

        // Each entry lands in exactly one group; sizes sum to the total
        assert_eq!(index.entry_count(), arena.len());
        assert_eq!(index.group(4), &[b, d]);
        assert_eq!(index.group(9), &[a, c]);
        assert!(index.group(7).is_empty());
    }

    #[test]
    fn test_clusters_enumerate_ascending() {
        let mut arena = EntryArena::new();
        for (name, cluster) in [("x", 40), ("y", 3), ("z", 17)] {
            arena.push(entry(name, cluster));
        }

        let index = ClusterGroupIndex::build(&arena, arena.ids());
        let clusters: Vec<u32> = index.clusters().collect();
        assert_eq!(clusters, vec![3, 17, 40]);
    }
}
