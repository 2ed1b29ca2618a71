//! Scanner hand-off format.
//!
//! The metadata scanner serializes its findings as a JSON manifest:
//! volume geometry plus the recovered entry forest, children nested in
//! on-disk order. Loading a manifest flattens the forest into an
//! [`EntryArena`], which is the engine's working representation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{DirectoryEntry, EntryArena, EntryId};
use crate::volume::VolumeGeometry;

/// Root document produced by the metadata scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanManifest {
    pub geometry: VolumeGeometry,
    /// Top-level recovered entries, in discovery order.
    pub roots: Vec<ManifestEntry>,
}

/// One recovered entry as serialized by the scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file_name: String,
    pub first_cluster: u32,
    pub discovery_cluster: u32,
    pub file_size: u32,
    pub attributes: u8,
    #[serde(default)]
    pub is_deleted: bool,
    pub creation_time: DateTime<Utc>,
    pub last_write_time: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    #[serde(default)]
    pub children: Vec<ManifestEntry>,
}

impl ScanManifest {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading scan manifest {}", path.display()))?;
        let manifest: ScanManifest = serde_json::from_str(&text)
            .with_context(|| format!("parsing scan manifest {}", path.display()))?;

        tracing::debug!(roots = manifest.roots.len(), "loaded scan manifest");
        Ok(manifest)
    }

    /// Flatten the forest into an arena, preserving child order and
    /// wiring parent back-references. Returns the arena and the root
    /// entry ids.
    pub fn into_arena(self) -> (EntryArena, Vec<EntryId>) {
        let mut arena = EntryArena::new();
        let roots = self
            .roots
            .into_iter()
            .map(|root| flatten(&mut arena, root, None))
            .collect();
        (arena, roots)
    }
}

fn flatten(arena: &mut EntryArena, node: ManifestEntry, parent: Option<EntryId>) -> EntryId {
    let ManifestEntry {
        file_name,
        first_cluster,
        discovery_cluster,
        file_size,
        attributes,
        is_deleted,
        creation_time,
        last_write_time,
        last_access_time,
        children,
    } = node;

    let id = arena.push(DirectoryEntry {
        file_name,
        first_cluster,
        discovery_cluster,
        file_size,
        attributes,
        is_deleted,
        creation_time,
        last_write_time,
        last_access_time,
        parent,
        children: Vec::new(),
    });

    let child_ids = children
        .into_iter()
        .map(|child| flatten(arena, child, Some(id)))
        .collect();
    arena.set_children(id, child_ids);

    id
}
