//! Volume access for the recovery engine.
//!
//! The engine only depends on the minimal chain-walk contract:
//! per-cluster reads by explicit address and allocation-table lookups.
//! Boot-sector and partition-table decoding belong to the external
//! scanner, which hands the resulting geometry over in the scan
//! manifest.
//!
//! FATX allocation-table entry values (16-bit entries shifted down to
//! the same ranges):
//! - 0x00000000: free cluster
//! - 0x00000001-0xFFFFFFF6: next cluster in chain
//! - 0xFFFFFFF7: bad cluster
//! - 0xFFFFFFF8-0xFFFFFFFF: end of chain

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};

use crate::error::RecoveryError;

/// First data cluster on a FATX volume. Cluster 0 is reserved; the data
/// area starts at cluster 1.
pub const FIRST_DATA_CLUSTER: u32 = 1;

/// Free-cluster marker.
pub const FAT_ENTRY_FREE: u32 = 0x0000_0000;
/// Bad-cluster marker.
pub const FAT_ENTRY_BAD: u32 = 0xFFFF_FFF7;
/// End-of-chain marker lower bound (32-bit entries).
pub const FAT_ENTRY_EOC_MIN: u32 = 0xFFFF_FFF8;
/// End-of-chain marker lower bound (16-bit entries).
const FAT16_EOC_MIN: u16 = 0xFFF8;
/// Bad-cluster marker (16-bit entries).
const FAT16_BAD: u16 = 0xFFF7;

/// Allocation-table lookup result for one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainLink {
    /// The chain continues at this cluster.
    Next(u32),
    /// End of chain, or a link the table cannot vouch for (free, bad,
    /// out of range).
    End,
}

/// Read-only view of a FATX volume, addressed by cluster number.
///
/// Every read names its cluster explicitly; there is no shared cursor,
/// so concurrent read-only users need no additional locking.
pub trait Volume {
    /// Volume-wide allocation unit size in bytes.
    fn bytes_per_cluster(&self) -> u32;

    /// Total number of data clusters.
    fn total_clusters(&self) -> u32;

    /// Read one full cluster (`bytes_per_cluster` bytes).
    fn read_cluster(&self, cluster: u32) -> Result<Vec<u8>, RecoveryError>;

    /// Allocation-table lookup for the cluster following `cluster`.
    fn next_cluster(&self, cluster: u32) -> ChainLink;
}

/// Volume geometry as supplied by the external scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeGeometry {
    pub bytes_per_cluster: u32,
    pub total_clusters: u32,
    /// Byte offset of the allocation table within the image.
    pub fat_offset: u64,
    /// Allocation-table entry width in bits: 16 or 32, depending on the
    /// volume's cluster count.
    pub fat_entry_width: u8,
    /// Byte offset of the first data cluster within the image.
    pub data_offset: u64,
}

/// A memory-mapped volume image with an externally supplied geometry.
///
/// The allocation table is decoded once at open time; 16-bit entries
/// are widened so chain lookups are uniform.
pub struct ImageVolume {
    _file: File,
    mmap: Mmap,
    geometry: VolumeGeometry,
    fat: Vec<u32>,
}

impl ImageVolume {
    /// Open a volume image. `geometry` comes from the scan manifest.
    pub fn open<P: AsRef<Path>>(path: P, geometry: VolumeGeometry) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening image {}", path.display()))?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let fat = parse_fat(&mmap, &geometry)
            .with_context(|| format!("decoding allocation table of {}", path.display()))?;

        tracing::debug!(
            entries = fat.len(),
            bytes_per_cluster = geometry.bytes_per_cluster,
            "opened image volume"
        );

        Ok(ImageVolume {
            _file: file,
            mmap,
            geometry,
            fat,
        })
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }
}

impl Volume for ImageVolume {
    fn bytes_per_cluster(&self) -> u32 {
        self.geometry.bytes_per_cluster
    }

    fn total_clusters(&self) -> u32 {
        self.geometry.total_clusters
    }

    fn read_cluster(&self, cluster: u32) -> Result<Vec<u8>, RecoveryError> {
        if cluster < FIRST_DATA_CLUSTER || cluster > self.geometry.total_clusters {
            return Err(RecoveryError::ClusterOutOfRange {
                cluster,
                total: self.geometry.total_clusters,
            });
        }

        let size = self.geometry.bytes_per_cluster as usize;
        let start = self.geometry.data_offset as usize
            + (cluster - FIRST_DATA_CLUSTER) as usize * size;
        let end = start + size;

        if end > self.mmap.len() {
            return Err(RecoveryError::ShortImage { cluster });
        }

        Ok(self.mmap[start..end].to_vec())
    }

    fn next_cluster(&self, cluster: u32) -> ChainLink {
        if cluster < FIRST_DATA_CLUSTER || cluster as usize >= self.fat.len() {
            return ChainLink::End;
        }

        let entry = self.fat[cluster as usize];
        if entry == FAT_ENTRY_FREE || entry >= FAT_ENTRY_BAD {
            return ChainLink::End;
        }
        if entry < FIRST_DATA_CLUSTER || entry > self.geometry.total_clusters {
            return ChainLink::End;
        }

        ChainLink::Next(entry)
    }
}

/// Decode the allocation table. One entry per cluster, including the
/// reserved cluster 0, widened to u32 with end-of-chain normalized.
fn parse_fat(image: &[u8], geometry: &VolumeGeometry) -> Result<Vec<u32>> {
    let count = geometry.total_clusters as usize + 1;
    let entry_size = match geometry.fat_entry_width {
        16 => 2,
        32 => 4,
        other => anyhow::bail!("unsupported FAT entry width: {other} bits"),
    };

    let start = geometry.fat_offset as usize;
    let end = start + count * entry_size;
    if end > image.len() {
        anyhow::bail!(
            "allocation table extends past the end of the image ({} > {})",
            end,
            image.len()
        );
    }

    let raw = &image[start..end];
    let entries = match geometry.fat_entry_width {
        16 => raw
            .chunks_exact(2)
            .map(|chunk| widen_fat16(LittleEndian::read_u16(chunk)))
            .collect(),
        _ => raw
            .chunks_exact(4)
            .map(LittleEndian::read_u32)
            .collect(),
    };

    Ok(entries)
}

fn widen_fat16(entry: u16) -> u32 {
    match entry {
        FAT16_BAD => FAT_ENTRY_BAD,
        e if e >= FAT16_EOC_MIN => FAT_ENTRY_EOC_MIN,
        e => e as u32,
    }
}

/// In-memory volume backed by explicit cluster data and chain links.
///
/// The natural fixture for tests and for embedders that already hold
/// the relevant clusters in memory. Unlinked clusters read as zeroes;
/// chain links are not range-checked against `total_clusters`, so a
/// fixture can model tables that disagree with the declared geometry.
#[derive(Debug, Default)]
pub struct MemoryVolume {
    bytes_per_cluster: u32,
    total_clusters: u32,
    clusters: HashMap<u32, Vec<u8>>,
    links: HashMap<u32, u32>,
}

impl MemoryVolume {
    pub fn new(bytes_per_cluster: u32, total_clusters: u32) -> Self {
        MemoryVolume {
            bytes_per_cluster,
            total_clusters,
            clusters: HashMap::new(),
            links: HashMap::new(),
        }
    }

    /// Store cluster content. Shorter slices are zero-padded on read.
    pub fn put_cluster(&mut self, cluster: u32, data: impl Into<Vec<u8>>) {
        self.clusters.insert(cluster, data.into());
    }

    /// Record an allocation-table link `from -> to`. A cluster without
    /// an outgoing link is end-of-chain.
    pub fn link(&mut self, from: u32, to: u32) {
        self.links.insert(from, to);
    }
}

impl Volume for MemoryVolume {
    fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_cluster
    }

    fn total_clusters(&self) -> u32 {
        self.total_clusters
    }

    fn read_cluster(&self, cluster: u32) -> Result<Vec<u8>, RecoveryError> {
        if cluster < FIRST_DATA_CLUSTER || cluster > self.total_clusters {
            return Err(RecoveryError::ClusterOutOfRange {
                cluster,
                total: self.total_clusters,
            });
        }

        let mut data = self.clusters.get(&cluster).cloned().unwrap_or_default();
        data.resize(self.bytes_per_cluster as usize, 0);
        Ok(data)
    }

    fn next_cluster(&self, cluster: u32) -> ChainLink {
        match self.links.get(&cluster) {
            Some(&next) => ChainLink::Next(next),
            None => ChainLink::End,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_volume_reads_padded() {
        let mut vol = MemoryVolume::new(8, 4);
        vol.put_cluster(2, vec![0xAA, 0xBB]);

        let data = vol.read_cluster(2).unwrap();
        assert_eq!(data, vec![0xAA, 0xBB, 0, 0, 0, 0, 0, 0]);

        // Untouched clusters read as zeroes
        assert_eq!(vol.read_cluster(3).unwrap(), vec![0u8; 8]);
        assert!(vol.read_cluster(0).is_err());
        assert!(vol.read_cluster(5).is_err());
    }

    #[test]
    fn test_memory_volume_links() {
        let mut vol = MemoryVolume::new(8, 4);
        vol.link(1, 2);

        assert_eq!(vol.next_cluster(1), ChainLink::Next(2));
        assert_eq!(vol.next_cluster(2), ChainLink::End);
    }

    #[test]
    fn test_parse_fat16_widens_markers() {
        // Entries for clusters 0..=3: reserved, 1 -> 2, EOC, bad
        let raw: Vec<u8> = [0x0000u16, 0x0002, 0xFFFF, 0xFFF7]
            .iter()
            .flat_map(|e| e.to_le_bytes())
            .collect();

        let geometry = VolumeGeometry {
            bytes_per_cluster: 16,
            total_clusters: 3,
            fat_offset: 0,
            fat_entry_width: 16,
            data_offset: 8,
        };

        let fat = parse_fat(&raw, &geometry).unwrap();
        assert_eq!(fat, vec![FAT_ENTRY_FREE, 2, FAT_ENTRY_EOC_MIN, FAT_ENTRY_BAD]);
    }

    #[test]
    fn test_parse_fat_rejects_short_image() {
        let geometry = VolumeGeometry {
            bytes_per_cluster: 16,
            total_clusters: 8,
            fat_offset: 0,
            fat_entry_width: 32,
            data_offset: 64,
        };

        assert!(parse_fat(&[0u8; 16], &geometry).is_err());
    }
}
