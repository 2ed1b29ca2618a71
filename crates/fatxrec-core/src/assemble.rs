//! Reassembles a file's byte content from its cluster chain.

use std::io::Write;

use crate::chain::ChainWalker;
use crate::entry::DirectoryEntry;
use crate::error::{ChainFault, RecoveryError};
use crate::volume::Volume;

/// Reads a file entry's bytes in chain order, truncating the final
/// cluster to the exact remaining byte count.
///
/// `file_size` is authoritative: only `ceil(file_size / bytes_per_cluster)`
/// clusters are read, even when the chain continues past that bound,
/// and content past the final byte is never emitted.
pub struct ContentAssembler<'a, V: Volume> {
    volume: &'a V,
}

impl<'a, V: Volume> ContentAssembler<'a, V> {
    pub fn new(volume: &'a V) -> Self {
        ContentAssembler { volume }
    }

    /// Assembled content, exactly `entry.file_size` bytes.
    pub fn read(&self, entry: &DirectoryEntry) -> Result<Vec<u8>, RecoveryError> {
        let mut buf = Vec::with_capacity(entry.file_size as usize);
        self.write_to(entry, &mut buf)?;
        Ok(buf)
    }

    /// Stream the content into `out`, returning the byte count written.
    ///
    /// Fails with `ChainCorrupt` when the chain breaks before
    /// `file_size` bytes are available; whatever was already written to
    /// `out` stays there.
    pub fn write_to<W: Write>(
        &self,
        entry: &DirectoryEntry,
        out: &mut W,
    ) -> Result<u64, RecoveryError> {
        if entry.is_deleted || entry.is_directory() {
            return Err(RecoveryError::NotAFile {
                file_name: entry.file_name.clone(),
            });
        }

        let bytes_per_cluster = self.volume.bytes_per_cluster() as u64;
        let size = entry.file_size as u64;
        if size == 0 {
            return Ok(0);
        }

        let clusters_needed = size.div_ceil(bytes_per_cluster);
        let walker = ChainWalker::new(self.volume);

        let mut remaining = size;
        let mut clusters_read = 0u64;
        let mut last_cluster = entry.first_cluster;

        for step in walker.walk(entry.first_cluster) {
            let cluster = step?;
            last_cluster = cluster;

            let data = self.volume.read_cluster(cluster)?;
            let take = remaining.min(bytes_per_cluster) as usize;
            out.write_all(&data[..take])?;
            remaining -= take as u64;

            clusters_read += 1;
            if clusters_read == clusters_needed {
                break;
            }
        }

        if remaining > 0 {
            tracing::warn!(
                file = %entry.file_name,
                missing = remaining,
                "cluster chain ended before the file's byte count"
            );
            return Err(RecoveryError::ChainCorrupt {
                cluster: last_cluster,
                fault: ChainFault::Truncated,
            });
        }

        tracing::debug!(file = %entry.file_name, bytes = size, "assembled file content");
        Ok(size)
    }
}
