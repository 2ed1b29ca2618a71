//! Cluster chain traversal with cycle and overflow guards.

use std::collections::HashSet;

use crate::error::{ChainFault, RecoveryError};
use crate::volume::{ChainLink, Volume};

/// Walks allocation-table chains for one volume.
///
/// Each [`walk`](ChainWalker::walk) call produces an independent lazy
/// iterator, so a walk is restartable from the same starting cluster.
/// Deleted entries carry no trustworthy first cluster and must not be
/// walked; callers check `is_deleted` first.
pub struct ChainWalker<'a, V: Volume> {
    volume: &'a V,
}

impl<'a, V: Volume> ChainWalker<'a, V> {
    pub fn new(volume: &'a V) -> Self {
        ChainWalker { volume }
    }

    /// Lazily follow the chain starting at `first_cluster`.
    ///
    /// The iterator yields each cluster in chain order. On a cycle or
    /// when the chain outgrows the volume's cluster count it yields a
    /// single `ChainCorrupt` error and then fuses; it never loops
    /// forever.
    pub fn walk(&self, first_cluster: u32) -> ChainIter<'a, V> {
        ChainIter {
            volume: self.volume,
            next: Some(first_cluster),
            visited: HashSet::new(),
            steps: 0,
            faulted: false,
        }
    }

    /// Collect the full chain eagerly.
    pub fn collect(&self, first_cluster: u32) -> Result<Vec<u32>, RecoveryError> {
        self.walk(first_cluster).collect()
    }
}

/// Lazy cluster-chain iterator produced by [`ChainWalker::walk`].
pub struct ChainIter<'a, V: Volume> {
    volume: &'a V,
    next: Option<u32>,
    visited: HashSet<u32>,
    steps: u32,
    faulted: bool,
}

impl<'a, V: Volume> Iterator for ChainIter<'a, V> {
    type Item = Result<u32, RecoveryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.faulted {
            return None;
        }
        let current = self.next?;

        if !self.visited.insert(current) {
            tracing::warn!(cluster = current, "cluster chain loops back on itself");
            self.faulted = true;
            return Some(Err(RecoveryError::ChainCorrupt {
                cluster: current,
                fault: ChainFault::Cycle,
            }));
        }

        self.steps += 1;
        if self.steps > self.volume.total_clusters() {
            tracing::warn!(cluster = current, "cluster chain exceeds volume size");
            self.faulted = true;
            return Some(Err(RecoveryError::ChainCorrupt {
                cluster: current,
                fault: ChainFault::Overflow,
            }));
        }

        self.next = match self.volume.next_cluster(current) {
            ChainLink::Next(next) => Some(next),
            ChainLink::End => None,
        };

        Some(Ok(current))
    }
}
