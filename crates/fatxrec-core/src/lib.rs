//! FATX recovery/export engine.
//!
//! Takes directory entries already discovered by an external metadata
//! scanner, groups them by the cluster where each record was found,
//! rebuilds logical and orphan tree views over one immutable arena,
//! reassembles file content along allocation-table cluster chains, and
//! exports the result with retryable, cancellable I/O and timestamp
//! fidelity.
//!
//! The engine is read-only on the volume and write-only to the
//! destination; scanning, on-disk structure decoding, and presentation
//! live elsewhere.

pub mod assemble;
pub mod chain;
pub mod entry;
pub mod error;
pub mod export;
pub mod index;
pub mod manifest;
pub mod tree;
pub mod volume;

pub use assemble::ContentAssembler;
pub use chain::ChainWalker;
pub use entry::{DirectoryEntry, EntryArena, EntryId, ATTR_DIRECTORY};
pub use error::{ChainFault, RecoveryError};
pub use export::{
    CancellationToken, Diagnostic, DiagnosticKind, ExportProgress, ExportReport, ExportStatus,
    IoFailure, RecoveryExporter, RetryDecision,
};
pub use index::ClusterGroupIndex;
pub use manifest::{ManifestEntry, ScanManifest};
pub use tree::EntryTree;
pub use volume::{ChainLink, ImageVolume, MemoryVolume, Volume, VolumeGeometry};
