//! Error taxonomy for the recovery engine.

use thiserror::Error;

/// Why a cluster chain stopped being trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChainFault {
    /// A cluster number repeated within the chain.
    #[error("cluster number repeats within the chain")]
    Cycle,
    /// The chain grew past the volume's total cluster count.
    #[error("chain is longer than the volume's cluster count")]
    Overflow,
    /// The chain ended before the file's byte count was satisfied.
    #[error("chain ended before the file's byte count was satisfied")]
    Truncated,
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Node-local corruption: the affected file is skipped, the export
    /// continues.
    #[error("cluster chain corrupt at cluster {cluster}: {fault}")]
    ChainCorrupt { cluster: u32, fault: ChainFault },

    /// A cluster address outside the volume's valid range.
    #[error("cluster {cluster} is out of range for a volume of {total} clusters")]
    ClusterOutOfRange { cluster: u32, total: u32 },

    /// The backing image is shorter than the cluster's extent.
    #[error("cluster {cluster} extends past the end of the image")]
    ShortImage { cluster: u32 },

    /// Content reassembly was requested for a deleted entry or a
    /// directory.
    #[error("{file_name}: not a recoverable file entry")]
    NotAFile { file_name: String },

    /// Destination I/O failure; resolved through the injected retry
    /// policy during export.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}
