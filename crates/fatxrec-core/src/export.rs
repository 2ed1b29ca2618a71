//! Recursive export of recovered trees to a destination filesystem.
//!
//! Dispatch per node: deleted entries are recorded and skipped without
//! creating any filesystem output, directories are created before their
//! children and receive their timestamps only after every child has
//! been written, and each file is exported as one composite operation
//! (create, write content, set timestamps) that the injected retry
//! policy sees as a unit.
//!
//! The exporter is sequential and single-threaded; run it on a
//! dedicated worker and flip the cancellation token from elsewhere.
//! Partial output is always left in place, never rolled back.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use filetime::FileTime;
use serde::{Deserialize, Serialize};

use crate::assemble::ContentAssembler;
use crate::entry::{DirectoryEntry, EntryArena, EntryId};
use crate::error::RecoveryError;
use crate::index::ClusterGroupIndex;
use crate::volume::Volume;

/// Decision returned by the retry policy after a destination I/O
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Repeat the same operation.
    Retry,
    /// Abandon this node only and continue with the next.
    Skip,
    /// Terminate the whole export, returning a partial result.
    Abort,
}

/// Context handed to the retry policy when an operation fails.
#[derive(Debug)]
pub struct IoFailure<'a> {
    pub path: &'a Path,
    /// Human-readable operation name ("create directory", "write file",
    /// "set timestamps").
    pub operation: &'a str,
    pub error: &'a io::Error,
}

/// Cooperative cancellation flag, cheap to clone and safe to flip from
/// another thread. Observed after each node completes.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Progress snapshot delivered synchronously after each node.
#[derive(Debug, Clone)]
pub struct ExportProgress {
    /// `floor(100 * processed / total)`; non-decreasing across one
    /// export call.
    pub percent: u8,
    pub processed: usize,
    pub total: usize,
    /// Name of the node just processed.
    pub current: String,
}

/// Terminal outcome of one export call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStatus {
    Completed,
    /// Cancellation observed; the report carries the completed count.
    Cancelled,
    /// The retry policy demanded termination.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Deleted entry: no filesystem output by design.
    DeletedSkipped,
    /// Cluster chain cycle, overflow, or premature end.
    ChainCorrupt,
    /// Destination I/O failure resolved as Skip by the policy.
    IoSkipped,
}

/// One node-local incident recorded during export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub path: PathBuf,
    pub detail: String,
}

/// Structured outcome of one export call.
///
/// `processed == saved + skipped` at every point; on a `Completed`
/// status `processed == total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportReport {
    pub status: ExportStatus,
    /// Nodes scheduled for this call.
    pub total: usize,
    /// Nodes processed, including skips.
    pub processed: usize,
    /// Files and directories fully written.
    pub saved: usize,
    /// Nodes that produced no (or incomplete) output.
    pub skipped: usize,
    pub diagnostics: Vec<Diagnostic>,
}

type RetryPolicy<'a> = Box<dyn FnMut(&IoFailure<'_>) -> RetryDecision + 'a>;
type ProgressObserver<'a> = Box<dyn FnMut(&ExportProgress) + 'a>;

enum Halt {
    Cancelled,
    Aborted,
}

enum Outcome {
    Done,
    Skipped,
}

/// Orchestrates recursive export of entry trees, flat entry lists, and
/// cluster groups.
pub struct RecoveryExporter<'a, V: Volume> {
    volume: &'a V,
    arena: &'a EntryArena,
    policy: RetryPolicy<'a>,
    progress: Option<ProgressObserver<'a>>,
    cancel: CancellationToken,
    total: usize,
    processed: usize,
    saved: usize,
    skipped: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a, V: Volume> RecoveryExporter<'a, V> {
    /// Exporter with the default policy: destination I/O failures skip
    /// the affected node.
    pub fn new(volume: &'a V, arena: &'a EntryArena) -> Self {
        RecoveryExporter {
            volume,
            arena,
            policy: Box::new(|failure| {
                tracing::warn!(
                    path = %failure.path.display(),
                    operation = failure.operation,
                    error = %failure.error,
                    "destination I/O failure, skipping node"
                );
                RetryDecision::Skip
            }),
            progress: None,
            cancel: CancellationToken::new(),
            total: 0,
            processed: 0,
            saved: 0,
            skipped: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Inject the retry policy consulted on destination I/O failures.
    /// The callback may block on an external actor (a user prompt);
    /// that is the only point where the exporter waits on anyone.
    pub fn with_retry_policy(
        mut self,
        policy: impl FnMut(&IoFailure<'_>) -> RetryDecision + 'a,
    ) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Observe progress after each node, synchronously on the export
    /// thread.
    pub fn with_progress(mut self, observer: impl FnMut(&ExportProgress) + 'a) -> Self {
        self.progress = Some(Box::new(observer));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Export a single entry (file or whole subtree) into `destination`.
    pub fn export_entry(&mut self, id: EntryId, destination: &Path) -> ExportReport {
        self.export_entries(&[id], destination)
    }

    /// Export a flat list of entries into `destination`, in list order.
    pub fn export_entries(&mut self, ids: &[EntryId], destination: &Path) -> ExportReport {
        let total: usize = ids.iter().map(|&id| self.arena.count_subtree(id)).sum();
        tracing::info!(nodes = total, destination = %destination.display(), "starting export");

        self.run(total, |exporter| {
            for &id in ids {
                exporter.save_node(destination, id)?;
            }
            Ok(())
        })
    }

    /// Export one discovery cluster's group into
    /// `destination/Cluster <N>`, its entries re-rooted as top-level
    /// nodes.
    pub fn export_cluster_group(
        &mut self,
        index: &ClusterGroupIndex,
        cluster: u32,
        destination: &Path,
    ) -> ExportReport {
        let ids = index.group(cluster).to_vec();
        let total: usize = ids.iter().map(|&id| self.arena.count_subtree(id)).sum();

        self.run(total, |exporter| {
            exporter.save_cluster_group(cluster, &ids, destination)
        })
    }

    /// Export every discovery cluster's group, one `Cluster <N>` folder
    /// per group, in ascending cluster order.
    pub fn export_all_clusters(
        &mut self,
        index: &ClusterGroupIndex,
        destination: &Path,
    ) -> ExportReport {
        let groups: Vec<(u32, Vec<EntryId>)> = index
            .groups_by_cluster()
            .map(|(cluster, ids)| (cluster, ids.to_vec()))
            .collect();
        let total: usize = groups
            .iter()
            .flat_map(|(_, ids)| ids.iter())
            .map(|&id| self.arena.count_subtree(id))
            .sum();

        self.run(total, |exporter| {
            for (cluster, ids) in &groups {
                exporter.save_cluster_group(*cluster, ids, destination)?;
            }
            Ok(())
        })
    }

    fn run<F>(&mut self, total: usize, body: F) -> ExportReport
    where
        F: FnOnce(&mut Self) -> Result<(), Halt>,
    {
        self.total = total;
        self.processed = 0;
        self.saved = 0;
        self.skipped = 0;
        self.diagnostics.clear();

        let status = match body(self) {
            Ok(()) => ExportStatus::Completed,
            Err(Halt::Cancelled) => ExportStatus::Cancelled,
            Err(Halt::Aborted) => ExportStatus::Aborted,
        };

        tracing::info!(
            ?status,
            processed = self.processed,
            saved = self.saved,
            skipped = self.skipped,
            "export finished"
        );

        ExportReport {
            status,
            total: self.total,
            processed: self.processed,
            saved: self.saved,
            skipped: self.skipped,
            diagnostics: std::mem::take(&mut self.diagnostics),
        }
    }

    fn save_cluster_group(
        &mut self,
        cluster: u32,
        ids: &[EntryId],
        destination: &Path,
    ) -> Result<(), Halt> {
        let group_dir = destination.join(format!("Cluster {cluster}"));
        tracing::debug!(path = %group_dir.display(), entries = ids.len(), "exporting cluster group");

        match self.try_io(&group_dir, "create directory", || {
            fs::create_dir_all(&group_dir)?;
            Ok(())
        })? {
            Outcome::Done => {}
            Outcome::Skipped => {
                // Without the group folder none of its entries have a
                // destination; account for the whole group.
                let nodes: usize = ids.iter().map(|&id| self.arena.count_subtree(id)).sum();
                self.skipped += nodes;
                self.advance(nodes, &format!("Cluster {cluster}"));
                return self.check_cancelled();
            }
        }

        for &id in ids {
            self.save_node(&group_dir, id)?;
        }

        Ok(())
    }

    /// Dispatch one node: deleted, directory, or file.
    fn save_node(&mut self, dir: &Path, id: EntryId) -> Result<(), Halt> {
        let entry = self.arena.get(id);

        if entry.is_deleted {
            // No filesystem output for deleted entries, by contract;
            // the node (and any subtree) still counts so progress
            // reaches 100.
            let path = dir.join(&entry.file_name);
            tracing::debug!(path = %path.display(), "skipping deleted entry");
            self.diagnostics.push(Diagnostic {
                kind: DiagnosticKind::DeletedSkipped,
                path,
                detail: "deleted entry, no content to recover".to_string(),
            });
            let nodes = self.arena.count_subtree(id);
            self.skipped += nodes;
            self.advance(nodes, &entry.file_name);
            return self.check_cancelled();
        }

        if entry.is_directory() {
            self.save_directory(dir, id)
        } else {
            self.save_file(dir, id)
        }
    }

    fn save_directory(&mut self, dir: &Path, id: EntryId) -> Result<(), Halt> {
        let entry = self.arena.get(id);
        let path = dir.join(&entry.file_name);
        tracing::debug!(path = %path.display(), "exporting directory");

        // Idempotent when the directory already exists
        match self.try_io(&path, "create directory", || {
            fs::create_dir_all(&path)?;
            Ok(())
        })? {
            Outcome::Done => {}
            Outcome::Skipped => {
                // Children have nowhere to go; account for the subtree
                let nodes = self.arena.count_subtree(id);
                self.skipped += nodes;
                self.advance(nodes, &entry.file_name);
                return self.check_cancelled();
            }
        }

        self.saved += 1;
        self.advance(1, &entry.file_name);

        for &child in &entry.children {
            self.save_node(&path, child)?;
        }

        // Timestamps go on last so writes into the directory do not
        // disturb them; failures here share the retry policy.
        match self.try_io(&path, "set timestamps", || apply_timestamps(&path, entry))? {
            Outcome::Done | Outcome::Skipped => {}
        }

        self.check_cancelled()
    }

    fn save_file(&mut self, dir: &Path, id: EntryId) -> Result<(), Halt> {
        let entry = self.arena.get(id);
        let path = dir.join(&entry.file_name);
        tracing::debug!(path = %path.display(), bytes = entry.file_size, "exporting file");

        let volume = self.volume;
        // Content plus timestamps succeed or fail as one operation; a
        // Retry decision repeats the whole write.
        let outcome = self.try_io(&path, "write file", || {
            let assembler = ContentAssembler::new(volume);
            let file = File::create(&path)?;
            let mut writer = BufWriter::new(file);
            assembler.write_to(entry, &mut writer)?;
            writer.flush()?;
            apply_timestamps(&path, entry)
        })?;

        match outcome {
            Outcome::Done => self.saved += 1,
            Outcome::Skipped => self.skipped += 1,
        }

        self.advance(1, &entry.file_name);
        self.check_cancelled()
    }

    /// Run a destination operation until it succeeds, the policy gives
    /// up on the node, or the policy aborts the export. Chain
    /// corruption never reaches the policy: retrying a broken chain
    /// cannot succeed, so it is logged and the node skipped.
    fn try_io(
        &mut self,
        path: &Path,
        operation: &str,
        mut op: impl FnMut() -> Result<(), RecoveryError>,
    ) -> Result<Outcome, Halt> {
        loop {
            match op() {
                Ok(()) => return Ok(Outcome::Done),
                Err(RecoveryError::Io(error)) => {
                    let decision = (self.policy)(&IoFailure {
                        path,
                        operation,
                        error: &error,
                    });
                    match decision {
                        RetryDecision::Retry => continue,
                        RetryDecision::Skip => {
                            self.diagnostics.push(Diagnostic {
                                kind: DiagnosticKind::IoSkipped,
                                path: path.to_path_buf(),
                                detail: format!("{operation}: {error}"),
                            });
                            return Ok(Outcome::Skipped);
                        }
                        RetryDecision::Abort => {
                            tracing::error!(
                                path = %path.display(),
                                %error,
                                "export aborted by retry policy"
                            );
                            self.diagnostics.push(Diagnostic {
                                kind: DiagnosticKind::IoSkipped,
                                path: path.to_path_buf(),
                                detail: format!("{operation}: {error} (aborted)"),
                            });
                            return Err(Halt::Aborted);
                        }
                    }
                }
                Err(corrupt @ RecoveryError::ChainCorrupt { .. }) => {
                    tracing::warn!(path = %path.display(), error = %corrupt, "skipping corrupt file");
                    self.diagnostics.push(Diagnostic {
                        kind: DiagnosticKind::ChainCorrupt,
                        path: path.to_path_buf(),
                        detail: corrupt.to_string(),
                    });
                    return Ok(Outcome::Skipped);
                }
                Err(other) => {
                    // Remaining kinds (out-of-range reads, short image)
                    // are properties of the source, not the
                    // destination: no amount of retrying helps.
                    tracing::warn!(path = %path.display(), error = %other, "skipping unreadable node");
                    self.diagnostics.push(Diagnostic {
                        kind: DiagnosticKind::ChainCorrupt,
                        path: path.to_path_buf(),
                        detail: other.to_string(),
                    });
                    return Ok(Outcome::Skipped);
                }
            }
        }
    }

    /// Count `nodes` more nodes as processed and report progress for
    /// the node named `current`.
    fn advance(&mut self, nodes: usize, current: &str) {
        self.processed += nodes;
        if let Some(observer) = self.progress.as_mut() {
            let percent = if self.total == 0 {
                100
            } else {
                (100 * self.processed / self.total) as u8
            };
            observer(&ExportProgress {
                percent,
                processed: self.processed,
                total: self.total,
                current: current.to_string(),
            });
        }
    }

    fn check_cancelled(&self) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            tracing::info!(processed = self.processed, "cancellation observed");
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Apply the entry's recovered timestamps to `path`.
///
/// Unix exposes no portable way to set a creation time, so only the
/// modified and accessed times are applied; the creation time stays
/// available in the entry metadata and reports.
fn apply_timestamps(path: &Path, entry: &DirectoryEntry) -> Result<(), RecoveryError> {
    let mtime = FileTime::from_unix_time(
        entry.last_write_time.timestamp(),
        entry.last_write_time.timestamp_subsec_nanos(),
    );
    let atime = FileTime::from_unix_time(
        entry.last_access_time.timestamp(),
        entry.last_access_time.timestamp_subsec_nanos(),
    );
    filetime::set_file_times(path, atime, mtime)?;
    Ok(())
}
