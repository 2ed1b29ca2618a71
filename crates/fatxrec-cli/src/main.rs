use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use fatxrec_core::{
    ClusterGroupIndex, EntryId, EntryTree, ExportReport, ImageVolume, IoFailure, RecoveryExporter,
    RetryDecision, ScanManifest,
};

#[derive(Parser, Debug)]
#[command(name = "fatxrec", version, about = "FATX file recovery - headless export front-end")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List recovered entries from a scan manifest
    List {
        /// Path to the scan manifest (JSON)
        manifest: PathBuf,
        /// Group top-level entries by discovery cluster
        #[arg(long)]
        by_cluster: bool,
        /// Show sizes and timestamps
        #[arg(long)]
        long: bool,
    },
    /// Export recovered files from a volume image
    Export {
        /// Path to the volume image
        image: PathBuf,
        /// Path to the scan manifest (JSON)
        manifest: PathBuf,
        /// Destination directory
        #[arg(long)]
        out: PathBuf,
        /// Export only the given discovery cluster's group
        #[arg(long, conflicts_with = "all_clusters")]
        cluster: Option<u32>,
        /// Export every discovery cluster into its own folder
        #[arg(long)]
        all_clusters: bool,
        /// What to do when a destination I/O operation fails
        #[arg(long, value_enum, default_value_t = OnError::Prompt)]
        on_error: OnError,
        /// Print the export report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OnError {
    /// Ask on stderr whether to retry, skip, or abort
    Prompt,
    /// Skip the failing node and continue
    Skip,
    /// Abort the export on the first failure
    Abort,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::List {
            manifest,
            by_cluster,
            long,
        } => list(manifest, by_cluster, long),
        Commands::Export {
            image,
            manifest,
            out,
            cluster,
            all_clusters,
            on_error,
            json,
        } => export(image, manifest, out, cluster, all_clusters, on_error, json),
    }
}

fn list(manifest: PathBuf, by_cluster: bool, long: bool) -> Result<()> {
    let manifest = ScanManifest::load(&manifest)?;
    let (arena, roots) = manifest.into_arena();
    let tree = EntryTree::new(&arena, roots.clone());

    if by_cluster {
        let index = ClusterGroupIndex::build(&arena, roots.iter().copied());
        for (cluster, ids) in index.groups_by_cluster() {
            println!("Cluster {cluster}");
            for &id in ids {
                print_subtree(&tree, id, 1, long);
            }
        }
    } else {
        for &root in tree.roots() {
            print_subtree(&tree, root, 0, long);
        }
    }

    Ok(())
}

fn print_subtree(tree: &EntryTree<'_>, id: EntryId, depth: usize, long: bool) {
    let entry = tree.entry(id);
    let indent = "  ".repeat(depth);
    let marker = if entry.is_deleted { " [deleted]" } else { "" };

    if long {
        let size = if entry.is_directory() {
            String::new()
        } else {
            format_bytes(entry.file_size as u64)
        };
        println!(
            "{indent}{:<32} {:>10}  {}  cluster {}{marker}",
            entry.file_name,
            size,
            entry.last_write_time.format("%Y-%m-%d %H:%M:%S"),
            entry.discovery_cluster,
        );
    } else {
        println!("{indent}{}{marker}", entry.file_name);
    }

    for &child in &entry.children {
        print_subtree(tree, child, depth + 1, long);
    }
}

fn export(
    image: PathBuf,
    manifest: PathBuf,
    out: PathBuf,
    cluster: Option<u32>,
    all_clusters: bool,
    on_error: OnError,
    json: bool,
) -> Result<()> {
    let manifest = ScanManifest::load(&manifest)?;
    let geometry = manifest.geometry.clone();
    let (arena, roots) = manifest.into_arena();

    if roots.is_empty() {
        bail!("scan manifest contains no entries");
    }

    let volume = ImageVolume::open(&image, geometry)?;
    std::fs::create_dir_all(&out)?;

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {percent:>3}% {msg}")
            .expect("valid progress template"),
    );
    let progress_bar = bar.clone();

    let mut exporter = RecoveryExporter::new(&volume, &arena)
        .with_retry_policy(move |failure| decide(on_error, failure))
        .with_progress(move |progress| {
            progress_bar.set_position(progress.percent as u64);
            progress_bar.set_message(progress.current.clone());
        });

    let report = if let Some(cluster) = cluster {
        let index = ClusterGroupIndex::build(&arena, roots.iter().copied());
        if index.group(cluster).is_empty() {
            bail!("no entries discovered in cluster {cluster}");
        }
        exporter.export_cluster_group(&index, cluster, &out)
    } else if all_clusters {
        let index = ClusterGroupIndex::build(&arena, roots.iter().copied());
        exporter.export_all_clusters(&index, &out)
    } else {
        exporter.export_entries(&roots, &out)
    };

    bar.finish_and_clear();
    print_report(&report, json)
}

fn decide(on_error: OnError, failure: &IoFailure<'_>) -> RetryDecision {
    match on_error {
        OnError::Skip => RetryDecision::Skip,
        OnError::Abort => RetryDecision::Abort,
        OnError::Prompt => prompt(failure),
    }
}

fn prompt(failure: &IoFailure<'_>) -> RetryDecision {
    eprintln!(
        "error: {} failed for {}: {}",
        failure.operation,
        failure.path.display(),
        failure.error
    );

    let stdin = io::stdin();
    loop {
        eprint!("[r]etry / [s]kip / [a]bort? ");
        let _ = io::stderr().flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            // stdin closed; the safe default is to stop
            return RetryDecision::Abort;
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "r" | "retry" => return RetryDecision::Retry,
            "s" | "skip" => return RetryDecision::Skip,
            "a" | "abort" => return RetryDecision::Abort,
            _ => continue,
        }
    }
}

fn print_report(report: &ExportReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "Export {:?}: {} saved, {} skipped ({}/{} nodes)",
        report.status, report.saved, report.skipped, report.processed, report.total
    );
    for diagnostic in &report.diagnostics {
        println!(
            "  {:?}: {} ({})",
            diagnostic.kind,
            diagnostic.path.display(),
            diagnostic.detail
        );
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const SUFFIX: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SUFFIX.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", SUFFIX[unit])
    }
}
