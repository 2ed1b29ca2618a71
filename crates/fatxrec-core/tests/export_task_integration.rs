//! Integration tests for the recovery exporter: dispatch, retry policy,
//! cancellation, and progress reporting.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{TimeZone, Utc};
use fatxrec_core::{
    CancellationToken, DiagnosticKind, DirectoryEntry, EntryArena, EntryId, ExportStatus,
    MemoryVolume, RecoveryExporter, RetryDecision, ATTR_DIRECTORY,
};
use filetime::FileTime;

const BPC: u32 = 16;

fn entry(name: &str, first_cluster: u32, file_size: u32, attributes: u8) -> DirectoryEntry {
    let stamp = Utc.with_ymd_and_hms(2004, 11, 15, 12, 0, 0).unwrap();
    DirectoryEntry {
        file_name: name.to_string(),
        first_cluster,
        discovery_cluster: 1,
        file_size,
        attributes,
        is_deleted: false,
        creation_time: stamp,
        last_write_time: Utc.with_ymd_and_hms(2004, 11, 16, 9, 30, 0).unwrap(),
        last_access_time: Utc.with_ymd_and_hms(2004, 11, 17, 18, 45, 0).unwrap(),
        parent: None,
        children: Vec::new(),
    }
}

/// Volume with one-cluster files at clusters 2..=9, each filled with
/// its cluster number.
fn flat_volume() -> MemoryVolume {
    let mut vol = MemoryVolume::new(BPC, 64);
    for cluster in 2..10 {
        vol.put_cluster(cluster, vec![cluster as u8; BPC as usize]);
    }
    vol
}

fn flat_files(count: usize) -> (EntryArena, Vec<EntryId>) {
    let mut arena = EntryArena::new();
    let ids = (0..count)
        .map(|i| {
            let cluster = 2 + i as u32;
            arena.push(entry(&format!("file{i}.bin"), cluster, BPC, 0))
        })
        .collect();
    (arena, ids)
}

#[test]
fn test_exports_file_content_and_timestamps() {
    let vol = flat_volume();
    let (arena, ids) = flat_files(1);
    let dest = tempfile::tempdir().unwrap();

    let report = RecoveryExporter::new(&vol, &arena).export_entry(ids[0], dest.path());

    assert_eq!(report.status, ExportStatus::Completed);
    assert_eq!(report.saved, 1);
    assert_eq!(report.skipped, 0);

    let path = dest.path().join("file0.bin");
    let content = fs::read(&path).unwrap();
    assert_eq!(content, vec![2u8; BPC as usize]);

    let meta = fs::metadata(&path).unwrap();
    let mtime = FileTime::from_last_modification_time(&meta);
    let expected = arena.get(ids[0]).last_write_time.timestamp();
    assert_eq!(mtime.unix_seconds(), expected);
}

#[test]
fn test_exports_directory_tree_in_disk_order() {
    let mut vol = flat_volume();
    // A two-cluster file to make sure chains are followed in trees too
    vol.link(4, 5);

    let mut arena = EntryArena::new();
    let root = arena.push(entry("UDATA", 1, 0, ATTR_DIRECTORY));

    let mut sub = entry("saves", 1, 0, ATTR_DIRECTORY);
    sub.parent = Some(root);
    let sub = arena.push(sub);

    let mut long = entry("long.bin", 4, 2 * BPC, 0);
    long.parent = Some(sub);
    let long = arena.push(long);

    let mut meta = entry("title.meta", 3, 5, 0);
    meta.parent = Some(root);
    let meta = arena.push(meta);

    arena.set_children(root, vec![sub, meta]);
    arena.set_children(sub, vec![long]);

    let dest = tempfile::tempdir().unwrap();
    let report = RecoveryExporter::new(&vol, &arena).export_entry(root, dest.path());

    assert_eq!(report.status, ExportStatus::Completed);
    assert_eq!(report.total, 4);
    assert_eq!(report.processed, 4);
    assert_eq!(report.saved, 4);

    let long_path = dest.path().join("UDATA/saves/long.bin");
    let long_content = fs::read(long_path).unwrap();
    assert_eq!(long_content.len(), 2 * BPC as usize);
    assert!(long_content[BPC as usize..].iter().all(|&b| b == 5));

    let meta_content = fs::read(dest.path().join("UDATA/title.meta")).unwrap();
    assert_eq!(meta_content, vec![3u8; 5]);

    // Directory timestamps applied after the children were written
    let dir_meta = fs::metadata(dest.path().join("UDATA/saves")).unwrap();
    let dir_mtime = FileTime::from_last_modification_time(&dir_meta);
    assert_eq!(
        dir_mtime.unix_seconds(),
        arena.get(sub).last_write_time.timestamp()
    );
}

#[test]
fn test_deleted_entries_produce_no_output() {
    let vol = flat_volume();
    let mut arena = EntryArena::new();
    let live = arena.push(entry("live.bin", 2, 8, 0));
    let mut gone = entry("gone.bin", 3, 8, 0);
    gone.is_deleted = true;
    let gone = arena.push(gone);

    let dest = tempfile::tempdir().unwrap();
    let report = RecoveryExporter::new(&vol, &arena).export_entries(&[gone, live], dest.path());

    assert_eq!(report.status, ExportStatus::Completed);
    assert_eq!(report.processed, 2);
    assert_eq!(report.saved, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].kind, DiagnosticKind::DeletedSkipped);

    // Exactly one output file
    let names: Vec<_> = fs::read_dir(dest.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("live.bin")]);
}

#[test]
fn test_corrupt_chain_skips_node_and_continues() {
    let mut vol = flat_volume();
    // Cycle: 6 -> 7 -> 6, but the file claims three clusters
    vol.link(6, 7);
    vol.link(7, 6);

    let mut arena = EntryArena::new();
    let bad = arena.push(entry("bad.bin", 6, 3 * BPC, 0));
    let good = arena.push(entry("good.bin", 2, BPC, 0));

    let dest = tempfile::tempdir().unwrap();
    let report = RecoveryExporter::new(&vol, &arena).export_entries(&[bad, good], dest.path());

    assert_eq!(report.status, ExportStatus::Completed);
    assert_eq!(report.saved, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].kind, DiagnosticKind::ChainCorrupt);
    assert!(dest.path().join("good.bin").exists());
}

#[test]
fn test_cancellation_leaves_remaining_nodes_untouched() {
    let vol = flat_volume();
    let n = 6;
    let (arena, ids) = flat_files(n);
    let dest = tempfile::tempdir().unwrap();

    let k = 3;
    let token = CancellationToken::new();
    let observer_token = token.clone();

    let report = RecoveryExporter::new(&vol, &arena)
        .with_cancellation(token)
        .with_progress(move |progress| {
            if progress.processed == k {
                observer_token.cancel();
            }
        })
        .export_entries(&ids, dest.path());

    assert_eq!(report.status, ExportStatus::Cancelled);
    assert_eq!(report.processed, k);
    assert_eq!(report.saved, k);

    let written = fs::read_dir(dest.path()).unwrap().count();
    assert_eq!(written, k);
}

#[test]
fn test_progress_is_monotonic_and_reaches_100() {
    let vol = flat_volume();
    let (arena, ids) = flat_files(7);
    let dest = tempfile::tempdir().unwrap();

    let mut percents: Vec<u8> = Vec::new();
    let report = RecoveryExporter::new(&vol, &arena)
        .with_progress(|progress| percents.push(progress.percent))
        .export_entries(&ids, dest.path());

    assert_eq!(report.status, ExportStatus::Completed);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*percents.last().unwrap(), 100);
}

/// Blocks `File::create` for a file node by pre-creating a directory
/// with the same name.
fn block_file(dest: &Path, name: &str) {
    fs::create_dir_all(dest.join(name)).unwrap();
}

#[test]
fn test_retry_policy_abort_stops_processing() {
    let vol = flat_volume();
    let (arena, ids) = flat_files(3);
    let dest = tempfile::tempdir().unwrap();
    block_file(dest.path(), "file0.bin");

    let calls = AtomicUsize::new(0);
    let report = RecoveryExporter::new(&vol, &arena)
        .with_retry_policy(|_| {
            calls.fetch_add(1, Ordering::Relaxed);
            RetryDecision::Abort
        })
        .export_entries(&ids, dest.path());

    assert_eq!(report.status, ExportStatus::Aborted);
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    assert!(!dest.path().join("file1.bin").exists());
    assert!(!dest.path().join("file2.bin").exists());
}

#[test]
fn test_retry_policy_skip_continues_with_next_sibling() {
    let vol = flat_volume();
    let (arena, ids) = flat_files(3);
    let dest = tempfile::tempdir().unwrap();
    block_file(dest.path(), "file1.bin");

    let report = RecoveryExporter::new(&vol, &arena)
        .with_retry_policy(|_| RetryDecision::Skip)
        .export_entries(&ids, dest.path());

    assert_eq!(report.status, ExportStatus::Completed);
    assert_eq!(report.saved, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].kind, DiagnosticKind::IoSkipped);
    assert!(dest.path().join("file0.bin").exists());
    assert!(dest.path().join("file2.bin").exists());
}

#[test]
fn test_retry_repeats_the_same_operation() {
    let vol = flat_volume();
    let (arena, ids) = flat_files(1);
    let dest = tempfile::tempdir().unwrap();
    block_file(dest.path(), "file0.bin");

    // First failure clears the obstruction and asks for a retry
    let dest_path = dest.path().to_path_buf();
    let report = RecoveryExporter::new(&vol, &arena)
        .with_retry_policy(move |failure| {
            assert_eq!(failure.operation, "write file");
            fs::remove_dir(dest_path.join("file0.bin")).unwrap();
            RetryDecision::Retry
        })
        .export_entries(&ids, dest.path());

    assert_eq!(report.status, ExportStatus::Completed);
    assert_eq!(report.saved, 1);
    assert_eq!(
        fs::read(dest.path().join("file0.bin")).unwrap(),
        vec![2u8; BPC as usize]
    );
}
