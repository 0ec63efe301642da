//! End-to-end reconciliation scenarios against the in-memory store and
//! remote, with a real directory as the local replica.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trisync_core::conflict::{CONFLICT_MARKER, ConflictResolver};
use trisync_core::events::{ChangeKind, DocEvent};
use trisync_core::fs::{FileSystem, RealFileSystem};
use trisync_core::ignore::TMP_DIR_NAME;
use trisync_core::local::{LocalWatcher, scan_tree};
use trisync_core::remote::MemoryRemote;
use trisync_core::store::{MemoryStore, MetadataStore};
use trisync_core::{PlatformProfile, SyncEngine, SyncOptions};

fn options(root: &Path, profile: PlatformProfile) -> SyncOptions {
    SyncOptions::new(root, profile).with_retries(3, 1, Duration::from_millis(1))
}

fn engine(root: &Path, profile: PlatformProfile, store: &MemoryStore, remote: &MemoryRemote) -> SyncEngine {
    SyncEngine::new(
        options(root, profile),
        Arc::new(store.clone()),
        Arc::new(RealFileSystem),
        Arc::new(remote.clone()),
    )
    .with_resolver(ConflictResolver::new(profile).with_token_source(|| "tok".to_string()))
}

fn live_paths(store: &MemoryStore) -> BTreeSet<String> {
    store
        .list_all()
        .unwrap()
        .into_iter()
        .filter(|doc| doc.is_live())
        .map(|doc| doc.path)
        .collect()
}

fn disk_paths(root: &Path) -> BTreeSet<String> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != TMP_DIR_NAME)
        .map(|e| {
            let e = e.unwrap();
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

#[tokio::test]
async fn test_case_variant_folder_gets_conflict_name() {
    let dir = tempfile::tempdir().unwrap();
    let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
    let mut engine = engine(dir.path(), PlatformProfile::MACOS, &store, &remote);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine.registry().subscribe(Arc::new(move |event: &DocEvent| {
        sink.lock()
            .unwrap()
            .push((event.path().to_string(), event.doc().move_from.clone()));
    }));

    remote.put_folder("alfred").unwrap();
    assert!(engine.sync().await.is_clean());
    remote.put_folder("Alfred").unwrap();
    let result = engine.sync().await;
    assert!(result.is_clean(), "{:?}", result);

    assert!(dir.path().join("alfred").is_dir());
    assert!(dir.path().join("Alfred-conflict-tok").is_dir());
    assert_eq!(
        live_paths(&store),
        BTreeSet::from(["alfred".to_string(), "Alfred-conflict-tok".to_string()])
    );

    // The loser never existed locally, so it is created rather than moved.
    let seen = seen.lock().unwrap();
    let conflict_events: Vec<_> = seen.iter().filter(|(path, _)| path.contains(CONFLICT_MARKER)).collect();
    assert!(!conflict_events.is_empty());
    assert!(conflict_events.iter().all(|(_, move_from)| move_from.is_none()));

    // The original keeps its name on both sides.
    assert!(remote.doc_at("alfred").is_some());
    assert!(remote.doc_at("Alfred-conflict-tok").is_some());
    assert!(engine.status().unwrap().is_settled());
}

#[tokio::test]
async fn test_offline_folder_deletion_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
    fs::create_dir_all(dir.path().join("folder1")).unwrap();
    fs::create_dir_all(dir.path().join("folder2/inner")).unwrap();
    fs::write(dir.path().join("folder2/inner/a.txt"), "a").unwrap();
    let mut engine = engine(dir.path(), PlatformProfile::LINUX, &store, &remote);
    assert!(engine.sync().await.is_clean());
    assert!(engine.status().unwrap().is_settled());

    // Removed while nothing was watching.
    fs::remove_dir_all(dir.path().join("folder2")).unwrap();

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let (watcher, mut batches) = LocalWatcher::start(
        options(dir.path(), PlatformProfile::LINUX),
        Arc::new(store.clone()),
        fs,
    );
    let initial = batches.recv().await.unwrap();
    watcher.stop().await.unwrap();

    let deleted: Vec<_> = initial
        .iter()
        .filter(|e| e.kind == ChangeKind::Deleted)
        .map(|e| e.path.as_str())
        .collect();
    assert_eq!(deleted, vec!["folder2"]);
}

#[tokio::test]
async fn test_nfd_spelling_on_disk_keeps_cached_nfc_path() {
    let dir = tempfile::tempdir().unwrap();
    let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
    let nfc = "caf\u{e9}.txt";
    let nfd = "cafe\u{301}.txt";
    remote.put_file(nfc, b"espresso").unwrap();

    let mut engine = engine(dir.path(), PlatformProfile::MACOS, &store, &remote);
    assert!(engine.sync().await.is_clean());
    assert!(dir.path().join(nfc).exists());

    // What an NFD-normalizing filesystem would report for the same entry.
    fs::rename(dir.path().join(nfc), dir.path().join(nfd)).unwrap();
    let result = engine.sync().await;
    assert!(result.is_clean(), "{:?}", result);

    assert_eq!(store.len(), 1);
    assert_eq!(live_paths(&store), BTreeSet::from([nfc.to_string()]));
    assert_eq!(remote.live_docs().len(), 1);
    assert!(remote.doc_at(nfc).is_some());
    assert!(engine.status().unwrap().is_settled());
}

#[tokio::test]
async fn test_local_rename_moves_remote_document() {
    let dir = tempfile::tempdir().unwrap();
    let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
    fs::write(dir.path().join("draft.md"), "# draft").unwrap();
    let mut engine = engine(dir.path(), PlatformProfile::LINUX, &store, &remote);
    engine.sync().await;
    let uploaded = remote.doc_at("draft.md").unwrap();

    fs::create_dir(dir.path().join("posts")).unwrap();
    fs::rename(dir.path().join("draft.md"), dir.path().join("posts/final.md")).unwrap();
    let result = engine.sync().await;
    assert!(result.is_clean(), "{:?}", result);

    assert!(remote.doc_at("draft.md").is_none());
    let moved = remote.doc_at("posts/final.md").unwrap();
    assert_eq!(moved.id, uploaded.id);
    assert_eq!(remote.content_at("posts/final.md").unwrap(), b"# draft");
    assert!(engine.status().unwrap().is_settled());
}

#[cfg(unix)]
#[tokio::test]
async fn test_executable_bit_propagates_on_linux() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
    let script = dir.path().join("build.sh");
    fs::write(&script, "#!/bin/sh\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let mut engine = engine(dir.path(), PlatformProfile::LINUX, &store, &remote);
    assert!(engine.sync().await.is_clean());
    assert!(remote.doc_at("build.sh").unwrap().executable);

    remote.put_file("tool", b"bin").unwrap();
    remote.set_executable("tool", true).unwrap();
    assert!(engine.sync().await.is_clean());
    let mode = fs::metadata(dir.path().join("tool")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[tokio::test]
async fn test_executable_flag_survives_platform_without_bits() {
    let dir = tempfile::tempdir().unwrap();
    let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
    remote.put_file("run.sh", b"echo").unwrap();
    remote.set_executable("run.sh", true).unwrap();

    let mut engine = engine(dir.path(), PlatformProfile::WINDOWS, &store, &remote);
    assert!(engine.sync().await.is_clean());
    assert!(dir.path().join("run.sh").exists());

    // The local side reads back the default mode; the flag is not lost.
    assert!(engine.sync().await.is_noop());
    let doc = store.list_all().unwrap().pop().unwrap();
    assert!(doc.executable);
    assert!(remote.doc_at("run.sh").unwrap().executable);
}

#[tokio::test]
async fn test_rescan_of_settled_tree_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
    fs::create_dir_all(dir.path().join("a/b")).unwrap();
    fs::write(dir.path().join("a/b/c.txt"), "c").unwrap();
    fs::write(dir.path().join("top.txt"), "t").unwrap();
    remote.put_file("from-remote/r.txt", b"r").unwrap();

    let mut engine = engine(dir.path(), PlatformProfile::LINUX, &store, &remote);
    assert!(engine.sync().await.is_clean());

    for _ in 0..2 {
        let report = scan_tree(&RealFileSystem, engine.options(), &store).unwrap();
        assert_eq!(report.offline_deletions, 0);
        assert_eq!(report.offline_moves, 0);
        assert_eq!(engine.merge_local(report.events).unwrap(), 0);
    }
}

#[tokio::test]
async fn test_settled_cache_matches_both_trees() {
    let dir = tempfile::tempdir().unwrap();
    let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
    remote.put_file("shared/r1.txt", b"one").unwrap();
    remote.put_file("shared/r2.txt", b"two").unwrap();
    remote.put_folder("empty").unwrap();
    fs::create_dir(dir.path().join("mine")).unwrap();
    fs::write(dir.path().join("mine/l1.txt"), "l1").unwrap();
    fs::write(dir.path().join("top.txt"), "top").unwrap();

    let mut engine = engine(dir.path(), PlatformProfile::LINUX, &store, &remote);
    assert!(engine.sync().await.is_clean());

    remote.move_path("shared/r2.txt", "mine/r2.txt").unwrap();
    remote.trash_path("empty").unwrap();
    fs::remove_file(dir.path().join("top.txt")).unwrap();
    fs::write(dir.path().join("mine/l2.txt"), "l2").unwrap();
    assert!(engine.sync().await.is_clean());
    engine.sync().await;

    let expected = BTreeSet::from([
        "mine".to_string(),
        "mine/l1.txt".to_string(),
        "mine/l2.txt".to_string(),
        "mine/r2.txt".to_string(),
        "shared".to_string(),
        "shared/r1.txt".to_string(),
    ]);
    assert_eq!(disk_paths(dir.path()), expected);
    assert_eq!(live_paths(&store), expected);
    let remote_paths: BTreeSet<String> = remote.live_docs().into_iter().map(|d| d.path).collect();
    assert_eq!(remote_paths, expected);
    assert!(engine.status().unwrap().is_settled());
}

#[tokio::test]
async fn test_unscanned_local_edit_survives_remote_edit() {
    let dir = tempfile::tempdir().unwrap();
    let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
    let mut engine = engine(dir.path(), PlatformProfile::LINUX, &store, &remote);

    remote.put_file("a.txt", b"v1").unwrap();
    assert!(engine.sync().await.is_clean());
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"v1");

    // Both sides edit before the next cycle; no watcher reports the local one.
    fs::write(dir.path().join("a.txt"), "LOCAL EDIT").unwrap();
    remote.put_file("a.txt", b"REMOTE EDIT").unwrap();

    let result = engine.sync().await;
    assert!(result.success, "{:?}", result);
    assert!(result.newly_parked.is_empty());
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"LOCAL EDIT");

    let result = engine.sync().await;
    assert!(result.is_clean(), "{:?}", result);

    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"REMOTE EDIT");
    assert_eq!(fs::read(dir.path().join("a-conflict-tok.txt")).unwrap(), b"LOCAL EDIT");
    assert_eq!(remote.content_at("a.txt").unwrap(), b"REMOTE EDIT");
    assert_eq!(remote.content_at("a-conflict-tok.txt").unwrap(), b"LOCAL EDIT");
    assert_eq!(
        live_paths(&store),
        BTreeSet::from(["a.txt".to_string(), "a-conflict-tok.txt".to_string()])
    );
    assert!(store.list_all().unwrap().iter().all(|doc| doc.error_count == 0));
    assert!(engine.status().unwrap().is_settled());
}

#[tokio::test]
async fn test_remote_name_rejected_by_platform_is_skipped_locally() {
    let dir = tempfile::tempdir().unwrap();
    let (store, remote) = (MemoryStore::new(), MemoryRemote::new());
    let mut engine = engine(dir.path(), PlatformProfile::WINDOWS, &store, &remote);

    remote.put_file("a:b.txt", b"colon").unwrap();
    for _ in 0..3 {
        let result = engine.sync().await;
        assert!(result.is_clean(), "{:?}", result);
    }
    assert!(disk_paths(dir.path()).is_empty());
    let status = engine.status().unwrap();
    assert_eq!(status.incompatible, 1);
    assert_eq!(status.parked, 0);
    assert!(status.is_settled());
    // Still on the remote side: nothing was mistaken for a local deletion.
    assert!(remote.doc_at("a:b.txt").is_some());

    remote.move_path("a:b.txt", "a-b.txt").unwrap();
    let result = engine.sync().await;
    assert!(result.is_clean(), "{:?}", result);
    assert_eq!(fs::read(dir.path().join("a-b.txt")).unwrap(), b"colon");
    let status = engine.status().unwrap();
    assert_eq!(status.incompatible, 0);
    assert!(status.is_settled());
}
