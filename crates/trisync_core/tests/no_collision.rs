//! Randomized interleavings of creations and renames using case and Unicode
//! variants of the same names. After every merge no two live Docs may name
//! the same entry under the platform's rules.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use trisync_core::conflict::ConflictResolver;
use trisync_core::doc::{DocKind, RemoteRef};
use trisync_core::events::{ChangeEvent, ChangeKind, FileStats};
use trisync_core::store::{MemoryStore, MetadataStore};
use trisync_core::{Merge, PlatformProfile};

const PARENTS: &[&str] = &["", "dir", "Dir", "DIR"];
const FOLDER_LEAVES: &[&str] = &["alfred", "Alfred", "ALFRED", "caf\u{e9}", "cafe\u{301}", "CAF\u{c9}"];
const FILE_LEAVES: &[&str] = &["notes.txt", "Notes.txt", "NOTES.TXT", "r\u{e9}sum\u{e9}.md", "re\u{301}sume\u{301}.md"];

fn merge(profile: PlatformProfile) -> (MemoryStore, Merge) {
    let store = MemoryStore::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let resolver = ConflictResolver::new(profile)
        .with_token_source(move || format!("t{}", counter.fetch_add(1, Ordering::SeqCst)));
    let merge = Merge::new(Arc::new(store.clone()), profile).with_resolver(resolver);
    (store, merge)
}

fn join(parent: &str, leaf: &str) -> String {
    if parent.is_empty() {
        leaf.to_string()
    } else {
        format!("{}/{}", parent, leaf)
    }
}

fn stats(kind: DocKind, rng: &mut StdRng) -> FileStats {
    match kind {
        DocKind::Folder => FileStats::folder(Utc::now()),
        DocKind::File => {
            let hash = format!("h{}", rng.gen_range(0..4));
            FileStats::file(hash.len() as u64, Utc::now(), hash)
        }
    }
}

fn random_event(store: &MemoryStore, rng: &mut StdRng, remote_ids: &mut usize) -> ChangeEvent {
    let kind = if rng.gen_bool(0.5) {
        DocKind::Folder
    } else {
        DocKind::File
    };
    let leaf = match kind {
        DocKind::Folder => FOLDER_LEAVES.choose(rng),
        DocKind::File => FILE_LEAVES.choose(rng),
    }
    .copied()
    .unwrap_or("x");
    let parent = PARENTS.choose(rng).copied().unwrap_or("");
    let path = join(parent, leaf);

    match rng.gen_range(0..3) {
        0 => ChangeEvent::local(ChangeKind::Created, kind, path).with_stats(stats(kind, rng)),
        1 => {
            *remote_ids += 1;
            let stats = stats(kind, rng);
            let remote = RemoteRef {
                id: format!("r{}", remote_ids),
                generation: *remote_ids as u64,
                path: path.clone(),
                content_hash: stats.content_hash.clone(),
                executable: false,
            };
            ChangeEvent::remote(ChangeKind::Created, kind, path, remote).with_stats(stats)
        }
        _ => {
            // Rename a live file anywhere, or a live folder to the top level.
            let live: Vec<_> = store.list_all().unwrap().into_iter().filter(|d| d.is_live()).collect();
            let Some(source) = live.choose(rng) else {
                return ChangeEvent::local(ChangeKind::Created, kind, path).with_stats(stats(kind, rng));
            };
            let target = match source.kind {
                DocKind::File => join(parent, FILE_LEAVES.choose(rng).copied().unwrap_or("x")),
                DocKind::Folder => FOLDER_LEAVES.choose(rng).copied().unwrap_or("x").to_string(),
            };
            ChangeEvent::local_rename(source.kind, source.path.clone(), target)
                .with_stats(stats(source.kind, rng))
        }
    }
}

fn assert_no_collisions(store: &MemoryStore, profile: &PlatformProfile, step: usize) {
    let mut claimed: HashMap<String, String> = HashMap::new();
    for doc in store.list_all().unwrap().into_iter().filter(|d| d.is_live()) {
        let id = profile.id_for(&doc.path);
        if let Some(other) = claimed.insert(id.clone(), doc.path.clone()) {
            panic!("step {}: '{}' and '{}' both claim {}", step, other, doc.path, id);
        }
    }
}

fn run(profile: PlatformProfile, seed: u64) {
    let (store, merge) = merge(profile);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut remote_ids = 0;
    for step in 0..150 {
        let event = random_event(&store, &mut rng, &mut remote_ids);
        // Invalid events are dropped by the batch; the property must hold either way.
        let _ = merge.apply_batch(&[event]);
        assert_no_collisions(&store, &profile, step);
    }
}

#[test]
fn test_no_collisions_on_macos() {
    for seed in 0..8 {
        run(PlatformProfile::MACOS, seed);
    }
}

#[test]
fn test_no_collisions_on_windows() {
    for seed in 100..108 {
        run(PlatformProfile::WINDOWS, seed);
    }
}

#[test]
fn test_no_collisions_on_linux() {
    for seed in 200..204 {
        run(PlatformProfile::LINUX, seed);
    }
}
