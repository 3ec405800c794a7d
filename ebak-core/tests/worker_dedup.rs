use ebak_core::index::{diff, scan, ScanOptions, Snapshot};
use ebak_core::progress::{CancelToken, Progress};
use ebak_core::worker::{hash_file, HashPool};
use ebak_core::{Error, FileStatus, Manifest};
use proptest::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

fn suspects_of(root: &Path, previous: &Manifest) -> Snapshot {
    let current =
        scan(root, &ScanOptions::default(), &Progress::default(), &CancelToken::new()).unwrap();
    diff(&current, previous)
}

fn run(pool: &HashPool, suspects: Snapshot, previous: &Manifest) -> ebak_core::worker::WorkerResult {
    pool.run(suspects, previous, &Progress::default(), &CancelToken::new()).unwrap()
}

fn paths(recs: &[ebak_core::FileRecord]) -> Vec<PathBuf> {
    recs.iter().map(|r| r.path.clone()).collect()
}

#[test]
fn hash_matches_blake3_for_any_buffer() {
    let td = tempfile::tempdir().unwrap();
    let p = td.path().join("blob");
    let mut rng = StdRng::seed_from_u64(7);
    let data: Vec<u8> = (0..300_000).map(|_| rng.gen()).collect();
    fs::write(&p, &data).unwrap();

    let expected = blake3::hash(&data).to_hex().to_string();
    for buf in [1, 4096, 64 * 1024, 1 << 20] {
        assert_eq!(hash_file(&p, buf).unwrap(), expected);
    }
}

#[test]
fn duplicates_pack_exactly_once_at_any_concurrency() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    for name in ["c.txt", "a.txt", "sub/b.txt"] {
        let p = root.join(name);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, b"same bytes").unwrap();
    }
    fs::write(root.join("unique.txt"), b"other bytes").unwrap();

    for workers in [1, 2, 8] {
        let pool = HashPool::new(workers, 64 * 1024 * 1024).unwrap();
        assert_eq!(pool.concurrency(), workers);
        let res = run(&pool, suspects_of(root, &Manifest::empty()), &Manifest::empty());
        assert_eq!(paths(&res.files_to_pack), vec![root.join("a.txt"), root.join("unique.txt")]);
        assert_eq!(paths(&res.metadata_only), vec![root.join("c.txt"), root.join("sub/b.txt")]);
        assert_eq!(res.total_processed, 4);
        assert!(res.failures.is_empty());
        let owner = &res.files_to_pack[0].content_hash;
        assert!(res.metadata_only.iter().all(|r| &r.content_hash == owner));
    }
}

#[test]
fn content_already_stored_is_metadata_only() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    fs::write(root.join("copy1"), b"stored before").unwrap();
    fs::write(root.join("copy2"), b"stored before").unwrap();

    let mut previous = Manifest::empty();
    previous.hash_to_file.insert(
        blake3::hash(b"stored before").to_hex().to_string(),
        PathBuf::from("/elsewhere/original"),
    );
    let pool = HashPool::new(2, 1024).unwrap();
    let res = run(&pool, suspects_of(root, &Manifest::empty()), &previous);
    assert!(res.files_to_pack.is_empty());
    assert_eq!(res.metadata_only.len(), 2);
    assert_eq!(res.pack_bytes(), 0);
}

#[test]
fn unreadable_file_does_not_stop_the_pool() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    fs::write(root.join("ok1"), b"one").unwrap();
    fs::write(root.join("vanishing"), b"two").unwrap();
    fs::write(root.join("ok2"), b"three").unwrap();
    let suspects = suspects_of(root, &Manifest::empty());
    fs::remove_file(root.join("vanishing")).unwrap();

    let pool = HashPool::new(4, 1024).unwrap();
    let res = run(&pool, suspects, &Manifest::empty());
    assert_eq!(res.files_to_pack.len(), 2);
    assert_eq!(res.failures.len(), 1);
    match &res.failures[0] {
        Error::Hash { path, .. } => assert_eq!(path, &root.join("vanishing")),
        other => panic!("unexpected failure {:?}", other),
    }
}

#[test]
fn deleted_suspects_are_not_hashed_and_moves_are_detected() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    fs::write(root.join("old-name"), b"moving content").unwrap();
    let mut previous = Manifest::empty();
    previous.files = scan(root, &ScanOptions::default(), &Progress::default(), &CancelToken::new())
        .unwrap();
    let hash = blake3::hash(b"moving content").to_hex().to_string();
    let old = root.join("old-name");
    previous.files.get_mut(&old).unwrap().content_hash = hash.clone();
    previous.hash_to_file.insert(hash.clone(), old.clone());

    fs::rename(&old, root.join("new-name")).unwrap();
    let suspects = suspects_of(root, &previous);
    assert_eq!(suspects[&old].status, FileStatus::Deleted);

    let pool = HashPool::new(2, 1024).unwrap();
    let res = run(&pool, suspects, &previous);
    assert_eq!(res.total_processed, 1);
    assert!(res.files_to_pack.is_empty());
    assert_eq!(res.metadata_only.len(), 1);
    let moved = &res.metadata_only[0];
    assert_eq!(moved.path, root.join("new-name"));
    assert_eq!(moved.status, FileStatus::Moved);
    assert_eq!(moved.content_hash, hash);
}

#[test]
fn files_are_staged_by_size() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("small"), vec![1u8; 10]).unwrap();
    fs::write(td.path().join("large"), vec![2u8; 5000]).unwrap();

    let pool = HashPool::new(2, 1000).unwrap();
    let res = run(&pool, suspects_of(td.path(), &Manifest::empty()), &Manifest::empty());
    assert_eq!((res.small_files, res.large_files), (1, 1));
    assert_eq!(res.total_size, 5010);
}

#[test]
fn cancellation_discards_results() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("f"), b"data").unwrap();
    let suspects = suspects_of(td.path(), &Manifest::empty());
    let cancel = CancelToken::new();
    cancel.cancel();

    let pool = HashPool::new(2, 1024).unwrap();
    let err = pool.run(suspects, &Manifest::empty(), &Progress::default(), &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn one_owner_per_new_hash(
        contents in prop::collection::vec(0u8..4, 1..10),
        workers in 1usize..6,
    ) {
        let td = tempfile::tempdir().unwrap();
        for (i, c) in contents.iter().enumerate() {
            fs::write(td.path().join(format!("f{}", i)), vec![*c; 16]).unwrap();
        }
        let pool = HashPool::new(workers, 8).unwrap();
        let res = run(&pool, suspects_of(td.path(), &Manifest::empty()), &Manifest::empty());

        let mut packed: BTreeMap<&str, usize> = BTreeMap::new();
        for r in &res.files_to_pack {
            *packed.entry(r.content_hash.as_str()).or_default() += 1;
        }
        let distinct: std::collections::BTreeSet<u8> = contents.iter().copied().collect();
        prop_assert_eq!(packed.len(), distinct.len());
        prop_assert!(packed.values().all(|n| *n == 1));
        prop_assert_eq!(res.files_to_pack.len() + res.metadata_only.len(), contents.len());
        for r in &res.metadata_only {
            prop_assert!(packed.contains_key(r.content_hash.as_str()));
        }
    }
}
