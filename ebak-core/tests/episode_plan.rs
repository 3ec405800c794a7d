use chrono::Utc;
use ebak_core::episode::plan;
use ebak_core::{Error, FileRecord, FileStatus};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::path::PathBuf;

fn rec(name: &str, size: u64) -> FileRecord {
    FileRecord {
        path: PathBuf::from("/ws").join(name),
        name: name.to_string(),
        size,
        mod_time: Utc::now(),
        content_hash: format!("h-{}", name),
        status: FileStatus::New,
    }
}

fn names(files: &[PathBuf]) -> Vec<String> {
    files.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect()
}

#[test]
fn greedy_split_in_input_order() {
    let files = vec![rec("a", 40), rec("b", 40), rec("c", 40)];
    let batches = plan(&files, 100, u64::MAX).unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(names(&batches[0].files), ["a", "b"]);
    assert_eq!(batches[0].size, 80);
    assert_eq!(names(&batches[1].files), ["c"]);
    assert_eq!(batches[1].size, 40);
}

#[test]
fn oversize_file_travels_alone() {
    let files = vec![rec("a", 10), rec("huge", 500), rec("b", 10)];
    let batches = plan(&files, 100, u64::MAX).unwrap();
    assert_eq!(batches.len(), 3);
    assert_eq!(names(&batches[1].files), ["huge"]);
    assert!(batches[1].is_oversize(100));
    assert!(!batches[0].is_oversize(100));
}

#[test]
fn exact_fit_stays_together() {
    let files = vec![rec("a", 50), rec("b", 50), rec("c", 1)];
    let batches = plan(&files, 100, u64::MAX).unwrap();
    assert_eq!(names(&batches[0].files), ["a", "b"]);
    assert_eq!(names(&batches[1].files), ["c"]);
}

#[test]
fn empty_input_plans_nothing() {
    assert!(plan(&[], 100, 0).unwrap().is_empty());
}

#[test]
fn total_over_ceiling_is_refused() {
    let files = vec![rec("a", 60), rec("b", 60)];
    match plan(&files, 100, 100) {
        Err(Error::LimitExceeded { requested, limit }) => {
            assert_eq!(requested, 120);
            assert_eq!(limit, 100);
        }
        other => panic!("expected LimitExceeded, got {:?}", other),
    }
}

proptest! {
    #[test]
    fn batches_respect_ceiling_and_cover_input(
        sizes in prop::collection::vec(0u64..300, 0..40),
        max in 1u64..200,
    ) {
        let files: Vec<FileRecord> =
            sizes.iter().enumerate().map(|(i, s)| rec(&format!("f{:03}", i), *s)).collect();
        let batches = plan(&files, max, u64::MAX).unwrap();

        for b in &batches {
            prop_assert!(!b.files.is_empty());
            prop_assert!(b.size <= max || b.files.len() == 1);
        }

        let flat: Vec<PathBuf> = batches.iter().flat_map(|b| b.files.clone()).collect();
        let input: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
        prop_assert_eq!(&flat, &input);
        let unique: BTreeSet<&PathBuf> = flat.iter().collect();
        prop_assert_eq!(unique.len(), flat.len());
    }
}
