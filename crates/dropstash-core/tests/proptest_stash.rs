//! Property-based tests for the stash matching rules.
//!
//! Each case runs against a fresh temporary stash directory.

use dropstash_core::{MatchOutcome, Stash, StagedFile, StashPaths};
use proptest::prelude::*;
use std::fs;
use tempfile::TempDir;

fn fresh() -> (TempDir, Stash) {
    let dir = TempDir::new().unwrap();
    let paths = StashPaths::under(dir.path());
    paths.ensure().unwrap();
    (dir, Stash::new(paths))
}

fn ingest(stash: &mut Stash, id: &str, data: &[u8]) -> MatchOutcome {
    fs::write(stash.paths().staged_path(id), data).unwrap();
    let staged = StagedFile {
        id: id.to_string(),
        name: "file".to_string(),
        location: "/drop".to_string(),
        overwrite: false,
    };
    stash.apply(&staged).unwrap()
}

fn store_files(stash: &Stash) -> usize {
    fs::read_dir(&stash.paths().store_dir)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_file())
        .count()
}

/// Generator for a non-empty byte string and a cut point inside it.
fn data_and_cut() -> impl Strategy<Value = (Vec<u8>, usize)> {
    proptest::collection::vec(any::<u8>(), 1..6000)
        .prop_flat_map(|data| {
            let len = data.len();
            (Just(data), 1..=len)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Test: a prefix and its longer file fold into one unit of the longer
    /// size, whichever arrives first.
    #[test]
    fn prefix_then_full_or_full_then_prefix((data, cut) in data_and_cut(), prefix_first in any::<bool>()) {
        let (_dir, mut stash) = fresh();
        let prefix = &data[..cut];
        if prefix_first {
            ingest(&mut stash, "first", prefix);
            ingest(&mut stash, "second", &data);
        } else {
            ingest(&mut stash, "first", &data);
            ingest(&mut stash, "second", prefix);
        }

        prop_assert_eq!(stash.len(), 1);
        let node = &stash.nodes()[0];
        prop_assert_eq!(node.id.as_str(), "first");
        prop_assert_eq!(node.size, data.len() as u64);
        prop_assert_eq!(node.pointers.len(), 2);
        prop_assert_eq!(fs::read(stash.paths().unit_path("first")).unwrap(), data.clone());
        prop_assert_eq!(store_files(&stash), 1);
    }

    /// Test: the same bytes twice never grow storage.
    #[test]
    fn same_bytes_twice(data in proptest::collection::vec(any::<u8>(), 0..6000)) {
        let (_dir, mut stash) = fresh();
        ingest(&mut stash, "one", &data);
        let outcome = ingest(&mut stash, "two", &data);
        prop_assert_eq!(outcome, MatchOutcome::Duplicate { id: "one".into(), version: 1 });
        prop_assert_eq!(stash.len(), 1);
        prop_assert_eq!(store_files(&stash), 1);
        prop_assert!(!stash.paths().staged_path("two").exists());
    }

    /// Test: export of any version yields exactly its recorded prefix.
    #[test]
    fn export_matches_prefix((data, cut) in data_and_cut()) {
        let (_dir, mut stash) = fresh();
        ingest(&mut stash, "u", &data[..cut]);
        ingest(&mut stash, "v", &data);
        let out = TempDir::new().unwrap();
        let dest = out.path().join("x");
        let written = stash.export_key("u/file:0", &dest).unwrap();
        prop_assert_eq!(written, cut as u64);
        prop_assert_eq!(fs::read(&dest).unwrap(), data[..cut].to_vec());
    }
}

#[test]
fn disjoint_files_make_distinct_units() {
    let (_dir, mut stash) = fresh();
    ingest(&mut stash, "a", b"alpha");
    ingest(&mut stash, "b", b"bravo!");
    assert_eq!(stash.len(), 2);
    assert!(stash.nodes().iter().all(|n| n.pointers.len() == 1));
}

/// Known policy, not a bug: a file that is a prefix of two units is folded
/// into whichever unit was registered first.
#[test]
fn prefix_of_two_units_goes_to_first_registered() {
    let (_dir, mut stash) = fresh();
    ingest(&mut stash, "a", b"common-prefix/then-a");
    ingest(&mut stash, "b", b"common-prefix/then-b-longer");
    let outcome = ingest(&mut stash, "c", b"common-prefix/");
    assert_eq!(outcome, MatchOutcome::Truncated { id: "a".into(), version: 1 });
    assert_eq!(stash.nodes()[1].pointers.len(), 1);
}

#[test]
fn reload_rebuilds_identical_index() {
    let (_dir, mut stash) = fresh();
    ingest(&mut stash, "a", b"abc");
    ingest(&mut stash, "b", b"abcdef");
    ingest(&mut stash, "c", b"xyz");
    let reloaded = Stash::load(stash.paths().clone()).unwrap();
    assert_eq!(reloaded.index(), stash.index());
    let mut again = reloaded;
    let before = again.index().clone();
    again.rebuild_index();
    assert_eq!(again.index(), &before);
}
