//! The index's only answer to bad on-disk state is wipe-and-rebuild:
//! injected I/O failures, damaged log files, and format version changes
//! must all end with the root directory deleted, queries degrading to
//! empty results, and the next write starting a fresh index.

use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use covmap::{CoverageIndex, FrameworkId, IndexConfig, TestIdentity, TraceRecord};
use covmap_log::failpoint;
use covmap_store::INDEX_FORMAT_VERSION;
use tempfile::tempdir;

// ─── Helpers ───────────────────────────────────────────────────────────

fn manual_config(root: &Path) -> IndexConfig {
    IndexConfig::new(root).with_flush_interval(Duration::ZERO)
}

fn record(test_method: &str, covered_method: &str) -> TraceRecord {
    let mut record = TraceRecord::new(TestIdentity::new(
        "com.foo.BarTest",
        test_method,
        FrameworkId::JUNIT,
    ));
    record
        .covered_methods
        .insert("com.foo.ClassX".to_owned(), vec![covered_method.to_owned()]);
    record
}

fn covering(index: &CoverageIndex, method: &str) -> Vec<String> {
    index
        .covering_tests("com.foo.ClassX", method, FrameworkId::JUNIT)
        .into_iter()
        .map(|test| test.to_string())
        .collect()
}

// ─── Tests ─────────────────────────────────────────────────────────────

#[test]
fn injected_io_failure_wipes_and_heals() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("idx");
    let index = CoverageIndex::new(manual_config(&root)).expect("index");

    // Materialize a healthy store first.
    assert!(index.update_from_trace(&record("testOk", "m1")));
    assert!(root.exists());

    // Failpoints are thread-local and one-shot; the facade runs store
    // operations on the calling thread, so this arms exactly the next
    // append below.
    failpoint::reset();
    failpoint::arm_append_failure();
    assert!(
        !index.update_from_trace(&record("testBoom", "m2")),
        "the poisoned update must be dropped"
    );
    assert!(
        !root.exists(),
        "a failed store operation must delete the index root"
    );

    // Queries degrade to empty and quietly reconstruct an empty store.
    assert!(covering(&index, "m1").is_empty());
    assert!(root.exists(), "the query should have rebuilt a fresh root");

    // The index is fully usable again.
    assert!(index.update_from_trace(&record("testAfter", "m3")));
    assert_eq!(covering(&index, "m3"), vec!["com.foo.BarTest.testAfter"]);
    failpoint::reset();
}

#[test]
fn flush_failure_takes_the_same_recovery_path() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("idx");
    let index = CoverageIndex::new(manual_config(&root)).expect("index");

    assert!(index.update_from_trace(&record("testDirty", "m1")));

    failpoint::reset();
    failpoint::arm_flush_failure();
    index.flush_now();

    assert!(!root.exists(), "a failed flush must delete the index root");
    assert!(covering(&index, "m1").is_empty());
    assert!(index.update_from_trace(&record("testAfter", "m2")));
    assert_eq!(covering(&index, "m2"), vec!["com.foo.BarTest.testAfter"]);
    failpoint::reset();
}

#[test]
fn damaged_log_file_forces_rebuild_on_open() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("idx");

    {
        let index = CoverageIndex::new(manual_config(&root)).expect("index");
        // Two covered methods produce two coverage delta frames, so
        // damaging the first leaves bytes after it — corruption, not a
        // tolerable torn tail.
        let mut trace = record("testVictim", "m1");
        trace
            .covered_methods
            .get_mut("com.foo.ClassX")
            .expect("class entry")
            .push("m2".to_owned());
        assert!(index.update_from_trace(&trace));
        index.dispose();
    }

    // Flip the first payload byte of the first frame: 24-byte file
    // header, then 12 bytes of frame header.
    let log_path = root.join("method-to-tests.cvl");
    let mut file = fs::OpenOptions::new()
        .write(true)
        .open(&log_path)
        .expect("open log");
    file.seek(SeekFrom::Start(36)).expect("seek");
    file.write_all(&[0xFF]).expect("damage payload");
    drop(file);

    let index = CoverageIndex::new(manual_config(&root)).expect("reopen");
    assert!(
        covering(&index, "m1").is_empty(),
        "corrupted state must be discarded, not partially read"
    );
    assert!(index.update_from_trace(&record("testFresh", "m9")));
    assert_eq!(covering(&index, "m9"), vec!["com.foo.BarTest.testFresh"]);
}

#[test]
fn version_mismatch_is_wiped_not_migrated() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("idx");

    {
        let index = CoverageIndex::new(manual_config(&root)).expect("index");
        assert!(index.update_from_trace(&record("testOld", "m1")));
        index.dispose();
    }

    fs::write(root.join("index.version"), "99\n").expect("fake other version");

    let index = CoverageIndex::new(manual_config(&root)).expect("reopen");
    assert!(
        covering(&index, "m1").is_empty(),
        "data recorded under another format version must not survive"
    );
    assert!(index.update_from_trace(&record("testNew", "m2")));
    assert_eq!(covering(&index, "m2"), vec!["com.foo.BarTest.testNew"]);

    let version: u32 = fs::read_to_string(root.join("index.version"))
        .expect("version file")
        .trim()
        .parse()
        .expect("numeric version");
    assert_eq!(version, INDEX_FORMAT_VERSION);
}

#[test]
fn data_without_version_file_is_discarded() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("idx");

    {
        let index = CoverageIndex::new(manual_config(&root)).expect("index");
        assert!(index.update_from_trace(&record("testOld", "m1")));
        index.dispose();
    }

    fs::remove_file(root.join("index.version")).expect("drop version file");

    let index = CoverageIndex::new(manual_config(&root)).expect("reopen");
    assert!(covering(&index, "m1").is_empty());
    assert!(index.update_from_trace(&record("testNew", "m2")));
    assert_eq!(covering(&index, "m2"), vec!["com.foo.BarTest.testNew"]);
}
