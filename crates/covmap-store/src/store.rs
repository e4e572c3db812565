//! The index store proper: name tables plus keyed record logs.

use std::fs;
use std::path::{Path, PathBuf};

use covmap_diff::diff_usage;
use covmap_error::{CovmapError, Result};
use covmap_log::{NameTable, RecordLog};
use covmap_types::{
    ClassId, Delta, FileId, IdLike, MethodId, MethodKey, ModuleId, ResolvedSet, TestId,
    TestIdentity, TestUsage, TraceRecord,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec;
use crate::version::{INDEX_FORMAT_VERSION, read_version, write_version};

const CLASS_NAMES_FILE: &str = "class-names.cvn";
const METHOD_NAMES_FILE: &str = "method-names.cvn";
const TEST_NAMES_FILE: &str = "test-names.cvn";
const MODULE_NAMES_FILE: &str = "module-names.cvn";
const FILE_NAMES_FILE: &str = "file-names.cvn";
const METHOD_TO_TESTS_FILE: &str = "method-to-tests.cvl";
const TEST_USAGE_FILE: &str = "test-usage.cvl";
const METHOD_TO_MODULES_FILE: &str = "method-to-modules.cvl";
const FILE_TO_TESTS_FILE: &str = "file-to-tests.cvl";

const METHOD_TO_TESTS_MAGIC: [u8; 4] = *b"CVMT";
const TEST_USAGE_MAGIC: [u8; 4] = *b"CVTU";
const METHOD_TO_MODULES_MAGIC: [u8; 4] = *b"CVMM";
const FILE_TO_TESTS_MAGIC: [u8; 4] = *b"CVFT";

const STORE_FILES: [&str; 9] = [
    CLASS_NAMES_FILE,
    METHOD_NAMES_FILE,
    TEST_NAMES_FILE,
    MODULE_NAMES_FILE,
    FILE_NAMES_FILE,
    METHOD_TO_TESTS_FILE,
    TEST_USAGE_FILE,
    METHOD_TO_MODULES_FILE,
    FILE_TO_TESTS_FILE,
];

/// Exclusive owner of one on-disk index root.
///
/// Everything is loaded into memory at open time, so queries never touch
/// the filesystem and cannot fail; only open, update, and flush can. The
/// store has no internal locking — the facade serializes all access.
#[derive(Debug)]
pub struct IndexStore {
    root: PathBuf,
    class_names: NameTable,
    method_names: NameTable,
    test_names: NameTable,
    module_names: NameTable,
    file_names: NameTable,
    method_to_tests: RecordLog,
    test_usage: RecordLog,
    method_to_modules: RecordLog,
    file_to_tests: RecordLog,
}

impl IndexStore {
    /// Open the store under `root`, creating a fresh one if the directory
    /// is empty. An unexpected schema version (including a missing version
    /// file next to existing data) is reported as [`CovmapError::VersionMismatch`]
    /// so the owner wipes and rebuilds instead of migrating.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;

        match read_version(root)? {
            Some(version) if version == INDEX_FORMAT_VERSION => {}
            Some(version) => {
                return Err(CovmapError::VersionMismatch {
                    found: version,
                    expected: INDEX_FORMAT_VERSION,
                });
            }
            None => {
                if store_files_exist(root) {
                    return Err(CovmapError::VersionMismatch {
                        found: 0,
                        expected: INDEX_FORMAT_VERSION,
                    });
                }
                write_version(root, INDEX_FORMAT_VERSION)?;
            }
        }

        let store = Self {
            root: root.to_path_buf(),
            class_names: NameTable::open(&root.join(CLASS_NAMES_FILE))?,
            method_names: NameTable::open(&root.join(METHOD_NAMES_FILE))?,
            test_names: NameTable::open(&root.join(TEST_NAMES_FILE))?,
            module_names: NameTable::open(&root.join(MODULE_NAMES_FILE))?,
            file_names: NameTable::open(&root.join(FILE_NAMES_FILE))?,
            method_to_tests: RecordLog::open(
                &root.join(METHOD_TO_TESTS_FILE),
                METHOD_TO_TESTS_MAGIC,
            )?,
            test_usage: RecordLog::open_latest_only(
                &root.join(TEST_USAGE_FILE),
                TEST_USAGE_MAGIC,
            )?,
            method_to_modules: RecordLog::open(
                &root.join(METHOD_TO_MODULES_FILE),
                METHOD_TO_MODULES_MAGIC,
            )?,
            file_to_tests: RecordLog::open(&root.join(FILE_TO_TESTS_FILE), FILE_TO_TESTS_MAGIC)?,
        };

        info!(
            root = %root.display(),
            tests = store.test_names.len(),
            classes = store.class_names.len(),
            method_keys = store.method_to_tests.key_count(),
            "opened index store"
        );
        Ok(store)
    }

    /// Root directory this store owns.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Tests currently covering `(class, method)`.
    #[must_use]
    pub fn covering_tests(&self, class: ClassId, method: MethodId) -> ResolvedSet<TestId> {
        let key = MethodKey::new(class, method);
        replay_deltas(&self.method_to_tests, key.raw())
    }

    /// Tests whose latest run touched `file`.
    #[must_use]
    pub fn covering_tests_for_file(&self, file: FileId) -> ResolvedSet<TestId> {
        replay_deltas(&self.file_to_tests, file_key(file))
    }

    /// Modules containing tests that cover `(class, method)`.
    #[must_use]
    pub fn modules_for(&self, class: ClassId, method: MethodId) -> ResolvedSet<ModuleId> {
        let key = MethodKey::new(class, method);
        replay_deltas(&self.method_to_modules, key.raw())
    }

    /// The usage snapshot stored for `test`, if any. A tombstoned or
    /// undecodable snapshot reads as absent.
    #[must_use]
    pub fn usage(&self, test: TestId) -> Option<TestUsage> {
        let chunk = self.test_usage.latest(test_key(test))?;
        match codec::decode_usage(chunk) {
            Ok(usage) => usage,
            Err(err) => {
                warn!(
                    test = test.get(),
                    error = %err,
                    "skipping undecodable usage snapshot"
                );
                None
            }
        }
    }

    /// Whether a live (non-tombstoned) usage snapshot exists for `test`.
    #[must_use]
    pub fn has_trace(&self, test: TestId) -> bool {
        self.test_usage
            .latest(test_key(test))
            .is_some_and(|chunk| !chunk.is_empty())
    }

    /// Fold one observed coverage trace into the index.
    ///
    /// New names are interned, the new usage is diffed against the stored
    /// snapshot, and only the changed edges get delta entries. Removals are
    /// appended before additions so replay converges even if a crash splits
    /// the two. The new snapshot then replaces the old one (or tombstones
    /// it when the test no longer covers anything).
    pub fn apply_update(&mut self, record: &TraceRecord) -> Result<()> {
        let test = self.enumerate_test(&record.test)?;
        let module = match &record.module {
            Some(name) => Some(wrap_id::<ModuleId>(self.module_names.enumerate(name)?)?),
            None => None,
        };

        let mut new_usage = TestUsage::new();
        new_usage.module = module;
        for (class_name, method_names) in &record.covered_methods {
            let class = wrap_id::<ClassId>(self.class_names.enumerate(class_name)?)?;
            for method_name in method_names {
                let method = wrap_id::<MethodId>(self.method_names.enumerate(method_name)?)?;
                new_usage.add_method(class, method);
            }
        }
        for path in &record.affected_files {
            let file = wrap_id::<FileId>(self.file_names.enumerate(path)?)?;
            new_usage.add_file(file);
        }

        let old_usage = self.usage(test).unwrap_or_default();
        let had_trace = self.has_trace(test);
        let diff = diff_usage(&old_usage, &new_usage);

        // Removals first: if a crash splits the update, a stray tombstone
        // only parks a pending removal, while a stray add would resurrect
        // coverage the test no longer has.
        for (class, methods) in &diff.removed_methods {
            for method in methods {
                let key = MethodKey::new(*class, *method);
                self.method_to_tests
                    .append(key.raw(), &codec::encode_delta(Delta::Removed(test)))?;
            }
        }
        for file in &diff.removed_files {
            self.file_to_tests
                .append(file_key(*file), &codec::encode_delta(Delta::Removed(test)))?;
        }

        for (class, methods) in &diff.added_methods {
            for method in methods {
                let key = MethodKey::new(*class, *method);
                self.method_to_tests
                    .append(key.raw(), &codec::encode_delta(Delta::Added(test)))?;
                if let Some(module) = module {
                    self.method_to_modules
                        .append(key.raw(), &codec::encode_delta(Delta::Added(module)))?;
                }
            }
        }
        for file in &diff.added_files {
            self.file_to_tests
                .append(file_key(*file), &codec::encode_delta(Delta::Added(test)))?;
        }

        if new_usage.is_empty() {
            if had_trace {
                self.test_usage.append(test_key(test), &[])?;
            }
        } else {
            self.test_usage
                .append(test_key(test), &codec::encode_usage(&new_usage)?)?;
        }

        debug!(
            test = %record.test,
            added_methods = diff.added_methods.iter().map(|(_, m)| m.len()).sum::<usize>(),
            removed_methods = diff.removed_methods.iter().map(|(_, m)| m.len()).sum::<usize>(),
            added_files = diff.added_files.len(),
            removed_files = diff.removed_files.len(),
            "applied coverage update"
        );
        Ok(())
    }

    /// Drop everything recorded for `test`: emit removal deltas for all of
    /// its coverage and tombstone its snapshot. Returns whether a snapshot
    /// existed. Module associations stay; they are not attributable to a
    /// single test once written.
    pub fn remove_test(&mut self, test: TestId) -> Result<bool> {
        let Some(usage) = self.usage(test) else {
            return Ok(false);
        };

        for (class, methods) in &usage.methods {
            for method in methods {
                let key = MethodKey::new(*class, *method);
                self.method_to_tests
                    .append(key.raw(), &codec::encode_delta(Delta::Removed(test)))?;
            }
        }
        for file in &usage.files {
            self.file_to_tests
                .append(file_key(*file), &codec::encode_delta(Delta::Removed(test)))?;
        }
        self.test_usage.append(test_key(test), &[])?;

        debug!(test = test.get(), "removed test trace");
        Ok(true)
    }

    /// Id lookups that never allocate; `None` means "name never seen", and
    /// for queries that is simply an empty result.
    #[must_use]
    pub fn try_class_id(&self, name: &str) -> Option<ClassId> {
        ClassId::new(self.class_names.try_enumerate(name)?)
    }

    #[must_use]
    pub fn try_method_id(&self, name: &str) -> Option<MethodId> {
        MethodId::new(self.method_names.try_enumerate(name)?)
    }

    #[must_use]
    pub fn try_test_id(&self, identity: &TestIdentity) -> Option<TestId> {
        TestId::new(self.test_names.try_enumerate(&identity.encode())?)
    }

    #[must_use]
    pub fn try_file_id(&self, path: &str) -> Option<FileId> {
        FileId::new(self.file_names.try_enumerate(path)?)
    }

    #[must_use]
    pub fn try_module_id(&self, name: &str) -> Option<ModuleId> {
        ModuleId::new(self.module_names.try_enumerate(name)?)
    }

    /// Decode the identity behind a test id handed back by a query.
    #[must_use]
    pub fn resolve_test(&self, test: TestId) -> Option<TestIdentity> {
        let encoded = self.test_names.resolve(test.raw())?;
        let identity = TestIdentity::decode(encoded);
        if identity.is_none() {
            warn!(
                test = test.get(),
                name = encoded,
                "test name table entry is not a valid test identity"
            );
        }
        identity
    }

    #[must_use]
    pub fn resolve_file(&self, file: FileId) -> Option<&str> {
        self.file_names.resolve(file.raw())
    }

    #[must_use]
    pub fn resolve_module(&self, module: ModuleId) -> Option<&str> {
        self.module_names.resolve(module.raw())
    }

    /// Size counters for diagnostics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            class_names: self.class_names.len(),
            method_names: self.method_names.len(),
            test_names: self.test_names.len(),
            module_names: self.module_names.len(),
            file_names: self.file_names.len(),
            tracked_method_keys: self.method_to_tests.key_count(),
            tracked_file_keys: self.file_to_tests.key_count(),
            coverage_deltas: self.method_to_tests.record_count(),
            file_deltas: self.file_to_tests.record_count(),
            module_links: self.method_to_modules.record_count(),
            usage_snapshots: self.test_usage.record_count(),
        }
    }

    /// Flush every component. Name tables go first so any id referenced by
    /// a flushed log frame is itself durable.
    pub fn flush_all(&mut self) -> Result<()> {
        self.class_names.flush()?;
        self.method_names.flush()?;
        self.test_names.flush()?;
        self.module_names.flush()?;
        self.file_names.flush()?;
        self.method_to_tests.flush()?;
        self.test_usage.flush()?;
        self.method_to_modules.flush()?;
        self.file_to_tests.flush()?;
        Ok(())
    }

    /// Whether any component has unflushed writes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.class_names.is_dirty()
            || self.method_names.is_dirty()
            || self.test_names.is_dirty()
            || self.module_names.is_dirty()
            || self.file_names.is_dirty()
            || self.method_to_tests.is_dirty()
            || self.test_usage.is_dirty()
            || self.method_to_modules.is_dirty()
            || self.file_to_tests.is_dirty()
    }

    fn enumerate_test(&mut self, identity: &TestIdentity) -> Result<TestId> {
        wrap_id(self.test_names.enumerate(&identity.encode())?)
    }
}

/// Size counters reported by [`IndexStore::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub class_names: usize,
    pub method_names: usize,
    pub test_names: usize,
    pub module_names: usize,
    pub file_names: usize,
    pub tracked_method_keys: usize,
    pub tracked_file_keys: usize,
    pub coverage_deltas: u64,
    pub file_deltas: u64,
    pub module_links: u64,
    pub usage_snapshots: u64,
}

fn store_files_exist(root: &Path) -> bool {
    STORE_FILES.iter().any(|name| root.join(name).exists())
}

fn wrap_id<T: IdLike>(raw: u32) -> Result<T> {
    T::from_raw(raw).ok_or_else(|| CovmapError::internal("name table assigned id 0"))
}

fn test_key(test: TestId) -> u64 {
    u64::from(test.raw())
}

fn file_key(file: FileId) -> u64 {
    u64::from(file.raw())
}

fn replay_deltas<T: IdLike>(log: &RecordLog, key: u64) -> ResolvedSet<T> {
    let mut set = ResolvedSet::new();
    for chunk in log.chunks(key) {
        match codec::decode_delta::<T>(chunk) {
            Ok(delta) => set.apply(delta),
            Err(err) => warn!(
                path = %log.path().display(),
                key,
                error = %err,
                "skipping undecodable delta chunk"
            ),
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use covmap_types::FrameworkId;
    use tempfile::tempdir;

    use super::*;

    fn record(
        class: &str,
        method: &str,
        covered: &[(&str, &[&str])],
        files: &[&str],
        module: Option<&str>,
    ) -> TraceRecord {
        let mut covered_methods = BTreeMap::new();
        for (covered_class, methods) in covered {
            covered_methods.insert(
                (*covered_class).to_owned(),
                methods.iter().map(|m| (*m).to_owned()).collect(),
            );
        }
        TraceRecord {
            test: TestIdentity::new(class, method, FrameworkId::JUNIT),
            covered_methods,
            affected_files: files.iter().map(|f| (*f).to_owned()).collect(),
            module: module.map(str::to_owned),
        }
    }

    fn covering_names(store: &IndexStore, class: &str, method: &str) -> Vec<String> {
        let Some(class_id) = store.try_class_id(class) else {
            return Vec::new();
        };
        let Some(method_id) = store.try_method_id(method) else {
            return Vec::new();
        };
        store
            .covering_tests(class_id, method_id)
            .present()
            .iter()
            .filter_map(|id| store.resolve_test(*id))
            .map(|identity| identity.to_string())
            .collect()
    }

    #[test]
    fn fresh_root_records_schema_version() {
        let dir = tempdir().expect("tempdir");
        let store = IndexStore::open(dir.path()).expect("open");
        assert_eq!(
            read_version(dir.path()).expect("read version"),
            Some(INDEX_FORMAT_VERSION)
        );
        // A second open on the same root succeeds.
        drop(store);
        IndexStore::open(dir.path()).expect("reopen");
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let dir = tempdir().expect("tempdir");
        write_version(dir.path(), INDEX_FORMAT_VERSION - 1).expect("write old version");
        let err = IndexStore::open(dir.path()).expect_err("old version must be rejected");
        assert!(matches!(
            err,
            CovmapError::VersionMismatch { found, expected }
                if found == INDEX_FORMAT_VERSION - 1 && expected == INDEX_FORMAT_VERSION
        ));
    }

    #[test]
    fn data_without_version_file_is_rejected() {
        let dir = tempdir().expect("tempdir");
        {
            let mut store = IndexStore::open(dir.path()).expect("open");
            store
                .apply_update(&record(
                    "com.foo.Bar",
                    "testBaz",
                    &[("com.foo.Baz", &["qux"])],
                    &[],
                    None,
                ))
                .expect("update");
            store.flush_all().expect("flush");
        }
        fs::remove_file(dir.path().join(crate::version::VERSION_FILE_NAME))
            .expect("drop version file");

        let err = IndexStore::open(dir.path()).expect_err("missing version must be rejected");
        assert!(matches!(err, CovmapError::VersionMismatch { found: 0, .. }));
    }

    #[test]
    fn update_then_query_round_trip() {
        let dir = tempdir().expect("tempdir");
        let mut store = IndexStore::open(dir.path()).expect("open");

        store
            .apply_update(&record(
                "com.foo.Bar",
                "testBaz",
                &[("com.foo.Baz", &["qux"])],
                &[],
                Some("moduleA"),
            ))
            .expect("update");

        assert_eq!(
            covering_names(&store, "com.foo.Baz", "qux"),
            vec!["com.foo.Bar.testBaz".to_owned()]
        );

        let class = store.try_class_id("com.foo.Baz").expect("class id");
        let method = store.try_method_id("qux").expect("method id");
        let modules = store.modules_for(class, method);
        let module_names: Vec<&str> = modules
            .present()
            .iter()
            .filter_map(|id| store.resolve_module(*id))
            .collect();
        assert_eq!(module_names, vec!["moduleA"]);

        let test = store
            .try_test_id(&TestIdentity::new("com.foo.Bar", "testBaz", FrameworkId::JUNIT))
            .expect("test id");
        assert!(store.has_trace(test));
        let usage = store.usage(test).expect("usage snapshot");
        assert_eq!(usage.method_count(), 1);
    }

    #[test]
    fn rerun_diff_moves_coverage() {
        let dir = tempdir().expect("tempdir");
        let mut store = IndexStore::open(dir.path()).expect("open");

        store
            .apply_update(&record(
                "com.foo.Bar",
                "testBaz",
                &[("com.foo.X", &["m1", "m2"])],
                &[],
                None,
            ))
            .expect("first run");
        store
            .apply_update(&record(
                "com.foo.Bar",
                "testBaz",
                &[("com.foo.X", &["m2", "m3"])],
                &[],
                None,
            ))
            .expect("second run");

        assert!(covering_names(&store, "com.foo.X", "m1").is_empty());
        assert_eq!(
            covering_names(&store, "com.foo.X", "m2"),
            vec!["com.foo.Bar.testBaz".to_owned()]
        );
        assert_eq!(
            covering_names(&store, "com.foo.X", "m3"),
            vec!["com.foo.Bar.testBaz".to_owned()]
        );
    }

    #[test]
    fn empty_rerun_removes_trace_and_coverage() {
        let dir = tempdir().expect("tempdir");
        let mut store = IndexStore::open(dir.path()).expect("open");

        store
            .apply_update(&record(
                "com.foo.Bar",
                "testBaz",
                &[("com.foo.X", &["m1"])],
                &["src/X.java"],
                None,
            ))
            .expect("first run");
        store
            .apply_update(&record("com.foo.Bar", "testBaz", &[], &[], None))
            .expect("empty run");

        assert!(covering_names(&store, "com.foo.X", "m1").is_empty());
        let test = store
            .try_test_id(&TestIdentity::new("com.foo.Bar", "testBaz", FrameworkId::JUNIT))
            .expect("test id");
        assert!(!store.has_trace(test));
        assert!(store.usage(test).is_none());

        let file = store.try_file_id("src/X.java").expect("file id");
        assert!(store.covering_tests_for_file(file).is_empty());
    }

    #[test]
    fn identical_rerun_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let mut store = IndexStore::open(dir.path()).expect("open");

        let trace = record(
            "com.foo.Bar",
            "testBaz",
            &[("com.foo.X", &["m1"])],
            &["src/X.java"],
            Some("moduleA"),
        );
        store.apply_update(&trace).expect("first run");
        let deltas_after_first = store.stats().coverage_deltas;
        store.apply_update(&trace).expect("second run");

        assert_eq!(
            covering_names(&store, "com.foo.X", "m1"),
            vec!["com.foo.Bar.testBaz".to_owned()]
        );
        assert_eq!(
            store.stats().coverage_deltas,
            deltas_after_first,
            "a no-change rerun must not grow the delta log"
        );
    }

    #[test]
    fn remove_test_drops_all_edges() {
        let dir = tempdir().expect("tempdir");
        let mut store = IndexStore::open(dir.path()).expect("open");

        store
            .apply_update(&record(
                "com.foo.Bar",
                "testBaz",
                &[("com.foo.X", &["m1", "m2"])],
                &["src/X.java"],
                None,
            ))
            .expect("update");
        let test = store
            .try_test_id(&TestIdentity::new("com.foo.Bar", "testBaz", FrameworkId::JUNIT))
            .expect("test id");

        assert!(store.remove_test(test).expect("remove"));
        assert!(covering_names(&store, "com.foo.X", "m1").is_empty());
        assert!(covering_names(&store, "com.foo.X", "m2").is_empty());
        assert!(!store.has_trace(test));

        // Removing again is a no-op.
        assert!(!store.remove_test(test).expect("second remove"));
    }

    #[test]
    fn distinct_frameworks_are_distinct_tests() {
        let dir = tempdir().expect("tempdir");
        let mut store = IndexStore::open(dir.path()).expect("open");

        let mut junit = record("com.foo.Bar", "testBaz", &[("com.foo.X", &["m1"])], &[], None);
        junit.test.framework = FrameworkId::JUNIT;
        let mut testng = junit.clone();
        testng.test.framework = FrameworkId::TESTNG;

        store.apply_update(&junit).expect("junit update");
        store.apply_update(&testng).expect("testng update");

        let class = store.try_class_id("com.foo.X").expect("class id");
        let method = store.try_method_id("m1").expect("method id");
        let covering = store.covering_tests(class, method);
        assert_eq!(covering.present().len(), 2);

        let frameworks: Vec<FrameworkId> = covering
            .present()
            .iter()
            .filter_map(|id| store.resolve_test(*id))
            .map(|identity| identity.framework)
            .collect();
        assert!(frameworks.contains(&FrameworkId::JUNIT));
        assert!(frameworks.contains(&FrameworkId::TESTNG));
    }

    #[test]
    fn file_reverse_map_tracks_affected_files() {
        let dir = tempdir().expect("tempdir");
        let mut store = IndexStore::open(dir.path()).expect("open");

        store
            .apply_update(&record(
                "com.foo.Bar",
                "testBaz",
                &[],
                &["src/A.java", "src/B.java"],
                None,
            ))
            .expect("first run");
        store
            .apply_update(&record("com.foo.Bar", "testBaz", &[], &["src/B.java"], None))
            .expect("second run");

        let a = store.try_file_id("src/A.java").expect("file id");
        let b = store.try_file_id("src/B.java").expect("file id");
        assert!(store.covering_tests_for_file(a).is_empty());
        assert_eq!(store.covering_tests_for_file(b).present().len(), 1);
    }

    #[test]
    fn flushed_state_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        {
            let mut store = IndexStore::open(dir.path()).expect("open");
            store
                .apply_update(&record(
                    "com.foo.Bar",
                    "testBaz",
                    &[("com.foo.Baz", &["qux"])],
                    &["src/Baz.java"],
                    Some("moduleA"),
                ))
                .expect("update");
            assert!(store.is_dirty());
            store.flush_all().expect("flush");
            assert!(!store.is_dirty());
        }

        let store = IndexStore::open(dir.path()).expect("reopen");
        assert_eq!(
            covering_names(&store, "com.foo.Baz", "qux"),
            vec!["com.foo.Bar.testBaz".to_owned()]
        );
        let stats = store.stats();
        assert_eq!(stats.test_names, 1);
        assert_eq!(stats.tracked_method_keys, 1);
        assert_eq!(stats.tracked_file_keys, 1);
        assert_eq!(stats.usage_snapshots, 1);
    }

    #[test]
    fn stats_serialize_to_json() {
        let dir = tempdir().expect("tempdir");
        let store = IndexStore::open(dir.path()).expect("open");
        let json = serde_json::to_value(store.stats()).expect("serialize stats");
        assert_eq!(json["test_names"], 0);
        assert_eq!(json["coverage_deltas"], 0);
    }
}
