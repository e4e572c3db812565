//! The coverage index facade: one lock, lazy store construction, and
//! wipe-on-error recovery.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use covmap_error::{CovmapError, Result};
use covmap_store::{IndexStore, StoreStats};
use covmap_types::{FrameworkId, TestId, TestIdentity, TraceRecord};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::IndexConfig;

/// Store lifecycle slot. Construction happens inline under the facade
/// lock, so these three states are the only observable ones.
enum StoreSlot {
    /// Nothing open yet, or the previous store was torn down after an
    /// error. The next access constructs a fresh store.
    Uninitialized,
    Ready(IndexStore),
    /// Terminal. Set by [`CoverageIndex::dispose`].
    Disposed,
}

struct Inner {
    config: IndexConfig,
    slot: Mutex<StoreSlot>,
    /// `true` once dispose has started; wakes the flush thread early.
    shutdown: Mutex<bool>,
    wake: Condvar,
}

/// Single entry point to one on-disk coverage index.
///
/// Every operation takes the same internal lock, so the store underneath
/// never needs locking of its own. Queries are total: whatever goes wrong
/// underneath, the caller sees an empty result and the index heals itself
/// by discarding the on-disk state and rebuilding on the next write.
pub struct CoverageIndex {
    inner: Arc<Inner>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl CoverageIndex {
    /// Set up the facade and its background flush task. The store itself
    /// is not opened here; first access does that under the lock.
    pub fn new(config: IndexConfig) -> Result<Self> {
        let inner = Arc::new(Inner {
            config,
            slot: Mutex::new(StoreSlot::Uninitialized),
            shutdown: Mutex::new(false),
            wake: Condvar::new(),
        });
        let flusher = if inner.config.flush_interval.is_zero() {
            None
        } else {
            let worker = Arc::clone(&inner);
            Some(
                thread::Builder::new()
                    .name("covmap-flush".to_owned())
                    .spawn(move || worker.flush_loop())?,
            )
        };
        debug!(root = %inner.config.root.display(), "coverage index created");
        Ok(Self {
            inner,
            flusher: Mutex::new(flusher),
        })
    }

    /// Tests of `framework` that covered `class::method`.
    pub fn covering_tests(
        &self,
        class: &str,
        method: &str,
        framework: FrameworkId,
    ) -> Vec<TestIdentity> {
        self.inner
            .with_store("covering_tests", |store| {
                let Some(class_id) = store.try_class_id(class) else {
                    return Ok(Vec::new());
                };
                let Some(method_id) = store.try_method_id(method) else {
                    return Ok(Vec::new());
                };
                let resolved = store.covering_tests(class_id, method_id);
                Ok(resolve_tests(store, resolved.present(), Some(framework)))
            })
            .unwrap_or_default()
    }

    /// Tests of any framework whose last run touched `path`.
    pub fn covering_tests_by_file(&self, path: &str) -> Vec<TestIdentity> {
        self.inner
            .with_store("covering_tests_by_file", |store| {
                let Some(file_id) = store.try_file_id(path) else {
                    return Ok(Vec::new());
                };
                let resolved = store.covering_tests_for_file(file_id);
                Ok(resolve_tests(store, resolved.present(), None))
            })
            .unwrap_or_default()
    }

    /// File paths the given test touched on its last recorded run.
    pub fn affected_files(
        &self,
        test_class: &str,
        test_method: &str,
        framework: FrameworkId,
    ) -> Vec<String> {
        let identity = TestIdentity::new(test_class, test_method, framework);
        self.inner
            .with_store("affected_files", |store| {
                let Some(test_id) = store.try_test_id(&identity) else {
                    return Ok(Vec::new());
                };
                let Some(usage) = store.usage(test_id) else {
                    return Ok(Vec::new());
                };
                Ok(usage
                    .files
                    .iter()
                    .filter_map(|&file| store.resolve_file(file).map(str::to_owned))
                    .collect())
            })
            .unwrap_or_default()
    }

    /// Modules whose tests covered `class::method`, for picking a run
    /// target.
    pub fn modules_covering(&self, class: &str, method: &str) -> Vec<String> {
        self.inner
            .with_store("modules_covering", |store| {
                let Some(class_id) = store.try_class_id(class) else {
                    return Ok(Vec::new());
                };
                let Some(method_id) = store.try_method_id(method) else {
                    return Ok(Vec::new());
                };
                let mut modules: Vec<String> = store
                    .modules_for(class_id, method_id)
                    .present()
                    .iter()
                    .filter_map(|&module| store.resolve_module(module).map(str::to_owned))
                    .collect();
                modules.sort_unstable();
                Ok(modules)
            })
            .unwrap_or_default()
    }

    /// Whether the index holds a usage snapshot for this test.
    pub fn has_test_trace(&self, class: &str, method: &str, framework: FrameworkId) -> bool {
        let identity = TestIdentity::new(class, method, framework);
        self.inner
            .with_store("has_test_trace", |store| {
                Ok(store
                    .try_test_id(&identity)
                    .is_some_and(|id| store.has_trace(id)))
            })
            .unwrap_or(false)
    }

    /// Apply one decoded trace record: diff against the test's previous
    /// usage and update the reverse maps. Returns `false` when the index
    /// was unavailable and the record was dropped.
    pub fn update_from_trace(&self, record: &TraceRecord) -> bool {
        self.inner
            .with_store("update_from_trace", |store| store.apply_update(record))
            .is_some()
    }

    /// Drop one test's trace and its reverse-map entries. Returns whether
    /// a trace existed.
    pub fn remove_test_trace(&self, class: &str, method: &str, framework: FrameworkId) -> bool {
        let identity = TestIdentity::new(class, method, framework);
        self.inner
            .with_store("remove_test_trace", |store| {
                match store.try_test_id(&identity) {
                    Some(id) => store.remove_test(id),
                    None => Ok(false),
                }
            })
            .unwrap_or(false)
    }

    /// Current table and log sizes, `None` when the store is unavailable.
    pub fn stats(&self) -> Option<StoreStats> {
        self.inner.with_store("stats", |store| Ok(store.stats()))
    }

    /// Write dirty state to disk now instead of waiting for the
    /// background task. Does not construct a store that is not open.
    pub fn flush_now(&self) {
        self.inner.flush_once();
    }

    /// Flush and close the store, then refuse all further work. Safe to
    /// call more than once.
    pub fn dispose(&self) {
        {
            let mut stopped = self.inner.shutdown.lock();
            *stopped = true;
        }
        self.inner.wake.notify_all();
        if let Some(handle) = self.flusher.lock().take() {
            if handle.join().is_err() {
                warn!("flush thread panicked during shutdown");
            }
        }

        let mut slot = self.inner.slot.lock();
        if let StoreSlot::Ready(store) = &mut *slot {
            if let Err(err) = store.flush_all() {
                warn!(
                    root = %self.inner.config.root.display(),
                    error = %err,
                    "final flush failed during dispose"
                );
            }
        }
        if !matches!(&*slot, StoreSlot::Disposed) {
            *slot = StoreSlot::Disposed;
            debug!(root = %self.inner.config.root.display(), "coverage index disposed");
        }
    }
}

impl Drop for CoverageIndex {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Inner {
    /// Run `f` against the store, constructing it first if needed.
    ///
    /// `None` means the caller gets its empty default: the slot was
    /// disposed, construction failed, or `f` itself failed. A failure
    /// from `f` that signals bad on-disk state tears the store down and
    /// deletes the root directory so the next access starts fresh.
    fn with_store<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut IndexStore) -> Result<R>,
    ) -> Option<R> {
        let mut slot = self.slot.lock();
        if matches!(&*slot, StoreSlot::Disposed) {
            return None;
        }
        if matches!(&*slot, StoreSlot::Uninitialized) {
            match self.construct() {
                Some(store) => *slot = StoreSlot::Ready(store),
                None => return None,
            }
        }
        let StoreSlot::Ready(store) = &mut *slot else {
            return None;
        };
        match f(store) {
            Ok(value) => Some(value),
            Err(err) if err.triggers_rebuild() => {
                self.teardown(&mut slot, &err);
                None
            }
            Err(err) => {
                warn!(op, error = %err, "coverage index operation failed");
                None
            }
        }
    }

    /// First open for this root, with one wipe-and-retry when the
    /// directory is unusable (corruption or another format version).
    fn construct(&self) -> Option<IndexStore> {
        let root = &self.config.root;
        match IndexStore::open(root) {
            Ok(store) => Some(store),
            Err(err) => {
                error!(
                    root = %root.display(),
                    error = %err,
                    "coverage index unusable, discarding on-disk state"
                );
                remove_root(root);
                match IndexStore::open(root) {
                    Ok(store) => {
                        info!(root = %root.display(), "coverage index rebuilt from scratch");
                        Some(store)
                    }
                    Err(err) => {
                        error!(
                            root = %root.display(),
                            error = %err,
                            "coverage index could not be rebuilt"
                        );
                        None
                    }
                }
            }
        }
    }

    /// Corruption recovery: drop the store, delete the directory, leave
    /// the slot uninitialized so the next access reconstructs.
    fn teardown(&self, slot: &mut StoreSlot, err: &CovmapError) {
        error!(
            root = %self.config.root.display(),
            error = %err,
            "coverage index store failed, discarding on-disk state"
        );
        // Replace the slot first so the store's file handles close before
        // the directory goes away.
        *slot = StoreSlot::Uninitialized;
        remove_root(&self.config.root);
    }

    fn flush_loop(&self) {
        let mut stopped = self.shutdown.lock();
        loop {
            if *stopped {
                return;
            }
            let timed_out = self
                .wake
                .wait_for(&mut stopped, self.config.flush_interval)
                .timed_out();
            if *stopped {
                return;
            }
            if timed_out {
                self.flush_once();
            }
        }
    }

    /// Flush if a store is open and dirty. Flush failures take the same
    /// recovery path as any other store error.
    fn flush_once(&self) {
        let mut slot = self.slot.lock();
        if let StoreSlot::Ready(store) = &mut *slot {
            if !store.is_dirty() {
                return;
            }
            if let Err(err) = store.flush_all() {
                self.teardown(&mut slot, &err);
            }
        }
    }
}

fn remove_root(root: &Path) {
    if let Err(err) = fs::remove_dir_all(root) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(
                root = %root.display(),
                error = %err,
                "could not delete index directory"
            );
        }
    }
}

/// Resolve a set of test ids to identities, optionally keeping one
/// framework only. Ids that no longer resolve are skipped; the store has
/// already logged them.
fn resolve_tests(
    store: &IndexStore,
    ids: &BTreeSet<TestId>,
    framework: Option<FrameworkId>,
) -> Vec<TestIdentity> {
    let mut tests: Vec<TestIdentity> = ids
        .iter()
        .filter_map(|&id| store.resolve_test(id))
        .filter(|test| framework.is_none_or(|fw| test.framework == fw))
        .collect();
    tests.sort_unstable();
    tests
}
