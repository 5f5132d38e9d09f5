//! Reactive state host.
//!
//! Owns the canonical state tree and the derived layer (memoized getters and
//! watchers) built over it.
//!
//! # Dependency tracking
//!
//! Every state read made while a getter or watcher evaluates records the
//! path it read into the evaluation frame on top of a thread-local stack.
//! Every write notifies the path it changed. A memo is stale once one of its
//! dependency paths overlaps a changed path (one is an ancestor of the
//! other), so a write under `cart` never invalidates a getter that only read
//! `user`.
//!
//! A getter that reads another getter inherits that getter's dependencies.
//!
//! Every change also bumps a host-wide generation. An evaluation that saw
//! the generation move while it ran returns its value without memoizing it,
//! since a write on another thread may have landed after its reads.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::path::ModulePath;
use crate::store::Store;

/// A getter with its module context already bound.
pub(crate) type WrappedGetter = Arc<dyn Fn(&Store) -> Value + Send + Sync>;

/// Source of a watcher: a tracked computation over the store.
pub type WatchFn = Arc<dyn Fn(&Store) -> Value + Send + Sync>;

/// Watcher callback: `(new value, old value)`.
pub type WatchCallback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// Handle for a watcher, returned by `Store::watch()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

type DepSet = BTreeSet<ModulePath>;

/// Watcher flush rounds before giving up on a watcher that keeps
/// re-triggering itself.
const MAX_FLUSH_ROUNDS: usize = 100;

thread_local! {
    static TRACKING: RefCell<Vec<DepSet>> = const { RefCell::new(Vec::new()) };
    /// Set while a mutation handler runs on this thread with the state tree
    /// write-locked.
    static MUTATING: Cell<bool> = const { Cell::new(false) };
}

/// Report and refuse store access from inside a mutation handler, which
/// would otherwise block on the state lock the handler's commit holds.
fn reentered(op: &str) -> bool {
    let inside = MUTATING.with(Cell::get);
    if inside {
        error!("{} from inside a mutation handler is not supported", op);
    }
    inside
}

fn track(path: &ModulePath) {
    TRACKING.with(|frames| {
        if let Some(top) = frames.borrow_mut().last_mut() {
            top.insert(path.clone());
        }
    });
}

fn track_all(deps: &DepSet) {
    TRACKING.with(|frames| {
        if let Some(top) = frames.borrow_mut().last_mut() {
            top.extend(deps.iter().cloned());
        }
    });
}

/// Run `f` inside a fresh tracking frame and return what it read.
fn tracked<R>(f: impl FnOnce() -> R) -> (R, DepSet) {
    struct Frame {
        done: bool,
    }
    impl Drop for Frame {
        fn drop(&mut self) {
            if !self.done {
                TRACKING.with(|frames| {
                    frames.borrow_mut().pop();
                });
            }
        }
    }

    TRACKING.with(|frames| frames.borrow_mut().push(DepSet::new()));
    let mut frame = Frame { done: false };
    let value = f();
    frame.done = true;
    let deps = TRACKING
        .with(|frames| frames.borrow_mut().pop())
        .unwrap_or_default();
    (value, deps)
}

fn is_stale(deps: &DepSet, changed: &[ModulePath]) -> bool {
    changed
        .iter()
        .any(|path| deps.iter().any(|dep| dep.overlaps(path)))
}

fn slot<'v>(root: &'v Value, path: &ModulePath) -> Option<&'v Value> {
    path.segments()
        .iter()
        .try_fold(root, |value, key| value.get(key.as_str()))
}

fn slot_mut<'v>(root: &'v mut Value, path: &ModulePath) -> Option<&'v mut Value> {
    let mut value = root;
    for key in path.segments() {
        value = value.get_mut(key.as_str())?;
    }
    Some(value)
}

struct Memo {
    value: Value,
    deps: DepSet,
}

struct DerivedGetter {
    compute: WrappedGetter,
    memo: Mutex<Option<Memo>>,
}

/// One generation of memoized getters, built from the getter table.
///
/// Replaced wholesale whenever the tables are rebuilt.
pub(crate) struct DerivedLayer {
    getters: IndexMap<String, DerivedGetter>,
}

impl DerivedLayer {
    fn new(getters: IndexMap<String, WrappedGetter>) -> Self {
        let getters = getters
            .into_iter()
            .map(|(ty, compute)| {
                let getter = DerivedGetter {
                    compute,
                    memo: Mutex::new(None),
                };
                (ty, getter)
            })
            .collect();
        Self { getters }
    }

    pub(crate) fn contains(&self, ty: &str) -> bool {
        self.getters.contains_key(ty)
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &String> {
        self.getters.keys()
    }

    pub(crate) fn len(&self) -> usize {
        self.getters.len()
    }

    /// Read a getter, computing it only if its memo is missing or stale.
    ///
    /// The memo is stored only if no change was notified while computing.
    pub(crate) fn evaluate(&self, store: &Store, ty: &str) -> Option<Value> {
        let getter = self.getters.get(ty)?;
        if reentered("getter read") {
            return None;
        }
        {
            let memo = getter.memo.lock();
            if let Some(memo) = memo.as_ref() {
                track_all(&memo.deps);
                return Some(memo.value.clone());
            }
        }
        let host = store.host();
        let generation = host.generation();
        let (value, deps) = tracked(|| (getter.compute)(store));
        track_all(&deps);
        let mut memo = getter.memo.lock();
        if host.generation() == generation {
            *memo = Some(Memo {
                value: value.clone(),
                deps,
            });
        }
        Some(value)
    }

    fn invalidate(&self, changed: &ModulePath) {
        let changed = std::slice::from_ref(changed);
        for getter in self.getters.values() {
            let mut memo = getter.memo.lock();
            if memo.as_ref().is_some_and(|m| is_stale(&m.deps, changed)) {
                *memo = None;
            }
        }
    }
}

struct Watcher {
    id: WatchId,
    source: WatchFn,
    callback: WatchCallback,
    memo: Mutex<Option<Memo>>,
    /// Set when a change raced the last run: re-run on the next flush.
    dirty: AtomicBool,
}

impl Watcher {
    fn needs_run(&self, changed: &[ModulePath]) -> bool {
        if self.dirty.swap(false, Ordering::SeqCst) {
            return true;
        }
        self.memo
            .lock()
            .as_ref()
            .is_none_or(|m| is_stale(&m.deps, changed))
    }

    fn run(&self, store: &Store) {
        let host = store.host();
        let generation = host.generation();
        let (value, deps) = tracked(|| (self.source)(store));
        let previous = {
            let mut memo = self.memo.lock();
            if host.generation() != generation {
                self.dirty.store(true, Ordering::SeqCst);
            }
            memo.replace(Memo {
                value: value.clone(),
                deps,
            })
            .map(|m| m.value)
        };
        if let Some(old) = previous {
            if old != value {
                (self.callback)(&value, &old);
            }
        }
    }
}

/// Canonical state tree plus its derived layer.
pub(crate) struct ReactiveHost {
    state: RwLock<Value>,
    /// Committing gate: true while a sanctioned write is in progress.
    committing: AtomicBool,
    strict: bool,
    violations: AtomicU64,
    /// Bumped on every change, before getter memos are invalidated.
    generation: AtomicU64,
    derived: RwLock<Arc<DerivedLayer>>,
    watchers: Mutex<Vec<Arc<Watcher>>>,
    next_watch_id: AtomicU64,
    /// Paths changed since the last watcher flush.
    pending: Mutex<Vec<ModulePath>>,
    /// Set by a hot rebuild: every watcher re-evaluates on the next flush.
    identity_lost: AtomicBool,
    flushing: AtomicBool,
}

impl ReactiveHost {
    pub(crate) fn new(state: Value, strict: bool) -> Self {
        Self {
            state: RwLock::new(state),
            committing: AtomicBool::new(false),
            strict,
            violations: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            derived: RwLock::new(Arc::new(DerivedLayer::new(IndexMap::new()))),
            watchers: Mutex::new(Vec::new()),
            next_watch_id: AtomicU64::new(1),
            pending: Mutex::new(Vec::new()),
            identity_lost: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
        }
    }

    // ====================================================================
    // Committing gate
    // ====================================================================

    pub(crate) fn is_committing(&self) -> bool {
        self.committing.load(Ordering::SeqCst)
    }

    /// Run `f` with the committing gate open, restoring the previous gate
    /// value afterwards (nested scopes keep the outer value).
    pub(crate) fn with_commit<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Restore<'a> {
            gate: &'a AtomicBool,
            previous: bool,
        }
        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                self.gate.store(self.previous, Ordering::SeqCst);
            }
        }

        let previous = self.committing.swap(true, Ordering::SeqCst);
        let _restore = Restore {
            gate: &self.committing,
            previous,
        };
        f()
    }

    /// True (and reported) when called from inside a mutation handler.
    pub(crate) fn reentered(&self, op: &str) -> bool {
        reentered(op)
    }

    pub(crate) fn is_strict(&self) -> bool {
        self.strict
    }

    pub(crate) fn strict_violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    // ====================================================================
    // State read
    // ====================================================================

    /// Whole tree, tracked as a dependency on the root.
    pub(crate) fn read(&self) -> Value {
        if reentered("state read") {
            return Value::Null;
        }
        track(&ModulePath::root());
        self.state.read().clone()
    }

    /// Value at `path`, tracked as a dependency on that path.
    pub(crate) fn read_at(&self, path: &ModulePath) -> Option<Value> {
        if reentered("state read") {
            return None;
        }
        track(path);
        slot(&self.state.read(), path).cloned()
    }

    /// Whole tree without recording a dependency.
    pub(crate) fn snapshot(&self) -> Value {
        if reentered("state read") {
            return Value::Null;
        }
        self.state.read().clone()
    }

    // ====================================================================
    // State write
    // ====================================================================

    /// Apply `f` to the slot at `path` and notify the change.
    ///
    /// Returns `None` without notifying if the slot does not exist. While
    /// `f` runs, store reads and commits on this thread are refused.
    pub(crate) fn write<R>(&self, path: &ModulePath, f: impl FnOnce(&mut Value) -> R) -> Option<R> {
        struct Mutating;
        impl Drop for Mutating {
            fn drop(&mut self) {
                MUTATING.with(|flag| flag.set(false));
            }
        }

        let result = {
            let mut state = self.state.write();
            let target = slot_mut(&mut state, path)?;
            MUTATING.with(|flag| flag.set(true));
            let _mutating = Mutating;
            f(target)
        };
        self.notify(path);
        Some(result)
    }

    /// Attach `value` as property `key` of the object at `parent`.
    pub(crate) fn graft(&self, parent: &ModulePath, key: &str, value: Value) {
        let grafted = {
            let mut state = self.state.write();
            match slot_mut(&mut state, parent).and_then(Value::as_object_mut) {
                Some(object) => {
                    object.insert(key.to_string(), value);
                    true
                }
                None => false,
            }
        };
        if grafted {
            self.notify(&parent.child(key));
        } else {
            warn!(
                "cannot attach state \"{}\": state at \"{}\" is not an object",
                key, parent
            );
        }
    }

    /// Delete property `key` of the object at `parent`.
    pub(crate) fn remove_slot(&self, parent: &ModulePath, key: &str) {
        let removed = {
            let mut state = self.state.write();
            slot_mut(&mut state, parent)
                .and_then(Value::as_object_mut)
                .and_then(|object| object.remove(key))
                .is_some()
        };
        if removed {
            self.notify(&parent.child(key));
        }
    }

    pub(crate) fn replace(&self, value: Value) {
        *self.state.write() = value;
        self.notify(&ModulePath::root());
    }

    /// Raw write access to the whole tree. The caller must `notify` the
    /// root once the guard is released.
    pub(crate) fn lock_state(&self) -> RwLockWriteGuard<'_, Value> {
        self.state.write()
    }

    /// Record a change at `changed`: strict-mode check, getter
    /// invalidation, and queueing for the next watcher flush.
    pub(crate) fn notify(&self, changed: &ModulePath) {
        if self.strict && !self.is_committing() {
            self.violations.fetch_add(1, Ordering::Relaxed);
            error!(
                "do not mutate store state outside mutation handlers (changed \"{}\")",
                changed
            );
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.derived.read().invalidate(changed);
        let mut pending = self.pending.lock();
        if !pending.contains(changed) {
            pending.push(changed.clone());
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    // ====================================================================
    // Derived layer
    // ====================================================================

    pub(crate) fn derived(&self) -> Arc<DerivedLayer> {
        Arc::clone(&self.derived.read())
    }

    /// Tear down the derived layer and build a new one from `getters`.
    ///
    /// The state tree is preserved. A hot rebuild also marks every watcher
    /// for re-evaluation, since the getters they read may have changed.
    pub(crate) fn rebuild(&self, getters: IndexMap<String, WrappedGetter>, hot: bool) {
        let layer = Arc::new(DerivedLayer::new(getters));
        let count = layer.len();
        *self.derived.write() = layer;
        if hot {
            self.identity_lost.store(true, Ordering::SeqCst);
        }
        debug!("derived layer rebuilt with {} getters (hot: {})", count, hot);
    }

    // ====================================================================
    // Watchers
    // ====================================================================

    pub(crate) fn watch(&self, store: &Store, source: WatchFn, callback: WatchCallback) -> WatchId {
        let id = WatchId(self.next_watch_id.fetch_add(1, Ordering::Relaxed));
        let watcher = Arc::new(Watcher {
            id,
            source,
            callback,
            memo: Mutex::new(None),
            dirty: AtomicBool::new(false),
        });
        watcher.run(store);
        self.watchers.lock().push(watcher);
        id
    }

    pub(crate) fn unwatch(&self, id: WatchId) -> bool {
        let mut watchers = self.watchers.lock();
        let before = watchers.len();
        watchers.retain(|w| w.id != id);
        watchers.len() < before
    }

    /// Re-run every watcher whose dependencies changed since the last
    /// flush. Callbacks may write again; those writes are flushed in the
    /// same call.
    ///
    /// Flushes do not overlap. A change queued by another thread while a
    /// flush is running is picked up before that flush returns.
    pub(crate) fn flush(&self, store: &Store) {
        loop {
            if self.flushing.swap(true, Ordering::SeqCst) {
                return;
            }
            self.drain(store);
            self.flushing.store(false, Ordering::SeqCst);
            if self.pending.lock().is_empty() {
                break;
            }
        }
    }

    fn drain(&self, store: &Store) {
        let mut rounds = 0;
        loop {
            let changed = std::mem::take(&mut *self.pending.lock());
            let force = self.identity_lost.swap(false, Ordering::SeqCst);
            if changed.is_empty() && !force {
                break;
            }
            rounds += 1;
            if rounds > MAX_FLUSH_ROUNDS {
                error!("watchers kept re-triggering after {} rounds, flush aborted", MAX_FLUSH_ROUNDS);
                self.pending.lock().clear();
                break;
            }
            let watchers: Vec<Arc<Watcher>> = self.watchers.lock().clone();
            for watcher in watchers {
                if force || watcher.needs_run(&changed) {
                    watcher.run(store);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host(state: Value) -> ReactiveHost {
        ReactiveHost::new(state, false)
    }

    // ========================================================================
    // Tracking
    // ========================================================================

    #[test]
    fn reads_outside_a_frame_are_not_tracked() {
        let h = host(json!({"a": 1}));
        let (_, deps) = tracked(|| ());
        assert!(deps.is_empty());
        // No frame open, must not panic.
        h.read_at(&"a".into());
    }

    #[test]
    fn reads_inside_a_frame_are_tracked() {
        let h = host(json!({"a": {"n": 1}, "b": 2}));
        let (value, deps) = tracked(|| h.read_at(&"a".into()));
        assert_eq!(value, Some(json!({"n": 1})));
        assert_eq!(deps, DepSet::from([ModulePath::from("a")]));
    }

    #[test]
    fn nested_frames_are_isolated() {
        let h = host(json!({"a": 1, "b": 2}));
        let (_, outer) = tracked(|| {
            h.read_at(&"a".into());
            let (_, inner) = tracked(|| h.read_at(&"b".into()));
            assert_eq!(inner, DepSet::from([ModulePath::from("b")]));
        });
        assert_eq!(outer, DepSet::from([ModulePath::from("a")]));
    }

    // ========================================================================
    // Committing gate
    // ========================================================================

    #[test]
    fn with_commit_restores_previous_value() {
        let h = host(json!({}));
        assert!(!h.is_committing());
        h.with_commit(|| {
            assert!(h.is_committing());
            h.with_commit(|| assert!(h.is_committing()));
            // Inner scope must not close the outer one.
            assert!(h.is_committing());
        });
        assert!(!h.is_committing());
    }

    // ========================================================================
    // Writes
    // ========================================================================

    #[test]
    fn write_to_missing_slot_is_none() {
        let h = host(json!({"a": {}}));
        assert!(h.write(&"missing".into(), |_| ()).is_none());
        assert!(h.pending.lock().is_empty());
    }

    #[test]
    fn graft_and_remove_slot() {
        let h = host(json!({"a": {}}));
        h.graft(&"a".into(), "b", json!({"n": 1}));
        assert_eq!(h.snapshot(), json!({"a": {"b": {"n": 1}}}));

        h.remove_slot(&"a".into(), "b");
        assert_eq!(h.snapshot(), json!({"a": {}}));
    }

    #[test]
    fn graft_into_non_object_is_skipped() {
        let h = host(json!({"a": 5}));
        h.graft(&"a".into(), "b", json!({}));
        assert_eq!(h.snapshot(), json!({"a": 5}));
    }

    #[test]
    fn notify_deduplicates_pending_paths() {
        let h = host(json!({"a": {}}));
        h.write(&"a".into(), |_| ());
        h.write(&"a".into(), |_| ());
        assert_eq!(h.pending.lock().len(), 1);
    }

    // ========================================================================
    // Strict mode
    // ========================================================================

    #[test]
    fn strict_reports_writes_outside_gate() {
        let h = ReactiveHost::new(json!({"a": {}}), true);
        h.write(&"a".into(), |_| ());
        assert_eq!(h.strict_violations(), 1);
    }

    #[test]
    fn strict_accepts_writes_inside_gate() {
        let h = ReactiveHost::new(json!({"a": {}}), true);
        h.with_commit(|| h.write(&"a".into(), |_| ()));
        h.with_commit(|| h.replace(json!({})));
        assert_eq!(h.strict_violations(), 0);
    }

    #[test]
    fn non_strict_never_reports() {
        let h = host(json!({"a": {}}));
        h.write(&"a".into(), |_| ());
        assert_eq!(h.strict_violations(), 0);
    }

    // ========================================================================
    // Staleness
    // ========================================================================

    #[test]
    fn staleness_follows_path_overlap() {
        let deps = DepSet::from([ModulePath::from(["cart", "items"])]);
        assert!(is_stale(&deps, &[ModulePath::root()]));
        assert!(is_stale(&deps, &[ModulePath::from("cart")]));
        assert!(is_stale(&deps, &[ModulePath::from(["cart", "items", "0"])]));
        assert!(!is_stale(&deps, &[ModulePath::from("user")]));
        assert!(!is_stale(&deps, &[ModulePath::from(["cart", "total"])]));
    }
}
