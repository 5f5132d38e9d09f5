use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::{RwLock, RwLockReadGuard};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::collection::ModuleTree;
use crate::config::StoreOptions;
use crate::context::{Getters, LocalContext, LocalScope};
use crate::error::StoreError;
use crate::module::ModuleDef;
use crate::path::ModulePath;
use crate::plugin::apply_plugins;
use crate::plugins::devtools::{self, DevtoolsHook};
use crate::reactive::{DerivedLayer, ReactiveHost, WatchId};
use crate::request::Request;
use crate::router::{RuntimeTables, install_module};
use crate::subscription::{ActionSubscriber, SubscriptionHub, SubscriptionId};

/// Options for [`Store::register_module`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterOptions {
    /// Keep the state already present at the module's path instead of
    /// attaching the module's initial state.
    pub preserve_state: bool,
}

impl RegisterOptions {
    pub fn preserve_state() -> Self {
        Self {
            preserve_state: true,
        }
    }
}

struct StoreInner {
    modules: RwLock<ModuleTree>,
    tables: RwLock<RuntimeTables>,
    host: ReactiveHost,
    hub: SubscriptionHub,
    error_hook: RwLock<Option<Arc<dyn DevtoolsHook>>>,
}

/// The state container.
///
/// Cheap to clone; clones share the same store.
///
/// # Locking
///
/// No internal lock is held while user code runs, with one exception:
/// mutation handlers run while the state tree is write-locked. They receive
/// their state slot directly. Reads, getters and commits made from inside a
/// handler are refused with an error (`Null`/`None`, commit ignored);
/// `with_state_mut` and module registration from there would deadlock.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Non-owning store handle, for plugins and callbacks that must not keep
/// the store alive.
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl Store {
    /// Build a store: install the module tree, build the getter layer,
    /// then apply plugins in order (the devtools bridge last).
    pub fn new(options: StoreOptions) -> Result<Store, StoreError> {
        let attach_devtools = options.devtools_enabled();
        let StoreOptions {
            root,
            plugins,
            strict,
            devtools_hook,
            ..
        } = options;

        let tree = ModuleTree::new(root)?;
        let host = ReactiveHost::new(tree.root().state().clone(), strict);
        let store = Store {
            inner: Arc::new(StoreInner {
                modules: RwLock::new(tree),
                tables: RwLock::new(RuntimeTables::default()),
                host,
                hub: SubscriptionHub::new(),
                error_hook: RwLock::new(None),
            }),
        };

        {
            let tree = store.inner.modules.read();
            let mut tables = store.inner.tables.write();
            install_module(&store, &mut tables, &tree, &ModulePath::root(), tree.root(), false);
        }
        store.reset_derived(false);

        apply_plugins(&store, &plugins);
        if attach_devtools {
            if let Some(hook) = devtools_hook {
                devtools::attach(&store, hook);
            }
        }
        store.inner.host.flush(&store);

        debug!("store created (strict: {}, plugins: {})", strict, plugins.len());
        Ok(store)
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// True if both handles point to the same store.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn host(&self) -> &ReactiveHost {
        &self.inner.host
    }

    pub(crate) fn tables(&self) -> RwLockReadGuard<'_, RuntimeTables> {
        self.inner.tables.read()
    }

    pub(crate) fn derived(&self) -> Arc<DerivedLayer> {
        self.inner.host.derived()
    }

    pub(crate) fn has_mutation(&self, ty: &str) -> bool {
        self.tables().mutations.contains_key(ty)
    }

    pub(crate) fn has_action(&self, ty: &str) -> bool {
        self.tables().actions.contains_key(ty)
    }

    pub(crate) fn set_error_hook(&self, hook: Arc<dyn DevtoolsHook>) {
        *self.inner.error_hook.write() = Some(hook);
    }

    pub(crate) fn error_hook(&self) -> Option<Arc<dyn DevtoolsHook>> {
        self.inner.error_hook.read().clone()
    }

    // ====================================================================
    // State
    // ====================================================================

    /// The whole state tree. Tracked when read inside a getter or watcher.
    pub fn state(&self) -> Value {
        self.inner.host.read()
    }

    /// State at `path` (module slots and plain object keys alike).
    pub fn state_at(&self, path: impl Into<ModulePath>) -> Option<Value> {
        self.inner.host.read_at(&path.into())
    }

    /// The whole state tree, never tracked.
    pub fn snapshot(&self) -> Value {
        self.inner.host.snapshot()
    }

    /// Write the state tree directly, bypassing mutations.
    ///
    /// The change takes effect and notifies getters and watchers; in strict
    /// mode it is also reported as a violation.
    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        let host = &self.inner.host;
        let result = {
            let mut state = host.lock_state();
            f(&mut state)
        };
        host.notify(&ModulePath::root());
        host.flush(self);
        result
    }

    /// Replace the whole state tree (e.g. devtools time travel).
    pub fn replace_state(&self, state: Value) {
        let host = &self.inner.host;
        host.with_commit(|| host.replace(state));
        host.flush(self);
    }

    /// Number of strict-mode violations seen so far.
    pub fn strict_violations(&self) -> u64 {
        self.inner.host.strict_violations()
    }

    pub fn is_strict(&self) -> bool {
        self.inner.host.is_strict()
    }

    // ====================================================================
    // Getters
    // ====================================================================

    pub fn getters(&self) -> Getters {
        Getters::new(self.clone())
    }

    /// Read one getter. `None` if no getter is registered under `ty`.
    pub fn getter(&self, ty: &str) -> Option<Value> {
        self.derived().evaluate(self, ty)
    }

    // ====================================================================
    // Commit
    // ====================================================================

    /// Run every mutation handler registered under `ty`, in registration
    /// order, then notify mutation subscribers.
    ///
    /// An unknown type is reported and ignored.
    pub fn commit(&self, ty: &str, payload: Value) {
        if self.inner.host.reentered("commit") {
            return;
        }
        let handlers = self.tables().mutations.get(ty).cloned();
        let Some(handlers) = handlers else {
            error!("unknown mutation type: {}", ty);
            return;
        };

        let host = &self.inner.host;
        host.with_commit(|| {
            for mutation in &handlers {
                let applied = host.write(&mutation.path, |state| (mutation.handler)(state, &payload));
                if applied.is_none() {
                    warn!(
                        "mutation \"{}\" skipped: no state at \"{}\"",
                        ty, mutation.path
                    );
                }
            }
        });

        let mutation = Request::new(ty, payload);
        self.inner.hub.notify_mutation(&mutation, &host.snapshot());
        host.flush(self);
    }

    /// Object-style commit: `{"type": "cart/add", ...}`.
    pub fn commit_object(&self, object: Value) -> Result<(), StoreError> {
        let request = Request::from_object(object)?;
        self.commit(&request.ty, request.payload);
        Ok(())
    }

    // ====================================================================
    // Dispatch
    // ====================================================================

    /// Run the action handlers registered under `ty`.
    ///
    /// One handler: its result. Several: all run concurrently and the
    /// results come back as an array in registration order. If any fails,
    /// the first error in registration order is returned once every handler
    /// has settled. Unknown type: reported, resolves to `Null`.
    ///
    /// Before-subscribers run first; after-subscribers run once the result
    /// settles, whether it is a success or a failure.
    pub async fn dispatch(&self, ty: &str, payload: Value) -> Result<Value, StoreError> {
        let handlers = self.tables().actions.get(ty).cloned();
        let Some(handlers) = handlers else {
            error!("unknown action type: {}", ty);
            return Ok(Value::Null);
        };

        let action = Request::new(ty, payload);
        self.inner
            .hub
            .notify_before(&action, &self.inner.host.snapshot());

        let result = match handlers.as_slice() {
            [handler] => handler(self, action.payload.clone()).await,
            _ => {
                let pending = handlers
                    .iter()
                    .map(|handler| handler(self, action.payload.clone()));
                // Every handler runs to completion, even after a sibling fails.
                join_all(pending)
                    .await
                    .into_iter()
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
        };

        self.inner
            .hub
            .notify_after(&action, &self.inner.host.snapshot());
        result
    }

    /// Object-style dispatch: `{"type": "cart/checkout", ...}`.
    pub async fn dispatch_object(&self, object: Value) -> Result<Value, StoreError> {
        let request = Request::from_object(object)?;
        self.dispatch(&request.ty, request.payload).await
    }

    // ====================================================================
    // Subscriptions
    // ====================================================================

    /// Called after every commit with the mutation and the new state.
    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Request, &Value) + Send + Sync + 'static,
    {
        self.inner.hub.subscribe(Arc::new(f))
    }

    pub fn subscribe_action(&self, subscriber: ActionSubscriber) -> SubscriptionId {
        self.inner.hub.subscribe_action(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.hub.unsubscribe(id)
    }

    /// Evaluate `source` now, and again after every change to the state it
    /// read. `callback(new, old)` runs whenever the result differs.
    pub fn watch<S, C>(&self, source: S, callback: C) -> WatchId
    where
        S: Fn(&Store) -> Value + Send + Sync + 'static,
        C: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.inner
            .host
            .watch(self, Arc::new(source), Arc::new(callback))
    }

    pub fn unwatch(&self, id: WatchId) -> bool {
        self.inner.host.unwatch(id)
    }

    // ====================================================================
    // Dynamic modules
    // ====================================================================

    /// Register a module (and its declared children) after construction.
    ///
    /// Its state is attached under `path` unless `preserve_state` is set;
    /// its handlers become dispatchable immediately.
    pub fn register_module(
        &self,
        path: impl Into<ModulePath>,
        def: ModuleDef,
        options: RegisterOptions,
    ) -> Result<(), StoreError> {
        let path = path.into();
        let replaced = {
            let mut tree = self.inner.modules.write();
            let replaced = tree.is_registered(&path);
            tree.register(&path, def, true)?;
            replaced
        };

        {
            let tree = self.inner.modules.read();
            if let Some(module) = tree.get(&path) {
                if replaced {
                    // Old handlers of the replaced module are dropped by the
                    // full reset below.
                    let mut scratch = RuntimeTables::default();
                    install_module(self, &mut scratch, &tree, &path, module, options.preserve_state);
                } else {
                    let mut tables = self.inner.tables.write();
                    install_module(self, &mut tables, &tree, &path, module, options.preserve_state);
                }
            }
        }

        if replaced {
            self.reset_store(false);
        } else {
            self.reset_derived(false);
        }
        self.inner.host.flush(self);
        Ok(())
    }

    /// Remove a module registered with [`Store::register_module`], together
    /// with its state slot and its handlers.
    ///
    /// Returns `false` for unknown paths and static modules (both no-ops).
    pub fn unregister_module(&self, path: impl Into<ModulePath>) -> bool {
        let path = path.into();
        if !self.inner.modules.write().unregister(&path) {
            return false;
        }
        if let Some((parent, key)) = path.split_last() {
            let host = &self.inner.host;
            host.with_commit(|| host.remove_slot(&parent, key));
        }
        self.reset_store(false);
        self.inner.host.flush(self);
        true
    }

    pub fn has_module(&self, path: impl Into<ModulePath>) -> bool {
        self.inner.modules.read().is_registered(&path.into())
    }

    /// Swap in new handler definitions, keeping the state.
    pub fn hot_update(&self, def: ModuleDef) -> Result<(), StoreError> {
        self.inner.modules.write().update(def)?;
        self.reset_store(true);
        self.inner.host.flush(self);
        debug!("hot update applied");
        Ok(())
    }

    /// Local context of the module owning `namespace` (`"cart"` or
    /// `"cart/"`).
    pub fn namespaced(&self, namespace: &str) -> Option<LocalContext> {
        let namespace = if namespace.ends_with('/') {
            namespace.to_string()
        } else {
            format!("{}/", namespace)
        };
        let path = self.tables().namespaces.get(&namespace).cloned();
        let Some(path) = path else {
            error!("module namespace not found: {}", namespace);
            return None;
        };
        let scope = Arc::new(LocalScope::new(namespace, path));
        Some(LocalContext::new(self.clone(), scope))
    }

    // ====================================================================
    // Table rebuilds
    // ====================================================================

    /// Rebuild every table from the module tree. State is kept.
    fn reset_store(&self, hot: bool) {
        let tables = {
            let tree = self.inner.modules.read();
            let mut tables = RuntimeTables::default();
            install_module(self, &mut tables, &tree, &ModulePath::root(), tree.root(), true);
            tables
        };
        *self.inner.tables.write() = tables;
        self.reset_derived(hot);
    }

    fn reset_derived(&self, hot: bool) {
        let getters = self.tables().getters.clone();
        self.inner.host.rebuild(getters, hot);
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables();
        f.debug_struct("Store")
            .field("strict", &self.is_strict())
            .field("mutations", &tables.mutations.len())
            .field("actions", &tables.actions.len())
            .field("getters", &tables.getters.len())
            .finish()
    }
}
