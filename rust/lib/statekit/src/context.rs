//! Module-scoped views of the store.
//!
//! - [`LocalContext`]: handed to actions; commits and dispatches are
//!   resolved against the module namespace.
//! - [`GetterContext`]: handed to getters during evaluation.
//! - [`Getters`] / [`LocalGetters`]: lazy getter views, global and
//!   namespace-relative.
//!
//! Every read is resolved against the live store at call time. Nothing is
//! captured when a context is built, so contexts stay valid across table
//! rebuilds and state replacement.

use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use crate::error::StoreError;
use crate::path::ModulePath;
use crate::request::{CommitOptions, Request};
use crate::store::Store;

/// Where a module sits: its namespace prefix and its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocalScope {
    pub(crate) namespace: String,
    pub(crate) path: ModulePath,
}

impl LocalScope {
    pub(crate) fn new(namespace: impl Into<String>, path: ModulePath) -> Self {
        Self {
            namespace: namespace.into(),
            path,
        }
    }

    fn qualify(&self, ty: &str) -> String {
        format!("{}{}", self.namespace, ty)
    }
}

// ============================================================================
// LocalContext
// ============================================================================

/// A module's view of the store.
///
/// For a module without namespace, commit and dispatch go straight to the
/// store. Otherwise the type is prefixed with the namespace, unless
/// [`CommitOptions::root`] is passed.
#[derive(Clone)]
pub struct LocalContext {
    store: Store,
    scope: Arc<LocalScope>,
}

/// The context an action handler receives.
pub type ActionContext = LocalContext;

impl LocalContext {
    pub(crate) fn new(store: Store, scope: Arc<LocalScope>) -> Self {
        Self { store, scope }
    }

    pub fn namespace(&self) -> &str {
        &self.scope.namespace
    }

    pub fn path(&self) -> &ModulePath {
        &self.scope.path
    }

    /// The module's current state. `Null` if the module was removed.
    pub fn state(&self) -> Value {
        self.store.state_at(&self.scope.path).unwrap_or(Value::Null)
    }

    pub fn getters(&self) -> LocalGetters {
        LocalGetters::new(self.store.clone(), self.scope.namespace.clone())
    }

    /// Read a getter of this module by its local name.
    pub fn getter(&self, name: &str) -> Option<Value> {
        self.store.getter(&self.scope.qualify(name))
    }

    pub fn root_state(&self) -> Value {
        self.store.state()
    }

    pub fn root_getters(&self) -> Getters {
        self.store.getters()
    }

    pub fn commit(&self, ty: &str, payload: Value) {
        self.commit_with(ty, payload, CommitOptions::default());
    }

    pub fn commit_with(&self, ty: &str, payload: Value, options: CommitOptions) {
        if options.root || self.scope.namespace.is_empty() {
            self.store.commit(ty, payload);
            return;
        }
        let global = self.scope.qualify(ty);
        if !self.store.has_mutation(&global) {
            error!("unknown local mutation type: {}, global type: {}", ty, global);
            return;
        }
        self.store.commit(&global, payload);
    }

    /// Object-style local commit: `{"type": "inc", ...}`.
    pub fn commit_object(&self, object: Value, options: CommitOptions) -> Result<(), StoreError> {
        let request = Request::from_object(object)?;
        self.commit_with(&request.ty, request.payload, options);
        Ok(())
    }

    pub async fn dispatch(&self, ty: &str, payload: Value) -> Result<Value, StoreError> {
        self.dispatch_with(ty, payload, CommitOptions::default()).await
    }

    pub async fn dispatch_with(
        &self,
        ty: &str,
        payload: Value,
        options: CommitOptions,
    ) -> Result<Value, StoreError> {
        if options.root || self.scope.namespace.is_empty() {
            return self.store.dispatch(ty, payload).await;
        }
        let global = self.scope.qualify(ty);
        if !self.store.has_action(&global) {
            error!("unknown local action type: {}, global type: {}", ty, global);
            return Ok(Value::Null);
        }
        self.store.dispatch(&global, payload).await
    }

    /// Object-style local dispatch: `{"type": "load", ...}`.
    pub async fn dispatch_object(
        &self,
        object: Value,
        options: CommitOptions,
    ) -> Result<Value, StoreError> {
        let request = Request::from_object(object)?;
        self.dispatch_with(&request.ty, request.payload, options)
            .await
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

// ============================================================================
// GetterContext
// ============================================================================

/// Arguments of a getter: local state and getters, root state and getters.
///
/// Every read goes through the store and is dependency-tracked.
pub struct GetterContext<'a> {
    store: &'a Store,
    scope: &'a LocalScope,
}

impl<'a> GetterContext<'a> {
    pub(crate) fn new(store: &'a Store, scope: &'a LocalScope) -> Self {
        Self { store, scope }
    }

    pub fn state(&self) -> Value {
        self.store.state_at(&self.scope.path).unwrap_or(Value::Null)
    }

    pub fn getters(&self) -> LocalGetters {
        LocalGetters::new(self.store.clone(), self.scope.namespace.clone())
    }

    /// Another getter of the same module, by local name.
    pub fn getter(&self, name: &str) -> Option<Value> {
        self.store.getter(&self.scope.qualify(name))
    }

    pub fn root_state(&self) -> Value {
        self.store.state()
    }

    /// Root state narrowed to `path`. Tracks only that path.
    pub fn root_state_at(&self, path: impl Into<ModulePath>) -> Option<Value> {
        self.store.state_at(path)
    }

    pub fn root_getters(&self) -> Getters {
        self.store.getters()
    }

    pub fn root_getter(&self, ty: &str) -> Option<Value> {
        self.store.getter(ty)
    }
}

// ============================================================================
// Getter views
// ============================================================================

/// All getters of the store, keyed by fully-qualified type.
///
/// Values are computed on `get`, never when the view is built.
#[derive(Clone)]
pub struct Getters {
    store: Store,
}

impl Getters {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn get(&self, ty: &str) -> Option<Value> {
        self.store.getter(ty)
    }

    pub fn contains(&self, ty: &str) -> bool {
        self.store.derived().contains(ty)
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.derived().keys().cloned().collect()
    }
}

/// Getters of one namespace, keyed by their name without the prefix.
#[derive(Clone)]
pub struct LocalGetters {
    store: Store,
    namespace: String,
}

impl LocalGetters {
    fn new(store: Store, namespace: String) -> Self {
        Self { store, namespace }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.store.getter(&format!("{}{}", self.namespace, name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.store
            .derived()
            .contains(&format!("{}{}", self.namespace, name))
    }

    /// Local names of every getter under the namespace.
    pub fn keys(&self) -> Vec<String> {
        self.store
            .derived()
            .keys()
            .filter_map(|ty| ty.strip_prefix(self.namespace.as_str()))
            .map(str::to_string)
            .collect()
    }
}
