use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::context::{ActionContext, GetterContext};
use crate::error::StoreError;

/// Boxed, `Send`-able future returned by action handlers.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<Value, StoreError>> + Send>>;

/// Mutation handler: `(local state, payload)`. Runs synchronously.
pub type MutationFn = Arc<dyn Fn(&mut Value, &Value) + Send + Sync>;

/// Action handler: `(context, payload)`, always awaitable.
pub type ActionFn = Arc<dyn Fn(ActionContext, Value) -> ActionFuture + Send + Sync>;

/// Getter: derives a value from the local/root state and getters.
pub type GetterFn = Arc<dyn Fn(&GetterContext<'_>) -> Value + Send + Sync>;

/// An action handler plus its registration flag.
#[derive(Clone)]
pub struct ActionDef {
    /// Register under the bare key, ignoring the module namespace.
    pub(crate) root: bool,
    pub(crate) handler: ActionFn,
}

/// Where a module's initial state comes from.
///
/// A factory is called once per module instance, so a definition
/// registered several times never shares one state object.
#[derive(Clone)]
pub enum StateSource {
    Value(Value),
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl StateSource {
    fn produce(&self) -> Value {
        match self {
            StateSource::Value(value) => value.clone(),
            StateSource::Factory(factory) => factory(),
        }
    }
}

/// Raw definition of a module: state, handlers and child definitions.
///
/// ```ignore
/// let counter = ModuleDef::new()
///     .namespaced(true)
///     .state(json!({"count": 0}))
///     .mutation("inc", |state, _| {
///         state["count"] = json!(state["count"].as_i64().unwrap_or(0) + 1);
///     })
///     .getter("double", |ctx| json!(ctx.state()["count"].as_i64().unwrap_or(0) * 2));
/// ```
#[derive(Clone, Default)]
pub struct ModuleDef {
    pub(crate) namespaced: bool,
    pub(crate) state: Option<StateSource>,
    pub(crate) getters: IndexMap<String, GetterFn>,
    pub(crate) mutations: IndexMap<String, MutationFn>,
    pub(crate) actions: IndexMap<String, ActionDef>,
    pub(crate) modules: IndexMap<String, ModuleDef>,
}

impl ModuleDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespaced(mut self, namespaced: bool) -> Self {
        self.namespaced = namespaced;
        self
    }

    /// Initial state, cloned for every instance of this definition.
    pub fn state(mut self, state: Value) -> Self {
        self.state = Some(StateSource::Value(state));
        self
    }

    /// Initial state produced by a factory per instance.
    pub fn state_fn<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.state = Some(StateSource::Factory(Arc::new(factory)));
        self
    }

    pub fn getter<F>(mut self, key: &str, getter: F) -> Self
    where
        F: Fn(&GetterContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.getters.insert(key.to_string(), Arc::new(getter));
        self
    }

    /// Register a mutation handler. It receives the module's state slot and
    /// the payload.
    ///
    /// The state tree is write-locked while the handler runs: it must not
    /// call back into the store. Reads and getters from there see `Null` or
    /// `None`, nested commits are ignored, and both are logged as errors.
    pub fn mutation<F>(mut self, key: &str, handler: F) -> Self
    where
        F: Fn(&mut Value, &Value) + Send + Sync + 'static,
    {
        self.mutations.insert(key.to_string(), Arc::new(handler));
        self
    }

    /// Register an async action under the module namespace.
    pub fn action<F, Fut>(self, key: &str, handler: F) -> Self
    where
        F: Fn(ActionContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StoreError>> + Send + 'static,
    {
        self.insert_action(key, false, erase(handler))
    }

    /// Register an async action under its bare key, even inside a
    /// namespaced module.
    pub fn root_action<F, Fut>(self, key: &str, handler: F) -> Self
    where
        F: Fn(ActionContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StoreError>> + Send + 'static,
    {
        self.insert_action(key, true, erase(handler))
    }

    /// Register a synchronous action. Its result is wrapped into a ready
    /// future so dispatch is always awaitable.
    pub fn action_sync<F>(self, key: &str, handler: F) -> Self
    where
        F: Fn(ActionContext, Value) -> Result<Value, StoreError> + Send + Sync + 'static,
    {
        let handler: ActionFn = Arc::new(move |ctx: ActionContext, payload: Value| -> ActionFuture {
            let result = handler(ctx, payload);
            Box::pin(futures::future::ready(result))
        });
        self.insert_action(key, false, handler)
    }

    /// Declare a child module under `key`.
    pub fn module(mut self, key: &str, module: ModuleDef) -> Self {
        self.modules.insert(key.to_string(), module);
        self
    }

    fn insert_action(mut self, key: &str, root: bool, handler: ActionFn) -> Self {
        self.actions
            .insert(key.to_string(), ActionDef { root, handler });
        self
    }
}

fn erase<F, Fut>(handler: F) -> ActionFn
where
    F: Fn(ActionContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StoreError>> + Send + 'static,
{
    Arc::new(move |ctx: ActionContext, payload: Value| -> ActionFuture {
        Box::pin(handler(ctx, payload))
    })
}

impl fmt::Debug for ModuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDef")
            .field("namespaced", &self.namespaced)
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("mutations", &self.mutations.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A registered node of the module tree.
///
/// Holds the module's handlers, its children and the state it was created
/// with. Once installed, the live state sits in the store's state tree under
/// this module's path; `state()` keeps the initial value.
pub struct Module {
    runtime: bool,
    namespaced: bool,
    state: Value,
    getters: IndexMap<String, GetterFn>,
    mutations: IndexMap<String, MutationFn>,
    actions: IndexMap<String, ActionDef>,
    children: IndexMap<String, Module>,
}

impl Module {
    /// Create a module from its definition. Child definitions are ignored
    /// here; the module tree registers them as separate nodes.
    pub(crate) fn new(def: &ModuleDef, runtime: bool) -> Self {
        let state = def
            .state
            .as_ref()
            .map(StateSource::produce)
            .unwrap_or_else(|| Value::Object(Map::new()));
        Self {
            runtime,
            namespaced: def.namespaced,
            state,
            getters: def.getters.clone(),
            mutations: def.mutations.clone(),
            actions: def.actions.clone(),
            children: IndexMap::new(),
        }
    }

    /// True when registered after store construction.
    pub fn runtime(&self) -> bool {
        self.runtime
    }

    pub fn namespaced(&self) -> bool {
        self.namespaced
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn child(&self, key: &str) -> Option<&Module> {
        self.children.get(key)
    }

    pub(crate) fn child_mut(&mut self, key: &str) -> Option<&mut Module> {
        self.children.get_mut(key)
    }

    pub(crate) fn add_child(&mut self, key: &str, module: Module) -> Option<Module> {
        self.children.insert(key.to_string(), module)
    }

    pub(crate) fn remove_child(&mut self, key: &str) -> Option<Module> {
        self.children.shift_remove(key)
    }

    pub fn children(&self) -> impl Iterator<Item = (&String, &Module)> {
        self.children.iter()
    }

    pub fn getters(&self) -> impl Iterator<Item = (&String, &GetterFn)> {
        self.getters.iter()
    }

    pub fn mutations(&self) -> impl Iterator<Item = (&String, &MutationFn)> {
        self.mutations.iter()
    }

    pub fn actions(&self) -> impl Iterator<Item = (&String, &ActionDef)> {
        self.actions.iter()
    }

    /// Hot-reload merge. Takes the new namespaced flag and replaces each
    /// handler table the new definition provides. State and children are
    /// left alone.
    pub(crate) fn update(&mut self, def: &ModuleDef) {
        self.namespaced = def.namespaced;
        if !def.actions.is_empty() {
            self.actions = def.actions.clone();
        }
        if !def.mutations.is_empty() {
            self.mutations = def.mutations.clone();
        }
        if !def.getters.is_empty() {
            self.getters = def.getters.clone();
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("runtime", &self.runtime)
            .field("namespaced", &self.namespaced)
            .field("state", &self.state)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .finish()
    }
}
