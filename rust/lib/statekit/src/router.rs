//! Flattening of the module tree into global runtime tables.
//!
//! `install_module` walks the tree depth-first, root first, and registers
//! every mutation, action and getter under its fully-qualified type. Each
//! registered handler is wrapped so it runs against its own module's scope.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::collection::ModuleTree;
use crate::context::{GetterContext, LocalContext, LocalScope};
use crate::module::{ActionFn, ActionFuture, GetterFn, Module, MutationFn};
use crate::path::ModulePath;
use crate::plugins::devtools::DevtoolsEvent;
use crate::reactive::WrappedGetter;
use crate::store::Store;

/// A mutation handler bound to the state slot it mutates.
pub(crate) struct WrappedMutation {
    pub(crate) path: ModulePath,
    pub(crate) handler: MutationFn,
}

/// An action handler bound to its module context.
pub(crate) type WrappedAction = Arc<dyn Fn(&Store, Value) -> ActionFuture + Send + Sync>;

/// The store's flat lookup tables.
///
/// Several handlers may share one mutation or action type; they run in
/// registration order. Getter types are unique.
#[derive(Default)]
pub(crate) struct RuntimeTables {
    pub(crate) mutations: HashMap<String, Vec<Arc<WrappedMutation>>>,
    pub(crate) actions: HashMap<String, Vec<WrappedAction>>,
    pub(crate) getters: IndexMap<String, WrappedGetter>,
    /// Namespace → path of the namespaced module that owns it.
    pub(crate) namespaces: HashMap<String, ModulePath>,
}

/// Install the module at `path` and its whole subtree into `tables`.
///
/// Unless `skip_graft` is set, each non-root module's initial state is
/// attached to its parent's state slot inside the committing gate.
pub(crate) fn install_module(
    store: &Store,
    tables: &mut RuntimeTables,
    tree: &ModuleTree,
    path: &ModulePath,
    module: &Module,
    skip_graft: bool,
) {
    let namespace = tree.namespace(path);

    if module.namespaced() {
        if let Some(previous) = tables.namespaces.get(&namespace) {
            if previous != path {
                warn!(
                    "duplicate namespace \"{}\" for the namespaced module \"{}\"",
                    namespace, path
                );
            }
        }
        tables.namespaces.insert(namespace.clone(), path.clone());
    }

    if !skip_graft {
        if let Some((parent, key)) = path.split_last() {
            let host = store.host();
            host.with_commit(|| host.graft(&parent, key, module.state().clone()));
        }
    }

    let scope = Arc::new(LocalScope::new(namespace.clone(), path.clone()));

    for (key, handler) in module.mutations() {
        register_mutation(tables, format!("{}{}", namespace, key), path, handler);
    }

    for (key, action) in module.actions() {
        let ty = if action.root {
            key.clone()
        } else {
            format!("{}{}", namespace, key)
        };
        register_action(tables, ty, &scope, &action.handler);
    }

    for (key, getter) in module.getters() {
        register_getter(tables, format!("{}{}", namespace, key), &scope, getter);
    }

    debug!("installed module \"{}\" (namespace: \"{}\")", path, namespace);

    for (key, child) in module.children() {
        install_module(store, tables, tree, &path.child(key), child, skip_graft);
    }
}

fn register_mutation(tables: &mut RuntimeTables, ty: String, path: &ModulePath, handler: &MutationFn) {
    let entry = Arc::new(WrappedMutation {
        path: path.clone(),
        handler: Arc::clone(handler),
    });
    tables.mutations.entry(ty).or_default().push(entry);
}

fn register_action(
    tables: &mut RuntimeTables,
    ty: String,
    scope: &Arc<LocalScope>,
    handler: &ActionFn,
) {
    let scope = Arc::clone(scope);
    let handler = Arc::clone(handler);
    let wrapped: WrappedAction = Arc::new(move |store: &Store, payload: Value| -> ActionFuture {
        let ctx = LocalContext::new(store.clone(), Arc::clone(&scope));
        let action = handler(ctx, payload);
        let store = store.clone();
        Box::pin(async move {
            let result = action.await;
            if let Err(e) = &result {
                if let Some(hook) = store.error_hook() {
                    hook.emit(DevtoolsEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
            result
        })
    });
    tables.actions.entry(ty).or_default().push(wrapped);
}

fn register_getter(
    tables: &mut RuntimeTables,
    ty: String,
    scope: &Arc<LocalScope>,
    getter: &GetterFn,
) {
    if tables.getters.contains_key(&ty) {
        error!("duplicate getter key: {}", ty);
        return;
    }
    let scope = Arc::clone(scope);
    let getter = Arc::clone(getter);
    let wrapped: WrappedGetter = Arc::new(move |store: &Store| {
        let ctx = GetterContext::new(store, &scope);
        getter(&ctx)
    });
    tables.getters.insert(ty, wrapped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::module::ModuleDef;
    use serde_json::json;

    fn tables_of(store: &Store) -> (Vec<String>, Vec<String>, Vec<String>) {
        let tables = store.tables();
        let mut mutations: Vec<String> = tables.mutations.keys().cloned().collect();
        let mut actions: Vec<String> = tables.actions.keys().cloned().collect();
        let getters: Vec<String> = tables.getters.keys().cloned().collect();
        mutations.sort();
        actions.sort();
        (mutations, actions, getters)
    }

    fn leaf() -> ModuleDef {
        ModuleDef::new()
            .mutation("set", |_, _| {})
            .action_sync("load", |_, _| Ok(Value::Null))
            .root_action("global_load", |_, _| async { Ok(Value::Null) })
            .getter("value", |_| json!(1))
    }

    // ========================================================================
    // Type resolution
    // ========================================================================

    #[test]
    fn namespaced_modules_prefix_their_types() {
        let root = ModuleDef::new().module("a", leaf().namespaced(true));
        let store = Store::new(StoreOptions::new(root)).unwrap();
        let (mutations, actions, getters) = tables_of(&store);

        assert_eq!(mutations, vec!["a/set"]);
        assert_eq!(actions, vec!["a/load", "global_load"]);
        assert_eq!(getters, vec!["a/value"]);
    }

    #[test]
    fn plain_modules_share_the_global_namespace() {
        let root = ModuleDef::new().module("a", leaf());
        let store = Store::new(StoreOptions::new(root)).unwrap();
        let (mutations, actions, _) = tables_of(&store);

        assert_eq!(mutations, vec!["set"]);
        assert_eq!(actions, vec!["global_load", "load"]);
    }

    #[test]
    fn shared_mutation_type_keeps_every_handler() {
        let root = ModuleDef::new()
            .module("a", ModuleDef::new().mutation("reset", |_, _| {}))
            .module("b", ModuleDef::new().mutation("reset", |_, _| {}));
        let store = Store::new(StoreOptions::new(root)).unwrap();

        let tables = store.tables();
        let paths: Vec<String> = tables.mutations["reset"]
            .iter()
            .map(|m| m.path.to_string())
            .collect();
        assert_eq!(paths, vec!["a", "b"]);
    }

    #[test]
    fn duplicate_getter_keeps_first() {
        let root = ModuleDef::new()
            .module("a", ModuleDef::new().getter("name", |_| json!("a")))
            .module("b", ModuleDef::new().getter("name", |_| json!("b")));
        let store = Store::new(StoreOptions::new(root)).unwrap();

        assert_eq!(store.getter("name"), Some(json!("a")));
    }

    // ========================================================================
    // State grafting and namespace map
    // ========================================================================

    #[test]
    fn child_state_is_grafted_into_parent() {
        let root = ModuleDef::new().state(json!({"root": true})).module(
            "a",
            ModuleDef::new()
                .state(json!({"n": 1}))
                .module("b", ModuleDef::new().state(json!({"m": 2}))),
        );
        let store = Store::new(StoreOptions::new(root)).unwrap();

        assert_eq!(
            store.state(),
            json!({"root": true, "a": {"n": 1, "b": {"m": 2}}})
        );
    }

    #[test]
    fn namespace_map_records_namespaced_modules_only() {
        let root = ModuleDef::new()
            .module("a", ModuleDef::new().namespaced(true))
            .module("plain", ModuleDef::new());
        let store = Store::new(StoreOptions::new(root)).unwrap();

        let tables = store.tables();
        assert_eq!(tables.namespaces.get("a/"), Some(&ModulePath::from("a")));
        assert_eq!(tables.namespaces.len(), 1);
    }

    #[test]
    fn grafting_is_not_a_strict_violation() {
        let root = ModuleDef::new().module("a", ModuleDef::new().state(json!({"n": 1})));
        let store = Store::new(StoreOptions::new(root).strict(true)).unwrap();
        assert_eq!(store.strict_violations(), 0);
    }
}
