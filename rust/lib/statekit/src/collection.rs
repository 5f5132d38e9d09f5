use tracing::{debug, warn};

use crate::error::{DefinitionKind, StoreError, ValidationError};
use crate::module::{Module, ModuleDef};
use crate::path::ModulePath;

/// The tree of registered modules.
///
/// - `register(path, def, runtime)` builds a subtree and attaches it under
///   the parent found at `path` minus its last key.
/// - `get(path)` walks child lookups from the root.
/// - `namespace(path)` concatenates `key/` for every namespaced module on
///   the way down.
/// - `update(def)` merges a new root definition in place (hot reload).
/// - `unregister(path)` detaches a runtime-registered module.
pub struct ModuleTree {
    root: Module,
}

impl ModuleTree {
    /// Build the tree from the static root definition. Every module created
    /// here is non-runtime and cannot be unregistered later.
    pub fn new(def: ModuleDef) -> Result<Self, StoreError> {
        let root = build(&ModulePath::root(), &def, false)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Module {
        &self.root
    }

    /// Resolve a module by path. `None` if any segment is missing.
    pub fn get(&self, path: &ModulePath) -> Option<&Module> {
        path.segments()
            .iter()
            .try_fold(&self.root, |module, key| module.child(key))
    }

    fn get_mut(&mut self, path: &ModulePath) -> Option<&mut Module> {
        let mut module = &mut self.root;
        for key in path.segments() {
            module = module.child_mut(key)?;
        }
        Some(module)
    }

    /// Namespace prefix for the module at `path`.
    ///
    /// Walks from the root so each module on the way contributes its own
    /// key only if it is namespaced: with `a` namespaced and its child `b`
    /// namespaced, `b` gets `"a/b/"`; with `a` plain, `b` gets `"b/"`.
    pub fn namespace(&self, path: &ModulePath) -> String {
        let mut module = &self.root;
        let mut namespace = String::new();
        for key in path.segments() {
            let Some(child) = module.child(key) else {
                break;
            };
            module = child;
            if module.namespaced() {
                namespace.push_str(key);
                namespace.push('/');
            }
        }
        namespace
    }

    /// Register `def` (and its declared children) at `path`.
    ///
    /// Fails if `path` is the root, the parent does not exist, or the
    /// definition does not validate. Nothing is attached on failure.
    pub fn register(
        &mut self,
        path: &ModulePath,
        def: ModuleDef,
        runtime: bool,
    ) -> Result<(), StoreError> {
        let Some((parent_path, key)) = path.split_last() else {
            return Err(StoreError::RootRegistration);
        };
        let module = build(path, &def, runtime)?;
        let parent = self
            .get_mut(&parent_path)
            .ok_or_else(|| StoreError::MissingParent(path.clone()))?;
        if parent.add_child(key, module).is_some() {
            warn!("module \"{}\" replaced an existing module at the same path", path);
        }
        debug!("registered module \"{}\" (runtime: {})", path, runtime);
        Ok(())
    }

    /// Merge a new root definition into the existing tree.
    ///
    /// Each visited module takes the new namespaced flag and handler
    /// tables. A child key that does not exist yet is skipped with a
    /// warning: adding modules needs an explicit `register`. Children the
    /// new definition does not mention are kept.
    pub fn update(&mut self, def: ModuleDef) -> Result<(), StoreError> {
        validate_tree(&ModulePath::root(), &def)?;
        update(&ModulePath::root(), &mut self.root, &def);
        Ok(())
    }

    /// Detach the module at `path`.
    ///
    /// Returns `false` (and leaves the tree alone) for the root, unknown
    /// paths, and modules from the static configuration.
    pub fn unregister(&mut self, path: &ModulePath) -> bool {
        let Some((parent_path, key)) = path.split_last() else {
            return false;
        };
        let Some(parent) = self.get_mut(&parent_path) else {
            warn!("cannot unregister \"{}\": parent module not found", path);
            return false;
        };
        let runtime = match parent.child(key) {
            Some(child) => child.runtime(),
            None => {
                warn!("cannot unregister \"{}\": module not found", path);
                return false;
            }
        };
        if !runtime {
            debug!("module \"{}\" is static, unregister skipped", path);
            return false;
        }
        parent.remove_child(key);
        debug!("unregistered module \"{}\"", path);
        true
    }

    pub fn is_registered(&self, path: &ModulePath) -> bool {
        self.get(path).is_some()
    }
}

fn build(path: &ModulePath, def: &ModuleDef, runtime: bool) -> Result<Module, StoreError> {
    validate(path, def)?;
    let mut module = Module::new(def, runtime);
    for (key, child_def) in &def.modules {
        let child = build(&path.child(key), child_def, runtime)?;
        module.add_child(key, child);
    }
    Ok(module)
}

fn update(path: &ModulePath, target: &mut Module, def: &ModuleDef) {
    target.update(def);
    for (key, child_def) in &def.modules {
        let child_path = path.child(key);
        match target.child_mut(key) {
            Some(child) => update(&child_path, child, child_def),
            // Only this branch is skipped; later siblings are still merged.
            None => warn!(
                "trying to add a new module \"{}\" on hot reloading, manual reload is needed",
                child_path
            ),
        }
    }
}

fn validate_tree(path: &ModulePath, def: &ModuleDef) -> Result<(), ValidationError> {
    validate(path, def)?;
    for (key, child_def) in &def.modules {
        validate_tree(&path.child(key), child_def)?;
    }
    Ok(())
}

/// Shape check for one module definition. Only active in debug builds;
/// optimized builds trust their input.
fn validate(path: &ModulePath, def: &ModuleDef) -> Result<(), ValidationError> {
    if !cfg!(debug_assertions) {
        return Ok(());
    }
    let tables = [
        (DefinitionKind::Getter, def.getters.keys().collect::<Vec<_>>()),
        (DefinitionKind::Mutation, def.mutations.keys().collect()),
        (DefinitionKind::Action, def.actions.keys().collect()),
        (DefinitionKind::Module, def.modules.keys().collect()),
    ];
    for (kind, keys) in tables {
        for key in keys {
            if let Some(reason) = key_violation(kind, key) {
                return Err(ValidationError {
                    path: path.clone(),
                    kind,
                    key: key.clone(),
                    reason: reason.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn key_violation(kind: DefinitionKind, key: &str) -> Option<&'static str> {
    if key.is_empty() {
        return Some("must not be empty");
    }
    if key.chars().any(char::is_whitespace) {
        return Some("must not contain whitespace");
    }
    if kind == DefinitionKind::Module && key.contains('/') {
        return Some("must not contain '/'");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(def: ModuleDef) -> ModuleTree {
        ModuleTree::new(def).unwrap()
    }

    // ========================================================================
    // Construction / get
    // ========================================================================

    #[test]
    fn builds_nested_children() {
        let t = tree(
            ModuleDef::new().module(
                "a",
                ModuleDef::new()
                    .state(json!({"n": 1}))
                    .module("b", ModuleDef::new().state(json!({"n": 2}))),
            ),
        );

        assert!(t.get(&ModulePath::root()).is_some());
        assert_eq!(t.get(&"a".into()).unwrap().state(), &json!({"n": 1}));
        assert_eq!(
            t.get(&["a", "b"].into()).unwrap().state(),
            &json!({"n": 2})
        );
        assert!(!t.get(&["a", "b"].into()).unwrap().runtime());
    }

    #[test]
    fn get_missing_segment_returns_none() {
        let t = tree(ModuleDef::new().module("a", ModuleDef::new()));
        assert!(t.get(&["a", "x"].into()).is_none());
        assert!(t.get(&"x".into()).is_none());
    }

    // ========================================================================
    // Namespaces
    // ========================================================================

    #[test]
    fn namespace_nested_namespaced() {
        let t = tree(ModuleDef::new().module(
            "a",
            ModuleDef::new()
                .namespaced(true)
                .module("b", ModuleDef::new().namespaced(true)),
        ));
        assert_eq!(t.namespace(&ModulePath::root()), "");
        assert_eq!(t.namespace(&"a".into()), "a/");
        assert_eq!(t.namespace(&["a", "b"].into()), "a/b/");
    }

    #[test]
    fn namespace_skips_plain_ancestor() {
        let t = tree(ModuleDef::new().module(
            "a",
            ModuleDef::new().module("b", ModuleDef::new().namespaced(true)),
        ));
        assert_eq!(t.namespace(&"a".into()), "");
        assert_eq!(t.namespace(&["a", "b"].into()), "b/");
    }

    #[test]
    fn namespace_plain_child_of_namespaced() {
        let t = tree(ModuleDef::new().module(
            "a",
            ModuleDef::new()
                .namespaced(true)
                .module("b", ModuleDef::new()),
        ));
        assert_eq!(t.namespace(&["a", "b"].into()), "a/");
    }

    // ========================================================================
    // Register
    // ========================================================================

    #[test]
    fn register_runtime_module() {
        let mut t = tree(ModuleDef::new());
        t.register(
            &"cart".into(),
            ModuleDef::new().module("items", ModuleDef::new()),
            true,
        )
        .unwrap();

        assert!(t.get(&"cart".into()).unwrap().runtime());
        assert!(t.get(&["cart", "items"].into()).unwrap().runtime());
    }

    #[test]
    fn register_root_is_rejected() {
        let mut t = tree(ModuleDef::new());
        let err = t.register(&ModulePath::root(), ModuleDef::new(), true);
        assert!(matches!(err, Err(StoreError::RootRegistration)));
    }

    #[test]
    fn register_without_parent_is_rejected() {
        let mut t = tree(ModuleDef::new());
        let err = t.register(&["missing", "child"].into(), ModuleDef::new(), true);
        assert!(matches!(err, Err(StoreError::MissingParent(_))));
        assert!(!t.is_registered(&["missing", "child"].into()));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn register_invalid_definition_attaches_nothing() {
        let mut t = tree(ModuleDef::new());
        let def = ModuleDef::new().module("bad", ModuleDef::new().mutation("", |_, _| {}));
        let err = t.register(&"cart".into(), def, true).unwrap_err();

        match err {
            StoreError::Validation(v) => {
                assert_eq!(v.path, ModulePath::from(["cart", "bad"]));
                assert_eq!(v.kind, DefinitionKind::Mutation);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!t.is_registered(&"cart".into()));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn module_key_with_slash_is_rejected() {
        let err = ModuleTree::new(ModuleDef::new().module("a/b", ModuleDef::new()));
        assert!(matches!(err, Err(StoreError::Validation(_))));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn getter_key_with_whitespace_is_rejected() {
        let err = ModuleTree::new(ModuleDef::new().getter("total count", |_| json!(0)));
        assert!(matches!(err, Err(StoreError::Validation(_))));
    }

    // ========================================================================
    // Update
    // ========================================================================

    #[test]
    fn update_merges_existing_modules() {
        let mut t = tree(
            ModuleDef::new()
                .mutation("root_m", |_, _| {})
                .module("a", ModuleDef::new().state(json!({"n": 1}))),
        );

        t.update(
            ModuleDef::new().module(
                "a",
                ModuleDef::new()
                    .namespaced(true)
                    .state(json!({"n": 99}))
                    .mutation("inc", |_, _| {}),
            ),
        )
        .unwrap();

        let a = t.get(&"a".into()).unwrap();
        assert!(a.namespaced());
        assert_eq!(a.mutations().count(), 1);
        // State is never replaced by hot reload.
        assert_eq!(a.state(), &json!({"n": 1}));
        // Root mutations not provided in the update, kept.
        assert_eq!(t.root().mutations().count(), 1);
    }

    #[test]
    fn update_skips_unknown_child_but_continues_siblings() {
        let mut t = tree(ModuleDef::new().module("a", ModuleDef::new()));

        t.update(
            ModuleDef::new()
                .module("new_one", ModuleDef::new())
                .module("a", ModuleDef::new().namespaced(true)),
        )
        .unwrap();

        assert!(!t.is_registered(&"new_one".into()));
        assert!(t.get(&"a".into()).unwrap().namespaced());
    }

    #[test]
    fn update_keeps_unmentioned_children() {
        let mut t = tree(
            ModuleDef::new()
                .module("a", ModuleDef::new())
                .module("b", ModuleDef::new()),
        );
        t.update(ModuleDef::new().module("a", ModuleDef::new())).unwrap();
        assert!(t.is_registered(&"b".into()));
    }

    // ========================================================================
    // Unregister
    // ========================================================================

    #[test]
    fn unregister_runtime_module() {
        let mut t = tree(ModuleDef::new());
        t.register(&"a".into(), ModuleDef::new(), true).unwrap();
        assert!(t.unregister(&"a".into()));
        assert!(!t.is_registered(&"a".into()));
    }

    #[test]
    fn unregister_static_module_is_noop() {
        let mut t = tree(ModuleDef::new().module("a", ModuleDef::new()));
        assert!(!t.unregister(&"a".into()));
        assert!(t.is_registered(&"a".into()));
    }

    #[test]
    fn unregister_unknown_or_root_is_noop() {
        let mut t = tree(ModuleDef::new());
        assert!(!t.unregister(&"ghost".into()));
        assert!(!t.unregister(&["ghost", "child"].into()));
        assert!(!t.unregister(&ModulePath::root()));
    }
}
