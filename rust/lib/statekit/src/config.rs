use std::fmt;
use std::sync::Arc;

use crate::module::ModuleDef;
use crate::plugin::{Plugin, plugin};
use crate::plugins::devtools::DevtoolsHook;
use crate::store::Store;

/// Store construction options.
#[derive(Clone)]
pub struct StoreOptions {
    /// Root module definition. Its children form the static module tree.
    pub root: ModuleDef,

    /// Plugins applied once, in order, at the end of construction.
    pub plugins: Vec<Plugin>,

    /// Report state changes made outside mutation handlers.
    pub strict: bool,

    /// Attach the devtools bridge.
    /// Defaults to `true` in debug builds if not specified.
    pub devtools: Option<bool>,

    /// Devtools hook the bridge talks to. Without one the bridge is not
    /// attached even when `devtools` is enabled.
    pub devtools_hook: Option<Arc<dyn DevtoolsHook>>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            root: ModuleDef::new(),
            plugins: Vec::new(),
            strict: false,
            devtools: None,
            devtools_hook: None,
        }
    }
}

impl StoreOptions {
    pub fn new(root: ModuleDef) -> Self {
        Self {
            root,
            ..Self::default()
        }
    }

    pub fn plugin<F>(mut self, f: F) -> Self
    where
        F: Fn(&Store) + Send + Sync + 'static,
    {
        self.plugins.push(plugin(f));
        self
    }

    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Plugin>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn devtools(mut self, enabled: bool) -> Self {
        self.devtools = Some(enabled);
        self
    }

    pub fn devtools_hook(mut self, hook: Arc<dyn DevtoolsHook>) -> Self {
        self.devtools_hook = Some(hook);
        self
    }

    /// Resolved devtools flag.
    pub fn devtools_enabled(&self) -> bool {
        self.devtools.unwrap_or(cfg!(debug_assertions))
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("root", &self.root)
            .field("plugins", &self.plugins.len())
            .field("strict", &self.strict)
            .field("devtools", &self.devtools)
            .field("devtools_hook", &self.devtools_hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = StoreOptions::default();
        assert!(!options.strict);
        assert!(options.plugins.is_empty());
        assert!(options.devtools.is_none());
        assert!(options.devtools_hook.is_none());
        assert_eq!(options.devtools_enabled(), cfg!(debug_assertions));
    }

    #[test]
    fn builder() {
        let options = StoreOptions::new(ModuleDef::new().namespaced(true))
            .strict(true)
            .devtools(false)
            .plugin(|_| {})
            .plugin(|_| {});
        assert!(options.strict);
        assert!(options.root.namespaced);
        assert_eq!(options.plugins.len(), 2);
        assert!(!options.devtools_enabled());
    }
}
