use std::sync::Arc;

use tracing::debug;

use crate::store::Store;

/// A plugin: called once with the store at the end of construction.
///
/// Plugins typically subscribe to mutations or actions, or keep a weak
/// handle to the store to commit from outside.
pub type Plugin = Arc<dyn Fn(&Store) + Send + Sync>;

/// Wrap a closure as a [`Plugin`].
pub fn plugin<F>(f: F) -> Plugin
where
    F: Fn(&Store) + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn apply_plugins(store: &Store, plugins: &[Plugin]) {
    for (i, plugin) in plugins.iter().enumerate() {
        plugin(store);
        debug!("applied plugin #{}", i);
    }
}
