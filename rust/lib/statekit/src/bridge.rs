//! Host framework integration.
//!
//! `install()` is the one process-wide entry point a UI framework calls to
//! enable store injection. Component trees then resolve their store through
//! [`StoreScope`]: a node uses the store it declares itself, or inherits the
//! one of its parent.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error};

use crate::store::Store;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Enable store injection. Returns `false` (and reports it) when already
/// installed.
pub fn install() -> bool {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        error!("store bridge already installed, install() should be called only once");
        return false;
    }
    debug!("store bridge installed");
    true
}

pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::SeqCst)
}

/// What a component node declares as its store.
#[derive(Clone)]
pub enum StoreSource {
    Instance(Store),
    /// Called once, when the node's scope is created.
    Factory(Arc<dyn Fn() -> Store + Send + Sync>),
}

impl StoreSource {
    fn resolve(self) -> Store {
        match self {
            StoreSource::Instance(store) => store,
            StoreSource::Factory(factory) => factory(),
        }
    }
}

impl From<Store> for StoreSource {
    fn from(store: Store) -> Self {
        StoreSource::Instance(store)
    }
}

/// The store reference carried by one node of a component tree.
#[derive(Clone, Default)]
pub struct StoreScope {
    store: Option<Store>,
}

impl StoreScope {
    /// Scope of a tree root.
    pub fn root(source: Option<StoreSource>) -> Self {
        Self {
            store: source.map(StoreSource::resolve),
        }
    }

    /// Scope of a child node: its own store if declared, else the parent's.
    pub fn child(&self, source: Option<StoreSource>) -> Self {
        match source {
            Some(source) => Self {
                store: Some(source.resolve()),
            },
            None => self.clone(),
        }
    }

    pub fn store(&self) -> Option<&Store> {
        self.store.as_ref()
    }
}

impl fmt::Debug for StoreScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreScope")
            .field("has_store", &self.store.is_some())
            .finish()
    }
}
