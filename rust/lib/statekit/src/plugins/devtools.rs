//! Devtools bridge.
//!
//! Forwards the store's life to an external debugging tool and lets the
//! tool travel back to a recorded state.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::plugin::{Plugin, plugin};
use crate::request::Request;
use crate::store::Store;

/// Events sent to the devtools hook.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DevtoolsEvent {
    /// Store attached; carries the initial state.
    Init { state: Value },
    /// A committed mutation and the state after it.
    Mutation { mutation: Request, state: Value },
    /// An action handler failed.
    Error { message: String },
}

/// Callback the hook calls to travel to a recorded state.
pub type TravelFn = Box<dyn Fn(Value) + Send + Sync>;

/// Connection to an external devtools frontend.
pub trait DevtoolsHook: Send + Sync {
    fn emit(&self, event: DevtoolsEvent);

    /// Register the callback that replaces the store state.
    fn on_travel(&self, travel: TravelFn);
}

/// Plugin attaching the devtools bridge to `hook`.
pub fn devtools_plugin(hook: Arc<dyn DevtoolsHook>) -> Plugin {
    plugin(move |store| attach(store, Arc::clone(&hook)))
}

pub(crate) fn attach(store: &Store, hook: Arc<dyn DevtoolsHook>) {
    store.set_error_hook(Arc::clone(&hook));

    hook.emit(DevtoolsEvent::Init {
        state: store.snapshot(),
    });

    let weak = store.downgrade();
    hook.on_travel(Box::new(move |state| {
        if let Some(store) = weak.upgrade() {
            debug!("devtools: travel to recorded state");
            store.replace_state(state);
        }
    }));

    let sink = Arc::clone(&hook);
    store.subscribe(move |mutation, state| {
        sink.emit(DevtoolsEvent::Mutation {
            mutation: mutation.clone(),
            state: state.clone(),
        });
    });
}
