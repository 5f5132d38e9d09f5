//! Statekit: module-composed reactive state container.
//!
//! One state tree, changed only through named mutations, orchestrated by
//! async actions, and read through memoized getters. The tree is assembled
//! from independently written modules that can be added, removed and
//! hot-swapped at runtime.
//!
//! # Four Primitives
//!
//! - `commit(type, payload)`: run the mutation handlers for `type`, synchronously
//! - `dispatch(type, payload)`: run the action handlers for `type`, awaitable
//! - `getter(type)`: read a derived value, recomputed only when its state changed
//! - `subscribe(f)` / `watch(source, f)`: observe mutations and derived values
//!
//! # Modules and Namespaces
//!
//! Every module owns one slot of the state tree, at its path:
//! - `state`: the root module's own state
//! - `state.cart`: module `cart`
//! - `state.cart.items`: module `items` under `cart`
//!
//! A namespaced module prefixes its mutation, action and getter types with
//! its key. `cart` namespaced with a namespaced child `items` registers
//! `items`' `add` as `cart/items/add`; a module without namespace shares the
//! global type space.
//!
//! # Example
//!
//! ```ignore
//! use openerp_statekit::{ModuleDef, Store, StoreOptions};
//! use serde_json::{json, Value};
//!
//! let counter = ModuleDef::new()
//!     .namespaced(true)
//!     .state(json!({"count": 0}))
//!     .mutation("inc", |state, _| {
//!         state["count"] = json!(state["count"].as_i64().unwrap_or(0) + 1);
//!     })
//!     .getter("double", |ctx| json!(ctx.state()["count"].as_i64().unwrap_or(0) * 2))
//!     .action("inc_twice", |ctx, _| async move {
//!         ctx.commit("inc", Value::Null);
//!         ctx.commit("inc", Value::Null);
//!         Ok(Value::Null)
//!     });
//!
//! let store = Store::new(StoreOptions::new(ModuleDef::new().module("counter", counter)))?;
//!
//! store.commit("counter/inc", Value::Null);
//! store.dispatch("counter/inc_twice", Value::Null).await?;
//! assert_eq!(store.getter("counter/double"), Some(json!(6)));
//! ```

pub mod bridge;
pub mod collection;
pub mod config;
pub mod context;
pub mod error;
pub mod module;
pub mod path;
pub mod plugin;
pub mod plugins;
pub mod reactive;
pub mod request;
mod router;
pub mod store;
pub mod subscription;

// Re-export primary types at crate root.
pub use bridge::{StoreScope, StoreSource};
pub use collection::ModuleTree;
pub use config::StoreOptions;
pub use context::{ActionContext, GetterContext, Getters, LocalContext, LocalGetters};
pub use error::{DefinitionKind, StoreError, ValidationError};
pub use module::{ActionFuture, Module, ModuleDef};
pub use path::ModulePath;
pub use plugin::{Plugin, plugin};
pub use plugins::{DevtoolsEvent, DevtoolsHook, LogSink, LoggerOptions, devtools_plugin, logger_plugin};
pub use reactive::WatchId;
pub use request::{CommitOptions, Request};
pub use store::{RegisterOptions, Store, WeakStore};
pub use subscription::{ActionSubscriber, SubscriptionId};
