//! Counter demo: a namespaced module, an async action, a getter, a watcher
//! and the logger plugin.
//!
//! ```sh
//! RUST_LOG=debug cargo run -p openerp-statekit --example counter
//! ```

use std::time::Duration;

use openerp_statekit::{
    LoggerOptions, ModuleDef, RegisterOptions, Store, StoreError, StoreOptions, logger_plugin,
};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

fn counter() -> ModuleDef {
    ModuleDef::new()
        .namespaced(true)
        .state(json!({"count": 0}))
        .mutation("add", |state, payload| {
            let by = payload.as_i64().unwrap_or(1);
            state["count"] = json!(state["count"].as_i64().unwrap_or(0) + by);
        })
        .getter("parity", |ctx| {
            let even = ctx.state()["count"].as_i64().unwrap_or(0) % 2 == 0;
            json!(if even { "even" } else { "odd" })
        })
        .action("add_later", |ctx, payload| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ctx.commit("add", payload);
            Ok(ctx.state()["count"].clone())
        })
}

#[tokio::main]
async fn main() -> Result<(), StoreError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = StoreOptions::new(ModuleDef::new().module("counter", counter()))
        .strict(true)
        .plugins([logger_plugin(LoggerOptions::default().log_actions(false))]);
    let store = Store::new(options)?;

    store.watch(
        |store| store.getter("counter/parity").unwrap_or(Value::Null),
        |new, old| tracing::info!("parity changed: {} -> {}", old, new),
    );

    store.commit("counter/add", json!(1));
    let count = store.dispatch("counter/add_later", json!(2)).await?;
    tracing::info!("count after action: {}", count);

    // A second counter, registered at runtime.
    store.register_module("extra", counter(), RegisterOptions::default())?;
    store.commit("extra/add", json!(10));
    tracing::info!("state: {}", store.state());

    store.unregister_module("extra");
    tracing::info!("state after unregister: {}", store.state());
    Ok(())
}
