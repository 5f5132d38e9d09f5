//! Mutation and action logger.
//!
//! Writes one group per mutation: state before, the mutation, state after.
//! Actions get one group each with the (transformed) action.

use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::info;

use crate::plugin::{Plugin, plugin};
use crate::request::Request;
use crate::store::Store;
use crate::subscription::ActionSubscriber;

/// `(mutation, state before, state after)` → log it or not.
pub type MutationFilter = Arc<dyn Fn(&Request, &Value, &Value) -> bool + Send + Sync>;
/// `(action, state)` → log it or not.
pub type ActionFilter = Arc<dyn Fn(&Request, &Value) -> bool + Send + Sync>;
pub type StateTransformer = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
pub type RequestTransformer = Arc<dyn Fn(&Request) -> Value + Send + Sync>;

/// Where the logger writes.
pub trait LogSink: Send + Sync {
    fn group(&self, title: &str, collapsed: bool);
    fn log(&self, label: &str, value: &Value);
    fn group_end(&self);
}

/// Writes through `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn group(&self, title: &str, _collapsed: bool) {
        info!("{}", title);
    }

    fn log(&self, label: &str, value: &Value) {
        info!("  {} {}", label, value);
    }

    fn group_end(&self) {}
}

#[derive(Clone)]
pub struct LoggerOptions {
    pub collapsed: bool,
    pub filter: MutationFilter,
    /// Applied to both state snapshots before logging.
    pub transformer: StateTransformer,
    pub mutation_transformer: RequestTransformer,
    pub action_filter: ActionFilter,
    pub action_transformer: RequestTransformer,
    pub log_mutations: bool,
    pub log_actions: bool,
    /// `None` disables output entirely.
    pub sink: Option<Arc<dyn LogSink>>,
}

fn request_json(request: &Request) -> Value {
    json!({"type": request.ty, "payload": request.payload})
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            collapsed: true,
            filter: Arc::new(|_: &Request, _: &Value, _: &Value| true),
            transformer: Arc::new(Value::clone),
            mutation_transformer: Arc::new(request_json),
            action_filter: Arc::new(|_: &Request, _: &Value| true),
            action_transformer: Arc::new(request_json),
            log_mutations: true,
            log_actions: true,
            sink: Some(Arc::new(TracingSink)),
        }
    }
}

impl LoggerOptions {
    pub fn collapsed(mut self, collapsed: bool) -> Self {
        self.collapsed = collapsed;
        self
    }

    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request, &Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.filter = Arc::new(f);
        self
    }

    pub fn transformer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.transformer = Arc::new(f);
        self
    }

    pub fn mutation_transformer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Value + Send + Sync + 'static,
    {
        self.mutation_transformer = Arc::new(f);
        self
    }

    pub fn action_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request, &Value) -> bool + Send + Sync + 'static,
    {
        self.action_filter = Arc::new(f);
        self
    }

    pub fn action_transformer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Value + Send + Sync + 'static,
    {
        self.action_transformer = Arc::new(f);
        self
    }

    pub fn log_mutations(mut self, enabled: bool) -> Self {
        self.log_mutations = enabled;
        self
    }

    pub fn log_actions(mut self, enabled: bool) -> Self {
        self.log_actions = enabled;
        self
    }

    pub fn sink(mut self, sink: Option<Arc<dyn LogSink>>) -> Self {
        self.sink = sink;
        self
    }
}

/// `" @ 14:03:07.123"`
fn timestamp() -> String {
    format!(" @ {}", Local::now().format("%H:%M:%S%.3f"))
}

/// Plugin logging every mutation and action to the configured sink.
pub fn logger_plugin(options: LoggerOptions) -> Plugin {
    plugin(move |store| attach(store, options.clone()))
}

fn attach(store: &Store, options: LoggerOptions) {
    let Some(sink) = options.sink.clone() else {
        return;
    };

    if options.log_mutations {
        let options = options.clone();
        let sink = Arc::clone(&sink);
        let prev = Mutex::new(store.snapshot());
        store.subscribe(move |mutation, state| {
            let next = state.clone();
            let mut prev = prev.lock();
            if (options.filter)(mutation, &prev, &next) {
                let title = format!("mutation {}{}", mutation.ty, timestamp());
                sink.group(&title, options.collapsed);
                sink.log("prev state", &(options.transformer)(&prev));
                sink.log("mutation", &(options.mutation_transformer)(mutation));
                sink.log("next state", &(options.transformer)(&next));
                sink.group_end();
            }
            *prev = next;
        });
    }

    if options.log_actions {
        store.subscribe_action(ActionSubscriber::before_fn(move |action, state| {
            if (options.action_filter)(action, state) {
                let title = format!("action {}{}", action.ty, timestamp());
                sink.group(&title, options.collapsed);
                sink.log("action", &(options.action_transformer)(action));
                sink.group_end();
            }
            Ok(())
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::module::ModuleDef;

    #[derive(Default)]
    struct MemorySink {
        lines: Mutex<Vec<String>>,
    }

    impl LogSink for MemorySink {
        fn group(&self, title: &str, collapsed: bool) {
            // Drop the timestamp so lines are stable.
            let title = title.split(" @ ").next().unwrap_or(title);
            self.lines.lock().push(format!("group {} {}", title, collapsed));
        }

        fn log(&self, label: &str, value: &Value) {
            self.lines.lock().push(format!("{} {}", label, value));
        }

        fn group_end(&self) {
            self.lines.lock().push("end".to_string());
        }
    }

    fn root() -> ModuleDef {
        ModuleDef::new()
            .state(json!({"count": 0}))
            .mutation("inc", |state, _| {
                state["count"] = json!(state["count"].as_i64().unwrap_or(0) + 1);
            })
            .action("bump", |ctx, _| async move {
                ctx.commit("inc", Value::Null);
                Ok(Value::Null)
            })
    }

    fn store_with(options: LoggerOptions) -> Store {
        Store::new(StoreOptions::new(root()).plugins([logger_plugin(options)])).unwrap()
    }

    #[test]
    fn logs_prev_mutation_next() {
        let sink = Arc::new(MemorySink::default());
        let store = store_with(LoggerOptions::default().sink(Some(sink.clone())));

        store.commit("inc", Value::Null);
        store.commit("inc", Value::Null);

        let lines = sink.lines.lock();
        assert_eq!(
            lines[..5],
            [
                "group mutation inc true",
                "prev state {\"count\":0}",
                "mutation {\"payload\":null,\"type\":\"inc\"}",
                "next state {\"count\":1}",
                "end",
            ]
        );
        // prev advances after every mutation.
        assert_eq!(lines[6], "prev state {\"count\":1}");
    }

    #[test]
    fn filtered_mutation_still_advances_prev() {
        let sink = Arc::new(MemorySink::default());
        let store = store_with(
            LoggerOptions::default()
                .sink(Some(sink.clone()))
                .filter(|_, prev, _| prev["count"] != json!(0)),
        );

        store.commit("inc", Value::Null);
        store.commit("inc", Value::Null);

        let lines = sink.lines.lock();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "prev state {\"count\":1}");
    }

    #[test]
    fn transformers_apply() {
        let sink = Arc::new(MemorySink::default());
        let store = store_with(
            LoggerOptions::default()
                .sink(Some(sink.clone()))
                .collapsed(false)
                .transformer(|state| state["count"].clone())
                .mutation_transformer(|m| json!(m.ty)),
        );

        store.commit("inc", Value::Null);

        let lines = sink.lines.lock();
        assert_eq!(lines[0], "group mutation inc false");
        assert_eq!(lines[1], "prev state 0");
        assert_eq!(lines[2], "mutation \"inc\"");
        assert_eq!(lines[3], "next state 1");
    }

    #[tokio::test]
    async fn logs_actions_before_their_mutations() {
        let sink = Arc::new(MemorySink::default());
        let store = store_with(LoggerOptions::default().sink(Some(sink.clone())));

        store.dispatch("bump", Value::Null).await.unwrap();

        let lines = sink.lines.lock();
        assert_eq!(lines[0], "group action bump true");
        assert_eq!(lines[1], "action {\"payload\":null,\"type\":\"bump\"}");
        assert_eq!(lines[3], "group mutation inc true");
    }

    #[test]
    fn no_sink_is_silent() {
        let store = store_with(LoggerOptions::default().sink(None));
        store.commit("inc", Value::Null);
        assert_eq!(store.state()["count"], json!(1));
    }

    #[test]
    fn timestamp_format() {
        let ts = timestamp();
        assert!(ts.starts_with(" @ "));
        // " @ HH:MM:SS.mmm"
        assert_eq!(ts.len(), 15);
    }
}
