use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

use crate::error::StoreError;
use crate::request::Request;

/// Unique subscription identifier, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Called after every commit with `(mutation, state after the commit)`.
pub type MutationSubscriber = Arc<dyn Fn(&Request, &Value) + Send + Sync>;

/// Action hook: `(action, state at the time of the call)`.
pub type ActionHook = Arc<dyn Fn(&Request, &Value) -> Result<(), StoreError> + Send + Sync>;

/// A pair of optional hooks run around every dispatch.
///
/// `before` runs before the action body starts, `after` once the action's
/// result has settled (on success and on failure).
#[derive(Clone, Default)]
pub struct ActionSubscriber {
    pub(crate) before: Option<ActionHook>,
    pub(crate) after: Option<ActionHook>,
}

impl ActionSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &Value) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(hook));
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &Value) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        self.after = Some(Arc::new(hook));
        self
    }

    /// A bare callback subscribes as a `before` hook.
    pub fn before_fn<F>(hook: F) -> Self
    where
        F: Fn(&Request, &Value) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        Self::new().before(hook)
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Before,
    After,
}

/// Mutation and action subscriber lists.
///
/// Each notification runs over a snapshot of its list, so subscribers may
/// subscribe or unsubscribe from inside a callback without affecting the
/// notification in progress.
pub(crate) struct SubscriptionHub {
    mutations: RwLock<Vec<(SubscriptionId, MutationSubscriber)>>,
    actions: RwLock<Vec<(SubscriptionId, ActionSubscriber)>>,
    next_id: AtomicU64,
}

impl SubscriptionHub {
    pub(crate) fn new() -> Self {
        Self {
            mutations: RwLock::new(Vec::new()),
            actions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn subscribe(&self, subscriber: MutationSubscriber) -> SubscriptionId {
        let id = self.next_id();
        self.mutations.write().push((id, subscriber));
        id
    }

    pub(crate) fn subscribe_action(&self, subscriber: ActionSubscriber) -> SubscriptionId {
        let id = self.next_id();
        self.actions.write().push((id, subscriber));
        id
    }

    /// Remove a subscription of either kind. Returns `false` if not found.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut mutations = self.mutations.write();
        let before = mutations.len();
        mutations.retain(|(sid, _)| *sid != id);
        if mutations.len() < before {
            return true;
        }
        drop(mutations);

        let mut actions = self.actions.write();
        let before = actions.len();
        actions.retain(|(sid, _)| *sid != id);
        actions.len() < before
    }

    pub(crate) fn notify_mutation(&self, mutation: &Request, state: &Value) {
        let subscribers: Vec<MutationSubscriber> = self
            .mutations
            .read()
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in subscribers {
            subscriber(mutation, state);
        }
    }

    pub(crate) fn notify_before(&self, action: &Request, state: &Value) {
        self.notify_action(Phase::Before, action, state);
    }

    pub(crate) fn notify_after(&self, action: &Request, state: &Value) {
        self.notify_action(Phase::After, action, state);
    }

    fn notify_action(&self, phase: Phase, action: &Request, state: &Value) {
        let hooks: Vec<ActionHook> = self
            .actions
            .read()
            .iter()
            .filter_map(|(_, s)| match phase {
                Phase::Before => s.before.clone(),
                Phase::After => s.after.clone(),
            })
            .collect();
        for hook in hooks {
            if let Err(e) = hook(action, state) {
                let phase = match phase {
                    Phase::Before => "before",
                    Phase::After => "after",
                };
                warn!("error in {} action subscriber for \"{}\": {}", phase, action.ty, e);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn mutation_subscriber_count(&self) -> usize {
        self.mutations.read().len()
    }

    #[cfg(test)]
    pub(crate) fn action_subscriber_count(&self) -> usize {
        self.actions.read().len()
    }
}
