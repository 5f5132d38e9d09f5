use std::fmt;

use thiserror::Error;

use crate::path::ModulePath;

/// Which part of a module definition a validation failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Getter,
    Mutation,
    Action,
    Module,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DefinitionKind::Getter => "getters",
            DefinitionKind::Mutation => "mutations",
            DefinitionKind::Action => "actions",
            DefinitionKind::Module => "modules",
        };
        f.write_str(name)
    }
}

/// A malformed module definition, found at registration time.
///
/// Identifies the module path, the definition table and the offending key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} key \"{key}\" in module \"{path}\" {reason}")]
pub struct ValidationError {
    pub path: ModulePath,
    pub kind: DefinitionKind,
    pub key: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Object-style request without a usable `type` field.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cannot register the root module by using register_module")]
    RootRegistration,

    #[error("parent module not found for \"{0}\"")]
    MissingParent(ModulePath),

    /// Failure reported by an action handler.
    #[error("{0}")]
    Action(String),

    /// Failure reported by an action subscriber hook.
    #[error("{0}")]
    Subscriber(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Shorthand for action handlers reporting a failure.
    pub fn action(message: impl Into<String>) -> Self {
        StoreError::Action(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_path_kind_and_key() {
        let err = ValidationError {
            path: ModulePath::from(["cart", "items"]),
            kind: DefinitionKind::Mutation,
            key: "".to_string(),
            reason: "must not be empty".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "mutations key \"\" in module \"cart.items\" must not be empty"
        );
    }

    #[test]
    fn validation_converts_into_store_error() {
        let err: StoreError = ValidationError {
            path: ModulePath::root(),
            kind: DefinitionKind::Getter,
            key: "a b".to_string(),
            reason: "must not contain whitespace".to_string(),
        }
        .into();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(err.to_string().contains("<root>"));
    }

    #[test]
    fn action_shorthand() {
        let err = StoreError::action("boom");
        assert_eq!(err.to_string(), "boom");
    }
}
