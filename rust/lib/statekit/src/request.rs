use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// A commit or dispatch request: fully-qualified type plus payload.
///
/// Also the record handed to mutation and action subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub ty: String,
    pub payload: Value,
}

impl Request {
    pub fn new(ty: impl Into<String>, payload: Value) -> Self {
        Self {
            ty: ty.into(),
            payload,
        }
    }

    /// Normalize an object-style request.
    ///
    /// `{"type": "cart/add", "id": 7}` is equivalent to
    /// `("cart/add", {"type": "cart/add", "id": 7})`: the whole object
    /// becomes the payload.
    pub fn from_object(object: Value) -> Result<Self, StoreError> {
        let ty = match object.get("type") {
            Some(Value::String(ty)) => ty.clone(),
            Some(other) => {
                return Err(StoreError::InvalidRequest(format!(
                    "expects string as the type, but found {other}"
                )));
            }
            None => {
                return Err(StoreError::InvalidRequest(
                    "object-style request without a \"type\" field".to_string(),
                ));
            }
        };
        Ok(Self {
            ty,
            payload: object,
        })
    }
}

/// Options for commits and dispatches issued from a module's local context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Use the type as-is instead of prefixing the module namespace.
    pub root: bool,
}

impl CommitOptions {
    pub fn root() -> Self {
        Self { root: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_style_keeps_whole_object_as_payload() {
        let req = Request::from_object(json!({"type": "cart/add", "id": 7})).unwrap();
        assert_eq!(req.ty, "cart/add");
        assert_eq!(req.payload, json!({"type": "cart/add", "id": 7}));
    }

    #[test]
    fn object_style_without_type_is_rejected() {
        let err = Request::from_object(json!({"id": 7})).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRequest(_)));
    }

    #[test]
    fn object_style_with_non_string_type_is_rejected() {
        let err = Request::from_object(json!({"type": 3})).unwrap_err();
        assert!(err.to_string().contains("expects string"));
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(Request::from_object(json!("inc")).is_err());
    }

    #[test]
    fn serializes_type_field() {
        let req = Request::new("inc", json!(1));
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"type": "inc", "payload": 1})
        );
    }

    #[test]
    fn root_option() {
        assert!(CommitOptions::root().root);
        assert!(!CommitOptions::default().root);
    }
}
