//! Operator decisions and their outcomes

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::headers::HeaderList;
use crate::snapshot::{FlowId, FlowSnapshot};

/// Terminal decision for one paused flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Forward,
    Drop,
}

/// Field overrides applied to a flow before it is forwarded.
///
/// Only the fields that are present change. `headers` is a full replacement
/// set, so leaving a header out removes it. `body_base64` wins over `body`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModificationError {
    #[error("invalid method: {0:?}")]
    InvalidMethod(String),
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    #[error("invalid header: {0:?}")]
    InvalidHeader(String),
    #[error("invalid base64 body: {0}")]
    InvalidBody(String),
    #[error("a drop decision cannot carry a modification")]
    ModificationOnDrop,
}

impl Modification {
    /// A modification that restates every field of the snapshot.
    pub fn from_snapshot(snapshot: &FlowSnapshot) -> Self {
        Self {
            method: Some(snapshot.method.clone()),
            path: Some(snapshot.path.clone()),
            headers: Some(snapshot.headers.clone()),
            body: Some(snapshot.body.clone()),
            body_base64: snapshot.body_base64.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.method.is_none()
            && self.path.is_none()
            && self.headers.is_none()
            && self.body.is_none()
            && self.body_base64.is_none()
    }

    /// Replacement body bytes, if the modification carries one.
    pub fn body_bytes(&self) -> Result<Option<Vec<u8>>, ModificationError> {
        if let Some(encoded) = &self.body_base64 {
            return STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| ModificationError::InvalidBody(e.to_string()));
        }
        Ok(self.body.as_ref().map(|text| text.as_bytes().to_vec()))
    }

    /// Check every present field without touching any flow.
    pub fn validate(&self) -> Result<(), ModificationError> {
        if let Some(method) = &self.method {
            if method.is_empty() || !method.bytes().all(is_token_byte) {
                return Err(ModificationError::InvalidMethod(method.clone()));
            }
        }
        if let Some(path) = &self.path {
            let well_formed = (path.starts_with('/') || path == "*")
                && !path.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control());
            if !well_formed {
                return Err(ModificationError::InvalidPath(path.clone()));
            }
        }
        if let Some(headers) = &self.headers {
            for (name, value) in headers.iter() {
                if name.is_empty() || !name.bytes().all(is_token_byte) {
                    return Err(ModificationError::InvalidHeader(name.to_string()));
                }
                if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
                    return Err(ModificationError::InvalidHeader(name.to_string()));
                }
            }
        }
        self.body_bytes().map(|_| ())
    }
}

// RFC 9110 token characters
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// One queued operator decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: FlowId,
    #[serde(alias = "action")]
    pub kind: ActionKind,
    #[serde(default, alias = "modified", skip_serializing_if = "Option::is_none")]
    pub modification: Option<Modification>,
}

impl Action {
    pub fn new_forward(id: FlowId, modification: Option<Modification>) -> Self {
        Self {
            id,
            kind: ActionKind::Forward,
            modification,
        }
    }

    pub fn new_drop(id: FlowId) -> Self {
        Self {
            id,
            kind: ActionKind::Drop,
            modification: None,
        }
    }

    pub fn validate(&self) -> Result<(), ModificationError> {
        match (&self.kind, &self.modification) {
            (ActionKind::Drop, Some(_)) => Err(ModificationError::ModificationOnDrop),
            (ActionKind::Forward, Some(modification)) => modification.validate(),
            _ => Ok(()),
        }
    }
}

/// What the proxy did with a drained action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Forwarded,
    Dropped,
    /// No live flow under that id: already resolved or never registered
    Stale,
    /// The modification could not be applied; the flow is still paused
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub id: FlowId,
    pub result: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ActionOutcome {
    pub fn new(id: FlowId, result: OutcomeKind) -> Self {
        Self {
            id,
            result,
            reason: None,
        }
    }

    pub fn rejected(id: FlowId, reason: impl Into<String>) -> Self {
        Self {
            id,
            result: OutcomeKind::Rejected,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_accepts_legacy_field_names() {
        let action: Action = serde_json::from_str(
            r#"{"id":"abc","action":"forward","modified":{"method":"PUT"}}"#,
        )
        .unwrap();
        assert_eq!(action.kind, ActionKind::Forward);
        assert_eq!(
            action.modification.unwrap().method.as_deref(),
            Some("PUT")
        );

        let action: Action = serde_json::from_str(r#"{"id":"abc","kind":"drop"}"#).unwrap();
        assert_eq!(action, Action::new_drop(FlowId::from("abc")));
    }

    #[test]
    fn test_drop_with_modification_is_invalid() {
        let action = Action {
            id: FlowId::from("x"),
            kind: ActionKind::Drop,
            modification: Some(Modification::default()),
        };
        assert_eq!(action.validate(), Err(ModificationError::ModificationOnDrop));
    }

    #[test]
    fn test_modification_validation() {
        let ok = Modification {
            method: Some("PATCH".into()),
            path: Some("/api/v1?q=1".into()),
            headers: Some(vec![("X-Token", "abc")].into_iter().collect()),
            body: Some("payload".into()),
            body_base64: None,
        };
        assert!(ok.validate().is_ok());

        let bad_method = Modification {
            method: Some("GE T".into()),
            ..Default::default()
        };
        assert!(matches!(bad_method.validate(), Err(ModificationError::InvalidMethod(_))));

        let bad_path = Modification {
            path: Some("no-slash".into()),
            ..Default::default()
        };
        assert!(matches!(bad_path.validate(), Err(ModificationError::InvalidPath(_))));

        let bad_header = Modification {
            headers: Some(vec![("X-Evil", "a\r\nInjected: 1")].into_iter().collect()),
            ..Default::default()
        };
        assert!(matches!(bad_header.validate(), Err(ModificationError::InvalidHeader(_))));

        let bad_body = Modification {
            body_base64: Some("!!not base64!!".into()),
            ..Default::default()
        };
        assert!(matches!(bad_body.validate(), Err(ModificationError::InvalidBody(_))));
    }

    #[test]
    fn test_base64_body_wins() {
        let modification = Modification {
            body: Some("text".into()),
            body_base64: Some(STANDARD.encode([0u8, 1, 2])),
            ..Default::default()
        };
        assert_eq!(modification.body_bytes().unwrap(), Some(vec![0, 1, 2]));
        assert!(Modification::default().is_empty());
        assert_eq!(Modification::default().body_bytes().unwrap(), None);
    }

    #[test]
    fn test_outcome_wire_shape() {
        let json = serde_json::to_string(&ActionOutcome::new(FlowId::from("a"), OutcomeKind::Stale)).unwrap();
        assert_eq!(json, r#"{"id":"a","result":"stale"}"#);
    }
}
