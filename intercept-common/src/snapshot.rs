//! Immutable flow snapshots
//!
//! A [`FlowSnapshot`] is taken once, when a flow is paused, and is never
//! edited afterwards. Operator edits travel separately as a
//! [`Modification`](crate::Modification).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::headers::HeaderList;

/// Opaque flow identifier, unique for the lifetime of the proxy process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(String);

impl FlowId {
    /// Draw a fresh identifier (UUID v4, 122 random bits).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FlowId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for FlowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Transferable copy of a paused request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub id: FlowId,
    pub method: String,
    pub url: String,
    pub host: String,
    /// Path including the query string
    pub path: String,
    pub scheme: String,
    pub port: u16,
    pub headers: HeaderList,
    /// Body decoded for display; invalid UTF-8 is replaced, never rejected
    pub body: String,
    /// Raw body, only present when `body` could not represent it exactly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Absent until the engine has produced a response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSnapshot>,
}

impl FlowSnapshot {
    /// The exact request body bytes carried by this snapshot.
    pub fn body_bytes(&self) -> Vec<u8> {
        body_from_wire(&self.body, self.body_base64.as_deref())
    }
}

/// Transferable copy of a response, same shape as the request fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status_code: u16,
    pub headers: HeaderList,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
}

/// Split raw bytes into display text plus, when needed, a lossless base64 copy.
///
/// Total: every byte sequence, including an empty one, produces a value.
pub fn body_to_wire(bytes: &[u8]) -> (String, Option<String>) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), None),
        Err(_) => (
            String::from_utf8_lossy(bytes).into_owned(),
            Some(STANDARD.encode(bytes)),
        ),
    }
}

/// Inverse of [`body_to_wire`]. A base64 copy that fails to decode falls back
/// to the display text.
pub fn body_from_wire(text: &str, base64: Option<&str>) -> Vec<u8> {
    base64
        .and_then(|encoded| STANDARD.decode(encoded).ok())
        .unwrap_or_else(|| text.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_body(bytes: &[u8]) -> FlowSnapshot {
        let (body, body_base64) = body_to_wire(bytes);
        FlowSnapshot {
            id: FlowId::generate(),
            method: "POST".to_string(),
            url: "http://example.com/upload?x=1".to_string(),
            host: "example.com".to_string(),
            path: "/upload?x=1".to_string(),
            scheme: "http".to_string(),
            port: 80,
            headers: HeaderList::new(),
            body,
            body_base64,
            timestamp: Utc::now(),
            response: None,
        }
    }

    #[test]
    fn test_text_body_has_no_base64_copy() {
        let snapshot = snapshot_with_body(b"hello");
        assert_eq!(snapshot.body, "hello");
        assert!(snapshot.body_base64.is_none());
        assert_eq!(snapshot.body_bytes(), b"hello");
    }

    #[test]
    fn test_binary_body_survives_json() {
        let raw = vec![0xff, 0x00, 0xfe, b'a'];
        let snapshot = snapshot_with_body(&raw);
        assert!(snapshot.body.contains('\u{FFFD}'));

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: FlowSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body_bytes(), raw);
    }

    #[test]
    fn test_empty_body() {
        let snapshot = snapshot_with_body(&[]);
        assert_eq!(snapshot.body, "");
        assert!(snapshot.body_bytes().is_empty());
    }

    #[test]
    fn test_wire_shape() {
        let snapshot = snapshot_with_body(b"{}");
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["method"], "POST");
        assert_eq!(value["port"], 80);
        assert!(value.get("response").is_none());
        assert!(value.get("body_base64").is_none());
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let ids: std::collections::HashSet<FlowId> = (0..1000).map(|_| FlowId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
