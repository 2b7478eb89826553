//! Event-channel messages exchanged with control-plane subscribers

use serde::{Deserialize, Serialize};

use crate::action::Modification;
use crate::snapshot::{FlowId, FlowSnapshot};

/// Messages sent by a subscriber (operator UI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ToggleIntercept {
        #[serde(default)]
        enabled: bool,
    },
    Forward {
        id: FlowId,
        #[serde(
            default,
            rename = "modified",
            alias = "modification",
            skip_serializing_if = "Option::is_none"
        )]
        modification: Option<Modification>,
    },
    Drop {
        id: FlowId,
    },
    Remove {
        id: FlowId,
    },
}

/// Messages pushed by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Intercepted { data: FlowSnapshot },
    InterceptStatus { enabled: bool },
    Forwarded { id: FlowId },
    Dropped { id: FlowId },
    Removed { id: FlowId },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_parse() {
        let toggle: ClientMessage =
            serde_json::from_str(r#"{"type":"toggle_intercept","enabled":true}"#).unwrap();
        assert_eq!(toggle, ClientMessage::ToggleIntercept { enabled: true });

        let toggle: ClientMessage = serde_json::from_str(r#"{"type":"toggle_intercept"}"#).unwrap();
        assert_eq!(toggle, ClientMessage::ToggleIntercept { enabled: false });

        let forward: ClientMessage = serde_json::from_str(
            r#"{"type":"forward","id":"f1","modified":{"headers":{"A":"9"}}}"#,
        )
        .unwrap();
        match forward {
            ClientMessage::Forward { id, modification } => {
                assert_eq!(id.as_str(), "f1");
                let headers = modification.unwrap().headers.unwrap();
                assert_eq!(headers.get("A"), Some("9"));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let drop: ClientMessage = serde_json::from_str(r#"{"type":"drop","id":"f2"}"#).unwrap();
        assert_eq!(drop, ClientMessage::Drop { id: FlowId::from("f2") });
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"explode"}"#).is_err());
    }

    #[test]
    fn test_server_message_shape() {
        let json = serde_json::to_value(ServerMessage::InterceptStatus { enabled: true }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "intercept_status", "enabled": true}));

        let json = serde_json::to_value(ServerMessage::Dropped { id: FlowId::from("x") }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "dropped", "id": "x"}));
    }
}
