//! Push channel wire messages

use serde::{Deserialize, Serialize};

use crate::domain::Task;

/// Client to server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Auth {
        access_token: String,
    },
    Subscribe {
        id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
    },
    Unsubscribe {
        id: u64,
    },
    Ping {
        id: u64,
    },
}

/// Server to client. Older servers prefix event types with `haboard/`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    AuthOk,
    #[serde(alias = "haboard/task_created")]
    TaskCreated { task: Task },
    #[serde(alias = "haboard/task_updated")]
    TaskUpdated { task: Task },
    #[serde(alias = "haboard/task_deleted")]
    TaskDeleted { task_id: String },
    #[serde(alias = "haboard/pong")]
    Pong,
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_shapes() {
        let auth = serde_json::to_value(Outbound::Auth {
            access_token: "tok".to_string(),
        })
        .unwrap();
        assert_eq!(auth, json!({"type": "auth", "access_token": "tok"}));

        let subscribe = serde_json::to_value(Outbound::Subscribe {
            id: 1,
            device_id: None,
        })
        .unwrap();
        assert_eq!(subscribe, json!({"type": "subscribe", "id": 1}));

        let ping = serde_json::to_value(Outbound::Ping { id: 7 }).unwrap();
        assert_eq!(ping, json!({"type": "ping", "id": 7}));
    }

    #[test]
    fn test_inbound_dispatch_types() {
        let deleted: Inbound =
            serde_json::from_value(json!({"type": "task_deleted", "task_id": "a"})).unwrap();
        assert_eq!(deleted, Inbound::TaskDeleted { task_id: "a".to_string() });

        let legacy: Inbound =
            serde_json::from_value(json!({"type": "haboard/task_deleted", "task_id": "a"})).unwrap();
        assert_eq!(legacy, deleted);

        let unknown: Inbound =
            serde_json::from_value(json!({"type": "result", "id": 1, "success": true})).unwrap();
        assert_eq!(unknown, Inbound::Unknown);

        let pong: Inbound = serde_json::from_value(json!({"type": "pong", "id": 3})).unwrap();
        assert_eq!(pong, Inbound::Pong);
    }

    #[test]
    fn test_event_without_payload_is_rejected() {
        assert!(serde_json::from_value::<Inbound>(json!({"type": "task_updated"})).is_err());
        assert!(serde_json::from_str::<Inbound>("not json").is_err());
    }
}
