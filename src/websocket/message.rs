use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::notification::EventType;

/// Control frames sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        channel: String,
    },
    Unsubscribe {
        channel: String,
    },
    Authenticate {
        token: String,
    },
    Ping,
    GetLeaderboard {
        #[serde(default)]
        period: Option<String>,
        #[serde(default)]
        limit: Option<u32>,
    },
    GetPersonalStats {
        #[serde(default, deserialize_with = "optional_id")]
        moderator_id: Option<String>,
    },
    GetPeakHours {
        #[serde(default, deserialize_with = "optional_id")]
        moderator_id: Option<String>,
        #[serde(default)]
        top_n: Option<u32>,
    },
    GetActivity {
        #[serde(default)]
        days: Option<u32>,
    },
    GetRecentActions {
        #[serde(default, deserialize_with = "optional_id")]
        moderator_id: Option<String>,
        #[serde(default)]
        limit: Option<u32>,
    },
}

impl ClientMessage {
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::Subscribe { .. } => "subscribe",
            ClientMessage::Unsubscribe { .. } => "unsubscribe",
            ClientMessage::Authenticate { .. } => "authenticate",
            ClientMessage::Ping => "ping",
            ClientMessage::GetLeaderboard { .. } => "get_leaderboard",
            ClientMessage::GetPersonalStats { .. } => "get_personal_stats",
            ClientMessage::GetPeakHours { .. } => "get_peak_hours",
            ClientMessage::GetActivity { .. } => "get_activity",
            ClientMessage::GetRecentActions { .. } => "get_recent_actions",
        }
    }
}

/// Moderator IDs arrive as strings or as bare integers.
fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    }))
}

/// Frames sent from server to client: `{type, data, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ServerMessage {
    pub fn new(event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn connected(connection_id: Uuid, authenticated: bool, heartbeat_interval: u64) -> Self {
        Self::new(
            EventType::Connected,
            json!({
                "connection_id": connection_id.to_string(),
                "authenticated": authenticated,
                "heartbeat_interval": heartbeat_interval,
            }),
        )
    }

    /// Liveness beacon carrying the current live connection count.
    pub fn heartbeat(connections: usize) -> Self {
        Self::new(EventType::Heartbeat, json!({ "connections": connections }))
    }

    pub fn pong() -> Self {
        Self::new(EventType::Pong, json!({}))
    }

    pub fn subscribed(channel: &str) -> Self {
        Self::new(EventType::Subscribed, json!({ "channel": channel }))
    }

    pub fn unsubscribed(channel: &str) -> Self {
        Self::new(EventType::Unsubscribed, json!({ "channel": channel }))
    }

    pub fn authenticated(user_id: &str) -> Self {
        Self::new(EventType::Authenticated, json!({ "user_id": user_id }))
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            EventType::Error,
            json!({ "code": code.into(), "message": message.into() }),
        )
    }

    /// Error tied to one control operation; the connection stays usable.
    pub fn op_error(op: &str, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            EventType::Error,
            json!({ "op": op, "code": code.into(), "message": message.into() }),
        )
    }

    pub fn disconnected(reason: &str, reconnect_after: Option<u64>) -> Self {
        Self::new(
            EventType::Disconnected,
            json!({ "reason": reason, "reconnect_after": reconnect_after }),
        )
    }
}

/// Queue item for a connection's writer task.
///
/// Broadcasts serialize once and share the text across every recipient.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerMessage),
    Preserialized(Arc<str>),
}

impl OutboundMessage {
    pub fn preserialize(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        let text = serde_json::to_string(message)?;
        Ok(OutboundMessage::Preserialized(Arc::from(text)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            OutboundMessage::Raw(message) => serde_json::to_string(message),
            OutboundMessage::Preserialized(text) => Ok(text.to_string()),
        }
    }
}

impl From<ServerMessage> for OutboundMessage {
    fn from(message: ServerMessage) -> Self {
        OutboundMessage::Raw(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_frames() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"subscribe","channel":"cases"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                channel: "cases".to_string()
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
        assert_eq!(msg.action(), "ping");
    }

    #[test]
    fn test_query_defaults_and_numeric_ids() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"get_recent_actions"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::GetRecentActions {
                moderator_id: None,
                limit: None
            }
        );

        let msg: ClientMessage = serde_json::from_str(
            r#"{"action":"get_peak_hours","moderator_id":123456789012345678,"top_n":3}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::GetPeakHours {
                moderator_id: Some("123456789012345678".to_string()),
                top_n: Some(3)
            }
        );
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"explode"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"channel":"cases"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_server_frame_shape() {
        let msg = ServerMessage::subscribed("cases");
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "subscribed");
        assert_eq!(value["data"]["channel"], "cases");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_preserialized_matches_raw() {
        let msg = ServerMessage::op_error("get_activity", "QUERY_FAILED", "boom");
        let raw = OutboundMessage::Raw(msg.clone()).to_json().unwrap();
        let pre = OutboundMessage::preserialize(&msg).unwrap().to_json().unwrap();
        assert_eq!(raw, pre);
    }
}
