//! Event vocabulary shared by the control protocol and the domain push path.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::websocket::ServerMessage;

/// Well-known dashboard channels
pub mod channels {
    pub const CASES: &str = "cases";
    pub const TICKETS: &str = "tickets";
    pub const APPEALS: &str = "appeals";
    pub const MODERATION: &str = "moderation";
    pub const STATS: &str = "stats";

    pub const ALL: [&str; 5] = [CASES, TICKETS, APPEALS, MODERATION, STATS];
}

/// `type` discriminator of every server frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Connection lifecycle
    Connected,
    Disconnected,
    Heartbeat,
    Pong,
    Subscribed,
    Unsubscribed,
    Authenticated,
    Error,

    // Cases
    CaseCreated,
    CaseUpdated,
    CaseResolved,

    // Tickets
    TicketCreated,
    TicketClaimed,
    TicketClosed,
    TicketMessage,

    // Appeals
    AppealSubmitted,
    AppealResolved,

    // Moderation
    ModAction,
    UserMuted,
    UserUnmuted,
    UserBanned,
    UserUnbanned,

    #[serde(rename = "stats.updated")]
    StatsUpdated,

    // Query replies
    Leaderboard,
    PersonalStats,
    PeakHours,
    Activity,
    RecentActions,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Connected => "connected",
            EventType::Disconnected => "disconnected",
            EventType::Heartbeat => "heartbeat",
            EventType::Pong => "pong",
            EventType::Subscribed => "subscribed",
            EventType::Unsubscribed => "unsubscribed",
            EventType::Authenticated => "authenticated",
            EventType::Error => "error",
            EventType::CaseCreated => "case_created",
            EventType::CaseUpdated => "case_updated",
            EventType::CaseResolved => "case_resolved",
            EventType::TicketCreated => "ticket_created",
            EventType::TicketClaimed => "ticket_claimed",
            EventType::TicketClosed => "ticket_closed",
            EventType::TicketMessage => "ticket_message",
            EventType::AppealSubmitted => "appeal_submitted",
            EventType::AppealResolved => "appeal_resolved",
            EventType::ModAction => "mod_action",
            EventType::UserMuted => "user_muted",
            EventType::UserUnmuted => "user_unmuted",
            EventType::UserBanned => "user_banned",
            EventType::UserUnbanned => "user_unbanned",
            EventType::StatsUpdated => "stats.updated",
            EventType::Leaderboard => "leaderboard",
            EventType::PersonalStats => "personal_stats",
            EventType::PeakHours => "peak_hours",
            EventType::Activity => "activity",
            EventType::RecentActions => "recent_actions",
        }
    }

    /// Channel a domain event is pushed to when the publisher names none.
    /// `None` for protocol events, which are never published.
    pub fn default_channel(&self) -> Option<&'static str> {
        match self {
            EventType::CaseCreated | EventType::CaseUpdated | EventType::CaseResolved => {
                Some(channels::CASES)
            }
            EventType::TicketCreated
            | EventType::TicketClaimed
            | EventType::TicketClosed
            | EventType::TicketMessage => Some(channels::TICKETS),
            EventType::AppealSubmitted | EventType::AppealResolved => Some(channels::APPEALS),
            EventType::ModAction
            | EventType::UserMuted
            | EventType::UserUnmuted
            | EventType::UserBanned
            | EventType::UserUnbanned => Some(channels::MODERATION),
            EventType::StatsUpdated => Some(channels::STATS),
            _ => None,
        }
    }

    pub fn is_domain_event(&self) -> bool {
        self.default_channel().is_some()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel names are 1-64 chars of alphanumerics, `-`, `_` or `.`
pub fn is_valid_channel_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }

    name.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// An event raised elsewhere in the dashboard, to be fanned out to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Overrides the event type's default channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl DomainEvent {
    pub fn new(event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            event_type,
            channel: None,
            data,
        }
    }

    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn case_created(data: serde_json::Value) -> Self {
        Self::new(EventType::CaseCreated, data)
    }

    pub fn case_updated(data: serde_json::Value) -> Self {
        Self::new(EventType::CaseUpdated, data)
    }

    pub fn case_resolved(data: serde_json::Value) -> Self {
        Self::new(EventType::CaseResolved, data)
    }

    pub fn ticket_created(data: serde_json::Value) -> Self {
        Self::new(EventType::TicketCreated, data)
    }

    pub fn ticket_claimed(data: serde_json::Value) -> Self {
        Self::new(EventType::TicketClaimed, data)
    }

    pub fn ticket_closed(data: serde_json::Value) -> Self {
        Self::new(EventType::TicketClosed, data)
    }

    pub fn appeal_submitted(data: serde_json::Value) -> Self {
        Self::new(EventType::AppealSubmitted, data)
    }

    /// The outcome is folded into the payload as `approved`.
    pub fn appeal_resolved(mut data: serde_json::Value, approved: bool) -> Self {
        match data {
            serde_json::Value::Object(ref mut map) => {
                map.insert("approved".to_string(), serde_json::Value::Bool(approved));
            }
            _ => {
                data = serde_json::json!({ "approved": approved, "appeal": data });
            }
        }
        Self::new(EventType::AppealResolved, data)
    }

    pub fn mod_action(data: serde_json::Value) -> Self {
        Self::new(EventType::ModAction, data)
    }

    pub fn stats_updated(data: serde_json::Value) -> Self {
        let data = if data.is_null() {
            serde_json::json!({})
        } else {
            data
        };
        Self::new(EventType::StatsUpdated, data)
    }

    /// Explicit channel if set, otherwise the event type's default.
    pub fn target_channel(&self) -> Option<&str> {
        self.channel
            .as_deref()
            .or_else(|| self.event_type.default_channel())
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.event_type.is_domain_event() {
            return Err(format!(
                "'{}' is a protocol event and cannot be published",
                self.event_type
            ));
        }

        if let Some(ref channel) = self.channel {
            if !is_valid_channel_name(channel) {
                return Err(format!("Invalid channel name: {}", channel));
            }
        }

        Ok(())
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::new(self.event_type, self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_channel_names() {
        assert!(is_valid_channel_name("cases"));
        assert!(is_valid_channel_name("mod-alerts"));
        assert!(is_valid_channel_name("guild_123"));
        assert!(is_valid_channel_name("stats.daily"));
    }

    #[test]
    fn test_invalid_channel_names() {
        assert!(!is_valid_channel_name(""));
        assert!(!is_valid_channel_name("two words"));
        assert!(!is_valid_channel_name("cases/open"));
        assert!(!is_valid_channel_name(&"a".repeat(65)));
    }

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(
            serde_json::to_value(EventType::CaseCreated).unwrap(),
            json!("case_created")
        );
        assert_eq!(
            serde_json::to_value(EventType::StatsUpdated).unwrap(),
            json!("stats.updated")
        );
        let parsed: EventType = serde_json::from_value(json!("ticket_claimed")).unwrap();
        assert_eq!(parsed, EventType::TicketClaimed);
        assert_eq!(parsed.as_str(), "ticket_claimed");
    }

    #[test]
    fn test_default_channels() {
        assert_eq!(DomainEvent::case_created(json!({})).target_channel(), Some("cases"));
        assert_eq!(DomainEvent::ticket_closed(json!({})).target_channel(), Some("tickets"));
        assert_eq!(DomainEvent::mod_action(json!({})).target_channel(), Some("moderation"));
        assert_eq!(DomainEvent::stats_updated(json!(null)).target_channel(), Some("stats"));

        let routed = DomainEvent::case_created(json!({})).on_channel("escalations");
        assert_eq!(routed.target_channel(), Some("escalations"));
    }

    #[test]
    fn test_appeal_resolved_carries_outcome() {
        let event = DomainEvent::appeal_resolved(json!({"appeal_id": 9}), false);
        assert_eq!(event.data["approved"], json!(false));
        assert_eq!(event.data["appeal_id"], json!(9));
    }

    #[test]
    fn test_protocol_events_cannot_be_published() {
        assert!(DomainEvent::new(EventType::Connected, json!({})).validate().is_err());
        assert!(DomainEvent::case_created(json!({})).on_channel("bad channel").validate().is_err());
        assert!(DomainEvent::case_created(json!({})).validate().is_ok());
    }
}
