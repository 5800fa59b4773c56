#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub router: Router,
    pub connection: ConnectionState,
    pub busy: BusyState,
    pub chat_list: Vec<ChatSummary>,
    pub current_chat: Option<ChatViewState>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            router: Router {
                default_screen: Screen::ServerConnect,
                screen_stack: vec![],
            },
            connection: ConnectionState::NotConfigured,
            busy: BusyState::idle(),
            chat_list: vec![],
            current_chat: None,
            toast: None,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct Router {
    pub default_screen: Screen,
    pub screen_stack: Vec<Screen>,
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq)]
pub enum Screen {
    ServerConnect,
    ChatList,
    Chat { peer_key: String },
    NewChat,
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    NotConfigured,
    Configured {
        gateway_host: String,
        account_number: String,
    },
}

/// "In flight" flags for long-ish operations that the UI should reflect.
///
/// UX-relevant async operation state lives here rather than in native-side
/// heuristics (e.g., re-enabling the send button when a toast happens to show).
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub connecting: bool,
    pub loading_chats: bool,
    pub sending: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            connecting: false,
            loading_chats: false,
            sending: false,
        }
    }
}

/// One row of the conversation list.
#[derive(uniffi::Record, Clone, Debug)]
pub struct ChatSummary {
    pub peer_key: String,
    pub name: String,
    pub number: Option<String>,
    pub uuid: Option<String>,
    pub snippet: String,
    pub last_ts: i64,
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct ChatViewState {
    pub peer_key: String,
    pub peer_name: String,
    pub number: Option<String>,
    pub uuid: Option<String>,
    pub messages: Vec<MessageRecord>,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
}

/// Delivery state of a message, ordered. Outgoing messages only ever move
/// forward through this ladder; incoming messages are created `Delivered`.
#[derive(
    uniffi::Enum,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Wire level as used by the bridge (`0..=3`). Out-of-range input clamps.
    pub fn from_level(level: i64) -> Self {
        match level {
            i64::MIN..=0 => Self::Pending,
            1 => Self::Sent,
            2 => Self::Delivered,
            _ => Self::Read,
        }
    }
}

/// One chat message as rendered by the UI and persisted in the history blob.
///
/// Exactly one of the two kinds is populated: `text` for `Text`, the
/// attachment fields for `Image`. `server_ts` is set at most once, when a
/// server-confirmed timestamp is learned (sync echo or bridge), and is the
/// correlation key for receipt upgrades.
#[derive(uniffi::Record, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MessageRecord {
    pub direction: Direction,
    pub kind: MessageKind,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub status: DeliveryStatus,
    pub local_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ts: Option<i64>,
}

impl MessageRecord {
    pub fn text(direction: Direction, text: String, status: DeliveryStatus, local_ts: i64) -> Self {
        Self {
            direction,
            kind: MessageKind::Text,
            text,
            attachment_id: None,
            mime_type: None,
            status,
            local_ts,
            server_ts: None,
        }
    }

    pub fn image(
        direction: Direction,
        attachment_id: String,
        mime_type: String,
        status: DeliveryStatus,
        local_ts: i64,
    ) -> Self {
        Self {
            direction,
            kind: MessageKind::Image,
            text: String::new(),
            attachment_id: Some(attachment_id),
            mime_type: Some(mime_type),
            status,
            local_ts,
            server_ts: None,
        }
    }

    pub fn is_outgoing(&self) -> bool {
        self.direction == Direction::Outgoing
    }
}

pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_status_is_ordered() {
        assert!(DeliveryStatus::Pending < DeliveryStatus::Sent);
        assert!(DeliveryStatus::Sent < DeliveryStatus::Delivered);
        assert!(DeliveryStatus::Delivered < DeliveryStatus::Read);
    }

    #[test]
    fn delivery_status_from_level_clamps() {
        assert_eq!(DeliveryStatus::from_level(-7), DeliveryStatus::Pending);
        assert_eq!(DeliveryStatus::from_level(0), DeliveryStatus::Pending);
        assert_eq!(DeliveryStatus::from_level(1), DeliveryStatus::Sent);
        assert_eq!(DeliveryStatus::from_level(2), DeliveryStatus::Delivered);
        assert_eq!(DeliveryStatus::from_level(3), DeliveryStatus::Read);
        assert_eq!(DeliveryStatus::from_level(99), DeliveryStatus::Read);
    }

    #[test]
    fn message_record_round_trips_through_json() {
        let rec = MessageRecord::image(
            Direction::Incoming,
            "att-1".into(),
            "image/jpeg".into(),
            DeliveryStatus::Delivered,
            1_700_000_000_000,
        );
        let json = serde_json::to_string(&rec).unwrap();
        let back: MessageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, MessageKind::Image);
        assert_eq!(back.attachment_id.as_deref(), Some("att-1"));
        assert!(back.text.is_empty());
        assert_eq!(back.server_ts, None);
    }
}
