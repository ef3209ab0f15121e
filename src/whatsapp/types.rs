//! Backend-neutral event and message types.
//!
//! Adapters translate whatever their protocol library emits into these so the
//! dispatcher and supervisor can be exercised without a live socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifies a message within a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKey {
    /// Chat the message belongs to (user or group JID).
    pub remote_jid: String,
    /// Sent by the bot's own account.
    pub from_me: bool,
    pub id: String,
    /// Author inside a group chat.
    pub participant: Option<String>,
}

/// Reference to encrypted media hosted by WhatsApp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub mimetype: Option<String>,
    pub url: Option<String>,
    pub direct_path: Option<String>,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: Option<u64>,
}

/// The payload shapes the bot understands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    /// Plain conversational text.
    pub conversation: Option<String>,
    /// Text of an extended text message (links, replies, mentions).
    pub extended_text: Option<String>,
    pub media: Option<MediaRef>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            conversation: Some(text.into()),
            ..Default::default()
        }
    }
}

/// A message delivered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub key: MessageKey,
    pub push_name: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// `None` for stubs and protocol messages without user content.
    pub message: Option<MessageContent>,
}

impl InboundMessage {
    /// Conversation text, then extended text, then empty.
    pub fn text(&self) -> &str {
        self.message
            .as_ref()
            .and_then(|m| m.conversation.as_deref().or(m.extended_text.as_deref()))
            .unwrap_or("")
    }

    pub fn is_from_me(&self) -> bool {
        self.key.from_me
    }
}

/// Text to send, optionally as a reply to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub quoted: Option<InboundMessage>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quoted: None,
        }
    }

    pub fn quoting(mut self, inbound: &InboundMessage) -> Self {
        self.quoted = Some(inbound.clone());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why the backend closed the connection, keyed by WhatsApp status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    LoggedOut,
    Forbidden,
    /// 408: lost or timed out.
    ConnectionLost,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    UnavailableService,
    RestartRequired,
    Other(u16),
}

impl DisconnectReason {
    pub fn from_status_code(code: u16) -> Self {
        match code {
            401 => Self::LoggedOut,
            403 => Self::Forbidden,
            408 => Self::ConnectionLost,
            411 => Self::MultideviceMismatch,
            428 => Self::ConnectionClosed,
            440 => Self::ConnectionReplaced,
            500 => Self::BadSession,
            503 => Self::UnavailableService,
            515 => Self::RestartRequired,
            other => Self::Other(other),
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            Self::LoggedOut => 401,
            Self::Forbidden => 403,
            Self::ConnectionLost => 408,
            Self::MultideviceMismatch => 411,
            Self::ConnectionClosed => 428,
            Self::ConnectionReplaced => 440,
            Self::BadSession => 500,
            Self::UnavailableService => 503,
            Self::RestartRequired => 515,
            Self::Other(code) => code,
        }
    }

    /// The account unlinked this device; reconnecting cannot succeed.
    pub fn is_logged_out(self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoggedOut => "logged out",
            Self::Forbidden => "forbidden",
            Self::ConnectionLost => "connection lost",
            Self::MultideviceMismatch => "multidevice mismatch",
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionReplaced => "connection replaced",
            Self::BadSession => "bad session",
            Self::UnavailableService => "service unavailable",
            Self::RestartRequired => "restart required",
            Self::Other(_) => "unknown",
        };
        write!(f, "{} ({})", name, self.status_code())
    }
}

/// Details of the last disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: DisconnectReason,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUpdate {
    pub state: ConnectionState,
    pub last_disconnect: Option<Disconnect>,
}

impl ConnectionUpdate {
    pub fn connecting() -> Self {
        Self {
            state: ConnectionState::Connecting,
            last_disconnect: None,
        }
    }

    pub fn open() -> Self {
        Self {
            state: ConnectionState::Open,
            last_disconnect: None,
        }
    }

    pub fn closed(reason: Option<DisconnectReason>) -> Self {
        Self {
            state: ConnectionState::Closed,
            last_disconnect: reason.map(|reason| Disconnect {
                reason,
                message: None,
            }),
        }
    }

    pub fn reason(&self) -> Option<DisconnectReason> {
        self.last_disconnect.as_ref().map(|d| d.reason)
    }
}

/// A signal key write. `value: None` deletes the key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyUpdate {
    pub category: String,
    pub id: String,
    pub value: Option<Value>,
}

/// Changed session material to persist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialsUpdate {
    /// Shallow patch merged into `creds.json`.
    pub creds: Map<String, Value>,
    pub keys: Vec<KeyUpdate>,
}

impl CredentialsUpdate {
    pub fn creds(patch: Map<String, Value>) -> Self {
        Self {
            creds: patch,
            keys: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.creds.is_empty() && self.keys.is_empty()
    }
}

/// Everything a backend connection reports.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    CredentialsUpdate(CredentialsUpdate),
    Connection(ConnectionUpdate),
    MessagesUpsert(Vec<InboundMessage>),
    /// QR payload for linking without a pairing code.
    PairingQr(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(content: Option<MessageContent>) -> InboundMessage {
        InboundMessage {
            key: MessageKey {
                remote_jid: "628111@s.whatsapp.net".to_string(),
                from_me: false,
                id: "ABC".to_string(),
                participant: None,
            },
            push_name: None,
            timestamp: None,
            message: content,
        }
    }

    #[test]
    fn test_text_prefers_conversation() {
        let msg = inbound(Some(MessageContent {
            conversation: Some("plain".to_string()),
            extended_text: Some("extended".to_string()),
            media: None,
        }));
        assert_eq!(msg.text(), "plain");
    }

    #[test]
    fn test_text_falls_back_to_extended() {
        let msg = inbound(Some(MessageContent {
            conversation: None,
            extended_text: Some("extended".to_string()),
            media: None,
        }));
        assert_eq!(msg.text(), "extended");
    }

    #[test]
    fn test_text_defaults_to_empty() {
        assert_eq!(inbound(Some(MessageContent::default())).text(), "");
        assert_eq!(inbound(None).text(), "");
    }

    #[test]
    fn test_disconnect_reason_codes() {
        assert_eq!(DisconnectReason::from_status_code(401), DisconnectReason::LoggedOut);
        assert!(DisconnectReason::from_status_code(401).is_logged_out());
        assert_eq!(
            DisconnectReason::from_status_code(515),
            DisconnectReason::RestartRequired
        );
        assert_eq!(DisconnectReason::from_status_code(499), DisconnectReason::Other(499));
        assert_eq!(DisconnectReason::Other(499).status_code(), 499);
        assert!(!DisconnectReason::ConnectionReplaced.is_logged_out());
    }

    #[test]
    fn test_closed_update_carries_reason() {
        let update = ConnectionUpdate::closed(Some(DisconnectReason::ConnectionLost));
        assert_eq!(update.state, ConnectionState::Closed);
        assert_eq!(update.reason(), Some(DisconnectReason::ConnectionLost));
        assert_eq!(ConnectionUpdate::closed(None).reason(), None);
    }
}
