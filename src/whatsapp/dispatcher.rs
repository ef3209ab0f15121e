//! Event dispatcher
//!
//! Reacts to connection lifecycle changes and inbound message batches. Holds
//! no state between events.

use super::connection::Connection;
use super::jid::decode_jid;
use super::types::{ConnectionState, ConnectionUpdate, DisconnectReason, InboundMessage, OutboundMessage};
use crate::error::Result;

/// Literal prefix of the echo command, trailing space included.
pub const ECHO_PREFIX: &str = "!echo ";

/// A recognized command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// `hi`, any case.
    Greet,
    /// `!echo <rest>`; carries everything after the prefix verbatim.
    Echo(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(text: &'a str) -> Option<Self> {
        if text.to_lowercase() == "hi" {
            Some(Self::Greet)
        } else {
            text.strip_prefix(ECHO_PREFIX).map(Self::Echo)
        }
    }
}

/// What the supervisor should do after a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Nothing to do.
    None,
    /// The connection is usable.
    Ready,
    /// Tear down and start over.
    Reconnect(Option<DisconnectReason>),
    /// The account unlinked this device. Do not retry.
    LoggedOut,
}

/// Routes events to the fixed bot replies.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    greeting: String,
}

impl Dispatcher {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            greeting: greeting.into(),
        }
    }

    pub fn on_connection_update(&self, update: &ConnectionUpdate) -> LifecycleAction {
        match update.state {
            ConnectionState::Closed => {
                let reason = update.reason();
                if reason.is_some_and(DisconnectReason::is_logged_out) {
                    tracing::error!("WhatsApp: disconnected, session logged out");
                    LifecycleAction::LoggedOut
                } else {
                    match reason {
                        Some(reason) => {
                            tracing::warn!("WhatsApp: disconnected ({}), reconnecting", reason)
                        }
                        None => tracing::warn!("WhatsApp: disconnected, reconnecting"),
                    }
                    LifecycleAction::Reconnect(reason)
                }
            }
            ConnectionState::Open => {
                tracing::info!("WhatsApp: bot online, ready to receive messages");
                LifecycleAction::Ready
            }
            ConnectionState::Connecting => LifecycleAction::None,
        }
    }

    /// Handle a `messages.upsert` batch. Only the first message is considered.
    ///
    /// Returns the id of the sent reply, if any. Send failures are returned to
    /// the caller untouched.
    pub async fn on_messages(
        &self,
        connection: &dyn Connection,
        messages: &[InboundMessage],
    ) -> Result<Option<String>> {
        let Some(msg) = messages.first() else {
            return Ok(None);
        };
        if msg.message.is_none() || msg.is_from_me() {
            return Ok(None);
        }

        let sender = msg.key.remote_jid.as_str();
        let text = msg.text();

        let reply = match Command::parse(text) {
            Some(Command::Greet) => OutboundMessage::text(self.greeting.as_str()).quoting(msg),
            Some(Command::Echo(rest)) => OutboundMessage::text(rest),
            None => return Ok(None),
        };

        tracing::info!(
            "WhatsApp: {} from {} ({})",
            if reply.quoted.is_some() { "greeting" } else { "echo" },
            decode_jid(sender),
            msg.push_name.as_deref().unwrap_or("unknown"),
        );

        let id = connection.send_message(sender, reply).await?;
        Ok(Some(id))
    }
}
