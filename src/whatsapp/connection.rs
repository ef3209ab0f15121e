//! Backend seam.
//!
//! A [`Connector`] opens [`Session`]s; a session owns its [`Connection`] handle
//! and the receiving end of the event channel the backend writes into.
//!
//! The dispatch loop consumes events in channel order. A backend that emits
//! from several tasks only gets wire order if it serialises its sends.

use super::credentials::Credentials;
use super::media::MediaKind;
use super::types::{MediaRef, OutboundMessage, SessionEvent};
use super::version::ProtocolVersion;
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Decrypted media chunks.
pub type MediaStream = BoxStream<'static, Result<Vec<u8>>>;

/// Live handle to a backend connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Whether the backend's own session state says this device is linked.
    fn is_registered(&self) -> bool;

    /// Ask the backend for a pairing code for `phone_number` (digits only).
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String>;

    /// Send a text message. Returns the id assigned to the sent message.
    async fn send_message(&self, to: &str, message: OutboundMessage) -> Result<String>;

    /// Stream the decrypted content of a media message.
    async fn download(&self, media: &MediaRef, kind: MediaKind) -> Result<MediaStream>;

    /// Tear the connection down. Must be safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Everything needed to open a connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub version: ProtocolVersion,
    /// (client, browser, version) announced to WhatsApp.
    pub browser: [String; 3],
    pub credentials: Credentials,
    /// Directory the backend may keep its own state in.
    pub session_dir: PathBuf,
}

/// Opens connections to a messaging backend.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: ConnectOptions) -> Result<Session>;
}

/// An open connection plus its event stream.
pub struct Session {
    pub connection: Arc<dyn Connection>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Session {
    pub fn new(
        connection: Arc<dyn Connection>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        Self { connection, events }
    }

    /// Create the channel a backend feeds events into. Sending never waits,
    /// so a callback can forward an event without yielding.
    pub fn channel() -> (
        mpsc::UnboundedSender<SessionEvent>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    /// Download and buffer a media message through this session's connection.
    pub async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        super::media::download_media(self.connection.as_ref(), media).await
    }

    /// Release the connection handle.
    pub async fn close(self) -> Result<()> {
        self.connection.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whatsapp::types::ConnectionUpdate;

    #[tokio::test]
    async fn test_channel_accepts_bursts_without_a_reader() {
        let (tx, mut rx) = Session::channel();
        for i in 0..1_000 {
            tx.send(SessionEvent::PairingQr(i.to_string())).unwrap();
        }
        tx.send(SessionEvent::Connection(ConnectionUpdate::open()))
            .unwrap();
        drop(tx);

        let mut seen = 0;
        while let Some(event) = rx.recv().await {
            match event {
                SessionEvent::PairingQr(code) => {
                    assert_eq!(code, seen.to_string());
                    seen += 1;
                }
                SessionEvent::Connection(update) => assert_eq!(update, ConnectionUpdate::open()),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(seen, 1_000);
    }
}
