//! whatsapp-rust backend
//!
//! Runs a WhatsApp Web client and forwards its events into a [`Session`]
//! channel. Key material and the link state live in `session.db` inside the
//! session directory; `creds.json` only mirrors whether the device is linked
//! and to whom.
//!
//! `whatsapp-rust` hands every event to its own task before the callback
//! runs, so events reach the channel in task completion order. Forwarding
//! never awaits, which keeps that window as small as the library allows.

use super::connection::{ConnectOptions, Connection, Connector, MediaStream, Session};
use super::media::MediaKind;
use super::types::{
    ConnectionUpdate, CredentialsUpdate, DisconnectReason, InboundMessage, MediaRef,
    MessageContent, MessageKey, OutboundMessage, SessionEvent,
};
use crate::error::{BotError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use wacore::types::events::Event;
use wacore_binary::jid::Jid;
use waproto::whatsapp as wa;
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust::pair_code::{PairCodeOptions, PlatformId};
use whatsapp_rust::store::SqliteStore;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

/// How long a pairing-code request waits for the socket to come up.
const PAIRING_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens connections through `whatsapp-rust`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaConnector;

impl WaConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WaConnector {
    async fn connect(&self, options: ConnectOptions) -> Result<Session> {
        let db_path = options.session_dir.join("session.db");
        let backend = Arc::new(
            SqliteStore::new(db_path.to_string_lossy().as_ref())
                .await
                .map_err(|e| BotError::Store(format!("open {}: {}", db_path.display(), e)))?,
        );

        tracing::info!(
            "WhatsApp: connecting as {} {} (web v{})",
            options.browser[0],
            options.browser[1],
            options.version
        );

        let (tx, rx) = Session::channel();

        let events = tx.clone();
        let mut bot = Bot::builder()
            .with_backend(backend)
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .with_os_info(Some(options.browser[0].clone()), None)
            .on_event(move |event, _client| {
                forward(&events, event);
                std::future::ready(())
            })
            .build()
            .await
            .map_err(|e| BotError::Backend(anyhow::anyhow!("failed to build client: {e}")))?;

        let client = bot.client();

        // The device store is authoritative; creds.json may be stale or missing.
        let registered = client.get_pn().await.is_some();
        if registered != options.credentials.registered {
            tracing::info!(
                "WhatsApp: device store reports linked={}, creds.json says {}",
                registered,
                options.credentials.registered
            );
        }

        if tx
            .send(SessionEvent::Connection(ConnectionUpdate::connecting()))
            .is_err()
        {
            tracing::debug!("WhatsApp: session dropped before connecting");
        }

        let handle = bot
            .run()
            .await
            .map_err(|e| BotError::Backend(anyhow::anyhow!("failed to start client: {e}")))?;

        let connection = WaConnection {
            client,
            registered,
            browser: options.browser,
            run_handle: Mutex::new(Some(handle)),
        };
        Ok(Session::new(Arc::new(connection), rx))
    }
}

/// Translate and push one library event. Stops at the first failed send.
fn forward(events: &mpsc::UnboundedSender<SessionEvent>, event: Event) {
    for translated in translate(event) {
        if events.send(translated).is_err() {
            tracing::debug!("WhatsApp: session dropped, discarding event");
            break;
        }
    }
}

/// Map a library event onto zero or more session events.
fn translate(event: Event) -> Vec<SessionEvent> {
    match event {
        Event::PairingQrCode { code, .. } => vec![SessionEvent::PairingQr(code)],
        Event::PairSuccess(success) => {
            tracing::info!("WhatsApp: pairing successful");
            let patch = json!({
                "registered": true,
                "me": { "id": success.id.to_string() },
                "platform": success.platform,
            });
            match patch {
                serde_json::Value::Object(map) => {
                    vec![SessionEvent::CredentialsUpdate(CredentialsUpdate::creds(map))]
                }
                _ => Vec::new(),
            }
        }
        Event::Connected(_) => vec![SessionEvent::Connection(ConnectionUpdate::open())],
        Event::LoggedOut(_) => vec![SessionEvent::Connection(ConnectionUpdate::closed(Some(
            DisconnectReason::LoggedOut,
        )))],
        Event::Disconnected(_) => vec![SessionEvent::Connection(ConnectionUpdate::closed(
            Some(DisconnectReason::ConnectionLost),
        ))],
        Event::Message(msg, info) => {
            let inbound = InboundMessage {
                key: MessageKey {
                    remote_jid: info.source.chat.to_string(),
                    from_me: info.source.is_from_me,
                    id: info.id.clone(),
                    participant: Some(info.source.sender.to_string()),
                },
                push_name: Some(info.push_name.clone()).filter(|n| !n.is_empty()),
                timestamp: None,
                message: Some(content_of(&msg)),
            };
            vec![SessionEvent::MessagesUpsert(vec![inbound])]
        }
        _ => Vec::new(),
    }
}

fn content_of(msg: &wa::Message) -> MessageContent {
    let media = if let Some(ref m) = msg.image_message {
        Some(media_ref(
            &m.mimetype, &m.url, &m.direct_path, &m.media_key, &m.file_sha256,
            &m.file_enc_sha256, m.file_length,
        ))
    } else if let Some(ref m) = msg.video_message {
        Some(media_ref(
            &m.mimetype, &m.url, &m.direct_path, &m.media_key, &m.file_sha256,
            &m.file_enc_sha256, m.file_length,
        ))
    } else if let Some(ref m) = msg.audio_message {
        Some(media_ref(
            &m.mimetype, &m.url, &m.direct_path, &m.media_key, &m.file_sha256,
            &m.file_enc_sha256, m.file_length,
        ))
    } else if let Some(ref m) = msg.document_message {
        Some(media_ref(
            &m.mimetype, &m.url, &m.direct_path, &m.media_key, &m.file_sha256,
            &m.file_enc_sha256, m.file_length,
        ))
    } else {
        None
    };

    MessageContent {
        conversation: msg.conversation.clone(),
        extended_text: msg
            .extended_text_message
            .as_ref()
            .and_then(|e| e.text.clone()),
        media,
    }
}

#[allow(clippy::too_many_arguments)]
fn media_ref(
    mimetype: &Option<String>,
    url: &Option<String>,
    direct_path: &Option<String>,
    media_key: &Option<Vec<u8>>,
    file_sha256: &Option<Vec<u8>>,
    file_enc_sha256: &Option<Vec<u8>>,
    file_length: Option<u64>,
) -> MediaRef {
    MediaRef {
        mimetype: mimetype.clone(),
        url: url.clone(),
        direct_path: direct_path.clone(),
        media_key: media_key.clone().unwrap_or_default(),
        file_sha256: file_sha256.clone().unwrap_or_default(),
        file_enc_sha256: file_enc_sha256.clone().unwrap_or_default(),
        file_length,
    }
}

/// Handle to a running `whatsapp-rust` client.
struct WaConnection {
    client: Arc<Client>,
    /// Link state read from the device store when the client was built.
    registered: bool,
    browser: [String; 3],
    run_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Companion platform for a browser name; unknown names are "other web client".
fn platform_id(browser: &str) -> PlatformId {
    match browser.trim().to_ascii_lowercase().as_str() {
        "chrome" | "chromium" => PlatformId::Chrome,
        "firefox" => PlatformId::Firefox,
        "safari" => PlatformId::Safari,
        "edge" => PlatformId::Edge,
        "opera" => PlatformId::Opera,
        "electron" | "desktop" => PlatformId::Electron,
        "ie" | "internet explorer" => PlatformId::InternetExplorer,
        _ => PlatformId::OtherWebClient,
    }
}

/// Pairing options announcing `browser` as `(client, browser, version)`,
/// shown on the phone as e.g. "Chrome (Amelia)".
fn pair_code_options(phone_number: &str, browser: &[String; 3]) -> PairCodeOptions {
    PairCodeOptions {
        phone_number: phone_number.to_string(),
        platform_id: platform_id(&browser[1]),
        platform_display: format!("{} ({})", browser[1], browser[0]),
        ..Default::default()
    }
}

fn parse_jid(to: &str) -> Result<Jid> {
    to.parse::<Jid>().map_err(|e| BotError::Send {
        to: to.to_string(),
        reason: format!("invalid JID: {e}"),
    })
}

fn to_wa_message(message: OutboundMessage) -> wa::Message {
    let Some(quoted) = message.quoted else {
        return wa::Message {
            conversation: Some(message.text),
            ..Default::default()
        };
    };

    let participant = quoted
        .key
        .participant
        .clone()
        .unwrap_or_else(|| quoted.key.remote_jid.clone());
    wa::Message {
        extended_text_message: Some(Box::new(wa::message::ExtendedTextMessage {
            text: Some(message.text),
            context_info: Some(Box::new(wa::ContextInfo {
                stanza_id: Some(quoted.key.id.clone()),
                participant: Some(participant),
                quoted_message: Some(Box::new(wa::Message {
                    conversation: Some(quoted.text().to_string()),
                    ..Default::default()
                })),
                ..Default::default()
            })),
            ..Default::default()
        })),
        ..Default::default()
    }
}

#[async_trait]
impl Connection for WaConnection {
    fn is_registered(&self) -> bool {
        self.registered
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String> {
        self.client
            .wait_for_socket(PAIRING_READY_TIMEOUT)
            .await
            .map_err(|e| BotError::Backend(e.context("socket not ready for pairing")))?;

        self.client
            .pair_with_code(pair_code_options(phone_number, &self.browser))
            .await
            .map_err(|e| BotError::Backend(anyhow::anyhow!("pairing code request failed: {e}")))
    }

    async fn send_message(&self, to: &str, message: OutboundMessage) -> Result<String> {
        let jid = parse_jid(to)?;
        self.client
            .send_message(jid, to_wa_message(message))
            .await
            .map_err(|e| BotError::Send {
                to: to.to_string(),
                reason: e.to_string(),
            })
    }

    async fn download(&self, media: &MediaRef, kind: MediaKind) -> Result<MediaStream> {
        let bytes = match kind {
            MediaKind::Image => {
                let msg = wa::message::ImageMessage {
                    url: media.url.clone(),
                    direct_path: media.direct_path.clone(),
                    media_key: Some(media.media_key.clone()),
                    file_sha256: Some(media.file_sha256.clone()),
                    file_enc_sha256: Some(media.file_enc_sha256.clone()),
                    file_length: media.file_length,
                    mimetype: media.mimetype.clone(),
                    ..Default::default()
                };
                self.client.download(&msg).await
            }
            MediaKind::Video => {
                let msg = wa::message::VideoMessage {
                    url: media.url.clone(),
                    direct_path: media.direct_path.clone(),
                    media_key: Some(media.media_key.clone()),
                    file_sha256: Some(media.file_sha256.clone()),
                    file_enc_sha256: Some(media.file_enc_sha256.clone()),
                    file_length: media.file_length,
                    mimetype: media.mimetype.clone(),
                    ..Default::default()
                };
                self.client.download(&msg).await
            }
            MediaKind::Audio => {
                let msg = wa::message::AudioMessage {
                    url: media.url.clone(),
                    direct_path: media.direct_path.clone(),
                    media_key: Some(media.media_key.clone()),
                    file_sha256: Some(media.file_sha256.clone()),
                    file_enc_sha256: Some(media.file_enc_sha256.clone()),
                    file_length: media.file_length,
                    mimetype: media.mimetype.clone(),
                    ..Default::default()
                };
                self.client.download(&msg).await
            }
            MediaKind::Document => {
                let msg = wa::message::DocumentMessage {
                    url: media.url.clone(),
                    direct_path: media.direct_path.clone(),
                    media_key: Some(media.media_key.clone()),
                    file_sha256: Some(media.file_sha256.clone()),
                    file_enc_sha256: Some(media.file_enc_sha256.clone()),
                    file_length: media.file_length,
                    mimetype: media.mimetype.clone(),
                    ..Default::default()
                };
                self.client.download(&msg).await
            }
        }
        .map_err(|e| BotError::Backend(anyhow::anyhow!("{} download failed: {e}", kind)))?;

        Ok(Box::pin(futures::stream::once(async move { Ok(bytes) })))
    }

    async fn close(&self) -> Result<()> {
        let handle = match self.run_handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            self.client.disconnect().await;
            handle.abort();
            tracing::debug!("WhatsApp: client stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wacore::types::events::{ConnectFailureReason, Connected, Disconnected, LoggedOut};
    use wacore::types::message::{MessageInfo, MessageSource};

    fn info(chat: &str, from_me: bool) -> MessageInfo {
        let chat: Jid = chat.parse().unwrap();
        MessageInfo {
            source: MessageSource {
                chat: chat.clone(),
                sender: chat,
                is_from_me: from_me,
                ..Default::default()
            },
            id: "3EB0C431C26A1916B8A1".to_string(),
            push_name: "Tester".to_string(),
            ..Default::default()
        }
    }

    fn upserted(events: Vec<SessionEvent>) -> InboundMessage {
        match events.as_slice() {
            [SessionEvent::MessagesUpsert(messages)] if messages.len() == 1 => messages[0].clone(),
            other => panic!("expected one upserted message, got {other:?}"),
        }
    }

    fn close_code(events: Vec<SessionEvent>) -> u16 {
        match events.as_slice() {
            [SessionEvent::Connection(update)] => update.reason().unwrap().status_code(),
            other => panic!("expected one connection update, got {other:?}"),
        }
    }

    #[test]
    fn test_conversation_message() {
        let msg = wa::Message {
            conversation: Some("hi".to_string()),
            ..Default::default()
        };
        let inbound = upserted(translate(Event::Message(
            Box::new(msg),
            info("628111@s.whatsapp.net", false),
        )));

        assert_eq!(inbound.key.remote_jid, "628111@s.whatsapp.net");
        assert_eq!(inbound.key.id, "3EB0C431C26A1916B8A1");
        assert!(!inbound.key.from_me);
        assert_eq!(inbound.push_name.as_deref(), Some("Tester"));
        assert_eq!(inbound.text(), "hi");
    }

    #[test]
    fn test_extended_text_message() {
        let msg = wa::Message {
            extended_text_message: Some(Box::new(wa::message::ExtendedTextMessage {
                text: Some("!echo ping".to_string()),
                ..Default::default()
            })),
            ..Default::default()
        };
        let inbound = upserted(translate(Event::Message(
            Box::new(msg),
            info("628111@s.whatsapp.net", true),
        )));

        assert!(inbound.key.from_me);
        let content = inbound.message.as_ref().unwrap();
        assert_eq!(content.conversation, None);
        assert_eq!(content.extended_text.as_deref(), Some("!echo ping"));
        assert_eq!(inbound.text(), "!echo ping");
    }

    #[test]
    fn test_media_message_keeps_download_fields() {
        let msg = wa::Message {
            image_message: Some(Box::new(wa::message::ImageMessage {
                mimetype: Some("image/jpeg".to_string()),
                direct_path: Some("/v/t62/abc".to_string()),
                media_key: Some(vec![1; 32]),
                file_length: Some(2048),
                ..Default::default()
            })),
            ..Default::default()
        };
        let content = content_of(&msg);
        let media = content.media.unwrap();

        assert_eq!(MediaKind::from_mime(media.mimetype.as_deref()), MediaKind::Image);
        assert_eq!(media.direct_path.as_deref(), Some("/v/t62/abc"));
        assert_eq!(media.media_key, vec![1; 32]);
        assert!(media.file_sha256.is_empty());
        assert_eq!(media.file_length, Some(2048));
        assert_eq!(content.conversation, None);
    }

    #[test]
    fn test_lifecycle_events() {
        assert_eq!(
            close_code(translate(Event::LoggedOut(LoggedOut {
                on_connect: false,
                reason: ConnectFailureReason::LoggedOut,
            }))),
            401
        );
        assert_eq!(close_code(translate(Event::Disconnected(Disconnected))), 408);

        match translate(Event::Connected(Connected)).as_slice() {
            [SessionEvent::Connection(update)] => assert_eq!(*update, ConnectionUpdate::open()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_qr_code_event() {
        let events = translate(Event::PairingQrCode {
            code: "2@abc".to_string(),
            timeout: Duration::from_secs(60),
        });
        assert!(matches!(events.as_slice(), [SessionEvent::PairingQr(code)] if code == "2@abc"));
    }

    #[test]
    fn test_plain_reply() {
        let msg = to_wa_message(OutboundMessage::text("ping"));
        assert_eq!(msg.conversation.as_deref(), Some("ping"));
        assert!(msg.extended_text_message.is_none());
    }

    #[test]
    fn test_quoted_reply_references_inbound() {
        let mut greeted = InboundMessage {
            key: MessageKey {
                remote_jid: "120363001@g.us".to_string(),
                from_me: false,
                id: "ABC123".to_string(),
                participant: Some("628111@s.whatsapp.net".to_string()),
            },
            push_name: None,
            timestamp: None,
            message: Some(MessageContent::text("hi")),
        };

        let msg = to_wa_message(OutboundMessage::text("Hello!").quoting(&greeted));
        let ext = msg.extended_text_message.unwrap();
        assert_eq!(ext.text.as_deref(), Some("Hello!"));
        let ctx = ext.context_info.unwrap();
        assert_eq!(ctx.stanza_id.as_deref(), Some("ABC123"));
        assert_eq!(ctx.participant.as_deref(), Some("628111@s.whatsapp.net"));
        assert_eq!(
            ctx.quoted_message.unwrap().conversation.as_deref(),
            Some("hi")
        );

        // Direct chats have no participant; the chat itself is the sender.
        greeted.key.participant = None;
        greeted.key.remote_jid = "628222@s.whatsapp.net".to_string();
        let msg = to_wa_message(OutboundMessage::text("Hello!").quoting(&greeted));
        let ctx = msg.extended_text_message.unwrap().context_info.unwrap();
        assert_eq!(ctx.participant.as_deref(), Some("628222@s.whatsapp.net"));
    }

    #[test]
    fn test_pair_code_options_use_browser() {
        let browser = [
            "Amelia".to_string(),
            "Firefox".to_string(),
            "128.0".to_string(),
        ];
        let options = pair_code_options("628123456789", &browser);
        assert_eq!(options.phone_number, "628123456789");
        assert_eq!(options.platform_id, PlatformId::Firefox);
        assert_eq!(options.platform_display, "Firefox (Amelia)");

        assert_eq!(platform_id(" chrome "), PlatformId::Chrome);
        assert_eq!(platform_id("Netscape"), PlatformId::OtherWebClient);
    }

    #[test]
    fn test_forward_after_session_dropped() {
        let (tx, rx) = Session::channel();
        drop(rx);
        forward(&tx, Event::Disconnected(Disconnected));
    }
}
