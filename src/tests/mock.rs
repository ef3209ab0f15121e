//! Scripted in-memory backend.

use crate::error::{BotError, Result};
use crate::whatsapp::{
    ConnectOptions, Connection, Connector, InboundMessage, MediaKind, MediaRef, MediaStream,
    MessageContent, MessageKey, OutboundMessage, PairingPrompt, Session, SessionEvent,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Shared, ordered record of backend calls across connections.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn inbound(from: &str, text: &str) -> InboundMessage {
    InboundMessage {
        key: MessageKey {
            remote_jid: from.to_string(),
            from_me: false,
            id: "3EB0C431C26A1916B8A1".to_string(),
            participant: None,
        },
        push_name: Some("Tester".to_string()),
        timestamp: None,
        message: Some(MessageContent::text(text)),
    }
}

pub struct MockConnection {
    index: usize,
    registered: bool,
    fail_sends: bool,
    chunks: Vec<Vec<u8>>,
    log: CallLog,
    pub sent: Mutex<Vec<(String, OutboundMessage)>>,
    pub pairing_requests: Mutex<Vec<String>>,
    pub downloads: Mutex<Vec<MediaKind>>,
    pub closes: AtomicUsize,
}

impl MockConnection {
    pub fn new(registered: bool) -> Self {
        Self {
            index: 0,
            registered,
            fail_sends: false,
            chunks: Vec::new(),
            log: CallLog::default(),
            sent: Mutex::new(Vec::new()),
            pairing_requests: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn with_chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn is_registered(&self) -> bool {
        self.registered
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String> {
        self.pairing_requests
            .lock()
            .unwrap()
            .push(phone_number.to_string());
        Ok("ABCD-EFGH".to_string())
    }

    async fn send_message(&self, to: &str, message: OutboundMessage) -> Result<String> {
        if self.fail_sends {
            return Err(BotError::Send {
                to: to.to_string(),
                reason: "network unreachable".to_string(),
            });
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), message));
        Ok(format!("SENT-{}", sent.len()))
    }

    async fn download(&self, _media: &MediaRef, kind: MediaKind) -> Result<MediaStream> {
        self.downloads.lock().unwrap().push(kind);
        let chunks: Vec<Result<Vec<u8>>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push(format!("close#{}", self.index));
        Ok(())
    }
}

/// What the next `connect` call does.
pub enum Script {
    /// `connect` itself fails.
    Fail,
    /// Open a connection that emits `events`, then ends the stream unless `hold`.
    Events {
        registered: bool,
        events: Vec<SessionEvent>,
        hold: bool,
    },
}

impl Script {
    pub fn events(events: Vec<SessionEvent>) -> Self {
        Self::Events {
            registered: true,
            events,
            hold: false,
        }
    }

    pub fn held(events: Vec<SessionEvent>) -> Self {
        Self::Events {
            registered: true,
            events,
            hold: true,
        }
    }
}

#[derive(Default)]
pub struct MockConnector {
    scripts: Mutex<VecDeque<Script>>,
    held: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
    pub log: CallLog,
    pub connections: Mutex<Vec<Arc<MockConnection>>>,
    pub options: Mutex<Vec<ConnectOptions>>,
}

impl MockConnector {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.options.lock().unwrap().len()
    }

    pub fn connection(&self, index: usize) -> Arc<MockConnection> {
        self.connections.lock().unwrap()[index].clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, options: ConnectOptions) -> Result<Session> {
        let attempt = {
            let mut all = self.options.lock().unwrap();
            all.push(options);
            all.len()
        };
        self.log.lock().unwrap().push(format!("connect#{attempt}"));

        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Fail);
        let (registered, events, hold) = match script {
            Script::Fail => {
                return Err(BotError::Backend(anyhow::anyhow!("connection refused")));
            }
            Script::Events {
                registered,
                events,
                hold,
            } => (registered, events, hold),
        };

        let mut connection = MockConnection::new(registered);
        connection.index = attempt;
        connection.log = self.log.clone();
        let connection = Arc::new(connection);
        self.connections.lock().unwrap().push(connection.clone());

        let (tx, rx) = Session::channel();
        for event in events {
            tx.send(event).unwrap();
        }
        if hold {
            self.held.lock().unwrap().push(tx);
        }

        Ok(Session::new(connection, rx))
    }
}

/// Prompt that answers with a fixed phone number.
pub struct MockPrompt {
    answer: Option<String>,
    pub asked: AtomicUsize,
    pub shown: Mutex<Vec<String>>,
}

impl MockPrompt {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            asked: AtomicUsize::new(0),
            shown: Mutex::new(Vec::new()),
        }
    }

    /// Simulates a closed stdin.
    pub fn closed() -> Self {
        Self {
            answer: None,
            asked: AtomicUsize::new(0),
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PairingPrompt for MockPrompt {
    async fn phone_number(&self) -> Result<String> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
            .clone()
            .ok_or_else(|| BotError::Prompt("stdin closed".to_string()))
    }

    fn show_code(&self, code: &str) {
        self.shown.lock().unwrap().push(code.to_string());
    }
}
