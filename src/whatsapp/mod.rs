//! WhatsApp Integration
//!
//! Links a WhatsApp account as a companion device, keeps the connection alive
//! and answers the `hi` and `!echo` commands. The protocol itself lives in the
//! backend behind [`Connector`]; with the `whatsapp` feature that backend is
//! `whatsapp-rust` ([`WaConnector`]).

mod bootstrap;
mod connection;
mod credentials;
mod dispatcher;
pub mod jid;
mod media;
mod prompt;
mod qr;
mod supervisor;
mod types;
mod version;

#[cfg(feature = "whatsapp")]
mod backend;

pub use bootstrap::{Bootstrapped, Bootstrapper, PersistenceHook, VersionSource};
pub use connection::{ConnectOptions, Connection, Connector, MediaStream, Session};
pub use credentials::{Contact, CredentialStore, Credentials};
pub use dispatcher::{Command, Dispatcher, ECHO_PREFIX, LifecycleAction};
pub use jid::{decode_jid, decode_optional_jid, jid_decode};
pub use media::{MediaKind, download_media};
pub use prompt::{ConsolePrompt, PairingPrompt, normalize_phone_number};
pub use qr::render_qr;
pub use supervisor::{Outcome, ReconnectPolicy, Supervisor, SupervisorState};
pub use types::{
    ConnectionState, ConnectionUpdate, CredentialsUpdate, Disconnect, DisconnectReason,
    InboundMessage, KeyUpdate, MediaRef, MessageContent, MessageKey, OutboundMessage,
    SessionEvent,
};
pub use version::{DEFAULT_VERSION, ProtocolVersion, VersionInfo, fetch_latest_version};

#[cfg(feature = "whatsapp")]
pub use backend::WaConnector;
