//! Session bootstrap
//!
//! Loads credentials, resolves the protocol version, opens a connection and
//! runs the one-time pairing-code flow when the session is not linked yet.

use super::connection::{ConnectOptions, Connection, Connector, Session};
use super::credentials::{CredentialStore, Credentials};
use super::prompt::{PairingPrompt, normalize_phone_number};
use super::types::CredentialsUpdate;
use super::version::{ProtocolVersion, fetch_latest_version};
use crate::config::VersionConfig;
use crate::error::{BotError, Result};
use std::sync::Arc;

/// Where the protocol version comes from.
#[derive(Debug, Clone)]
pub enum VersionSource {
    /// Look up the published manifest on every bootstrap.
    Manifest(VersionConfig),
    Fixed(ProtocolVersion),
}

/// Result of a successful bootstrap.
pub struct Bootstrapped {
    pub session: Session,
    pub hook: PersistenceHook,
}

/// Writes credential updates to disk as the backend emits them.
pub struct PersistenceHook {
    store: CredentialStore,
    credentials: Credentials,
}

impl PersistenceHook {
    pub fn new(store: CredentialStore, credentials: Credentials) -> Self {
        Self { store, credentials }
    }

    pub async fn persist(&mut self, update: &CredentialsUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        self.credentials = self.store.apply(&self.credentials, update).await?;
        tracing::debug!(
            "WhatsApp: persisted credentials ({} creds field(s), {} key(s))",
            update.creds.len(),
            update.keys.len()
        );
        Ok(())
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// Builds sessions from persisted credentials.
pub struct Bootstrapper {
    store: CredentialStore,
    connector: Arc<dyn Connector>,
    prompt: Arc<dyn PairingPrompt>,
    version: VersionSource,
    browser: [String; 3],
    /// Number to pair with; filled from the prompt the first time it is asked.
    phone_number: Option<String>,
}

impl Bootstrapper {
    pub fn new(
        store: CredentialStore,
        connector: Arc<dyn Connector>,
        prompt: Arc<dyn PairingPrompt>,
        version: VersionSource,
        browser: [String; 3],
    ) -> Self {
        Self {
            store,
            connector,
            prompt,
            version,
            browser,
            phone_number: None,
        }
    }

    /// Pre-set the pairing phone number so the operator is never prompted.
    pub fn with_phone_number(mut self, phone_number: Option<String>) -> Self {
        self.phone_number = phone_number.as_deref().and_then(normalize_phone_number);
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Load credentials, connect, and pair if needed.
    pub async fn start(&mut self) -> Result<Bootstrapped> {
        let mut credentials = self.store.load().await?;

        let version = match self.version {
            VersionSource::Fixed(version) => version,
            VersionSource::Manifest(ref config) => {
                let info = fetch_latest_version(config).await;
                tracing::info!(
                    "WhatsApp: using web v{} (latest: {})",
                    info.version,
                    info.is_latest
                );
                info.version
            }
        };

        let session = self
            .connector
            .connect(ConnectOptions {
                version,
                browser: self.browser.clone(),
                credentials: credentials.clone(),
                session_dir: self.store.dir().to_path_buf(),
            })
            .await?;

        // The connection knows the real link state; creds.json only mirrors it.
        if session.connection.is_registered() && !credentials.registered {
            tracing::info!("WhatsApp: session is linked, refreshing creds.json");
            credentials.registered = true;
            if let Err(e) = self.store.save(&credentials).await {
                tracing::warn!("WhatsApp: failed to mirror link state: {}", e);
            }
        }

        if !session.connection.is_registered()
            && let Err(e) = self.pair(session.connection.as_ref()).await
        {
            if let Err(close_err) = session.close().await {
                tracing::warn!("WhatsApp: failed to close unpaired connection: {}", close_err);
            }
            return Err(e);
        }

        Ok(Bootstrapped {
            session,
            hook: PersistenceHook::new(self.store.clone(), credentials),
        })
    }

    async fn pair(&mut self, connection: &dyn Connection) -> Result<()> {
        let phone_number = match self.phone_number {
            Some(ref number) => number.clone(),
            None => {
                let raw = self.prompt.phone_number().await?;
                let number = normalize_phone_number(&raw)
                    .ok_or_else(|| BotError::Prompt("phone number has no digits".to_string()))?;
                self.phone_number = Some(number.clone());
                number
            }
        };

        tracing::info!("WhatsApp: requesting pairing code for {}", phone_number);
        let code = connection.request_pairing_code(&phone_number).await?;
        self.prompt.show_code(&code);
        Ok(())
    }
}
