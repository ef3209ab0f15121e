//! Credential store
//!
//! Multi-file auth state: `creds.json` holds the session credentials and every
//! signal key lives in its own `<category>-<id>.json` file next to it. Key
//! material itself is opaque; the bot only reads `registered` and `me`.

use super::types::{CredentialsUpdate, KeyUpdate};
use crate::error::{BotError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const CREDS_FILE: &str = "creds.json";

/// Account the session is linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Session credentials as stored in `creds.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Backend-owned fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Credentials {
    /// Shallow-merge a patch: each top-level key in `patch` replaces ours.
    pub fn merge(&self, patch: &Map<String, Value>) -> Result<Self> {
        let mut current = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => return Err(BotError::Store(format!("serialize credentials: {e}"))),
        };
        for (key, value) in patch {
            current.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(current))
            .map_err(|e| BotError::Store(format!("merge credentials: {e}")))
    }
}

/// Directory-backed credential store.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Open (creating if needed) the store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| BotError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    fn key_path(&self, category: &str, id: &str) -> PathBuf {
        self.dir.join(fix_file_name(&format!("{category}-{id}.json")))
    }

    /// Load persisted credentials, or fresh empty ones on first run.
    pub async fn load(&self) -> Result<Credentials> {
        match read_json::<Credentials>(&self.creds_path()).await? {
            Some(creds) => {
                tracing::debug!(
                    "WhatsApp: loaded credentials (registered={})",
                    creds.registered
                );
                Ok(creds)
            }
            None => {
                tracing::info!(
                    "WhatsApp: no credentials in {}, starting fresh",
                    self.dir.display()
                );
                Ok(Credentials::default())
            }
        }
    }

    pub async fn save(&self, creds: &Credentials) -> Result<()> {
        write_json(&self.creds_path(), creds).await
    }

    pub async fn read_key(&self, category: &str, id: &str) -> Result<Option<Value>> {
        read_json(&self.key_path(category, id)).await
    }

    /// Write or delete a single key.
    pub async fn write_key(&self, update: &KeyUpdate) -> Result<()> {
        let path = self.key_path(&update.category, &update.id);
        match update.value {
            Some(ref value) => write_json(&path, value).await,
            None => match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(BotError::io(path, e)),
            },
        }
    }

    /// Apply an update on top of `current` and persist the result.
    pub async fn apply(
        &self,
        current: &Credentials,
        update: &CredentialsUpdate,
    ) -> Result<Credentials> {
        for key in &update.keys {
            self.write_key(key).await?;
        }
        if update.creds.is_empty() {
            return Ok(current.clone());
        }
        let mut merged = current.merge(&update.creds)?;
        merged.last_updated = Some(Utc::now());
        self.save(&merged).await?;
        Ok(merged)
    }

    /// Remove every file in the store. Used after logout.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BotError::io(&self.dir, e)),
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BotError::io(&self.dir, e))?;
        tracing::info!("WhatsApp: cleared session in {}", self.dir.display());
        Ok(())
    }
}

/// Make a key name safe as a file name.
fn fix_file_name(name: &str) -> String {
    name.replace('/', "__").replace(':', "-")
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BotError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| BotError::json(path, e))
}

/// Write through a temp file so a crash never leaves half a JSON document.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| BotError::json(path, e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| BotError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| BotError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("patch must be an object"),
        }
    }

    #[tokio::test]
    async fn test_load_missing_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("session")).await.unwrap();
        let creds = store.load().await.unwrap();
        assert!(!creds.registered);
        assert!(creds.me.is_none());
    }

    #[tokio::test]
    async fn test_apply_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).await.unwrap();
        let creds = store.load().await.unwrap();

        let update = CredentialsUpdate::creds(patch(json!({
            "registered": true,
            "me": { "id": "628123:4@s.whatsapp.net", "name": "Amelia" },
            "noiseKey": { "public": "abc" }
        })));
        let merged = store.apply(&creds, &update).await.unwrap();
        assert!(merged.registered);
        assert!(merged.last_updated.is_some());

        let reopened = CredentialStore::open(dir.path()).await.unwrap();
        let loaded = reopened.load().await.unwrap();
        assert!(loaded.registered);
        assert_eq!(loaded.me.unwrap().id, "628123:4@s.whatsapp.net");
        assert_eq!(loaded.extra["noiseKey"], json!({ "public": "abc" }));
    }

    #[tokio::test]
    async fn test_merge_keeps_untouched_fields() {
        let creds = Credentials {
            registered: true,
            platform: Some("android".to_string()),
            ..Default::default()
        };
        let merged = creds
            .merge(&patch(json!({ "platform": "iphone" })))
            .unwrap();
        assert!(merged.registered);
        assert_eq!(merged.platform.as_deref(), Some("iphone"));
    }

    #[tokio::test]
    async fn test_key_write_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).await.unwrap();

        let write = KeyUpdate {
            category: "session".to_string(),
            id: "628123:1@s.whatsapp.net".to_string(),
            value: Some(json!({ "record": [1, 2, 3] })),
        };
        store.write_key(&write).await.unwrap();
        assert!(dir.path().join("session-628123-1@s.whatsapp.net.json").exists());
        assert_eq!(
            store.read_key("session", "628123:1@s.whatsapp.net").await.unwrap(),
            Some(json!({ "record": [1, 2, 3] }))
        );

        let delete = KeyUpdate { value: None, ..write };
        store.write_key(&delete).await.unwrap();
        assert_eq!(
            store.read_key("session", "628123:1@s.whatsapp.net").await.unwrap(),
            None
        );
        // Deleting again is fine.
        store.write_key(&delete).await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("session");
        let store = CredentialStore::open(&root).await.unwrap();
        store
            .save(&Credentials {
                registered: true,
                ..Default::default()
            })
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(root.exists());
        assert!(!store.load().await.unwrap().registered);
    }

    #[tokio::test]
    async fn test_corrupt_creds_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("creds.json"), b"{not json").unwrap();
        let store = CredentialStore::open(dir.path()).await.unwrap();
        assert!(matches!(store.load().await, Err(BotError::Json { .. })));
    }

    #[test]
    fn test_fix_file_name() {
        assert_eq!(fix_file_name("app-state/sync:1"), "app-state__sync-1");
    }
}
