//! WhatsApp Web protocol version lookup.

use crate::config::VersionConfig;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Version bundled with this build, used when the manifest is unreachable.
pub const DEFAULT_VERSION: ProtocolVersion = ProtocolVersion([2, 3000, 1_023_223_821]);

/// `major.minor.patch` of the WhatsApp Web client being emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProtocolVersion(pub [u32; 3]);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.0;
        write!(f, "{major}.{minor}.{patch}")
    }
}

/// Outcome of a version lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: ProtocolVersion,
    /// `false` when the bundled fallback was used.
    pub is_latest: bool,
}

#[derive(Deserialize)]
struct Manifest {
    version: ProtocolVersion,
}

/// Fetch the latest published version, falling back to [`DEFAULT_VERSION`].
///
/// Never fails: a network or parse error is logged and reported through
/// `is_latest = false`.
pub async fn fetch_latest_version(config: &VersionConfig) -> VersionInfo {
    match try_fetch(config).await {
        Ok(version) => {
            tracing::debug!("WhatsApp: latest web version {}", version);
            VersionInfo {
                version,
                is_latest: true,
            }
        }
        Err(e) => {
            tracing::warn!(
                "WhatsApp: version lookup failed ({}), using bundled {}",
                e,
                DEFAULT_VERSION
            );
            VersionInfo {
                version: DEFAULT_VERSION,
                is_latest: false,
            }
        }
    }
}

async fn try_fetch(config: &VersionConfig) -> crate::error::Result<ProtocolVersion> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    let manifest: Manifest = client
        .get(&config.manifest_url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(manifest.version)
}
