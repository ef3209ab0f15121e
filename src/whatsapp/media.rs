//! Media download helpers.

use super::connection::Connection;
use super::types::MediaRef;
use crate::error::Result;
use futures::StreamExt;
use std::fmt;

/// Upper bound on the buffer reserved up front from the advertised file length.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Media category; tells the backend which kind of message to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    /// Anything else, including a missing MIME type.
    Document,
}

impl MediaKind {
    /// Category from the primary component of a MIME type (`image/jpeg` -> image).
    pub fn from_mime(mimetype: Option<&str>) -> Self {
        let primary = mimetype
            .and_then(|m| m.split('/').next())
            .map(str::trim)
            .unwrap_or_default();
        match primary.to_ascii_lowercase().as_str() {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            _ => Self::Document,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        };
        f.write_str(name)
    }
}

/// Download a media message and buffer it entirely in memory.
pub async fn download_media(connection: &dyn Connection, media: &MediaRef) -> Result<Vec<u8>> {
    let kind = MediaKind::from_mime(media.mimetype.as_deref());
    let mut stream = connection.download(media, kind).await?;

    let mut buffer = Vec::with_capacity(media.file_length.unwrap_or(0).min(MAX_PREALLOC) as usize);
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }

    tracing::debug!("WhatsApp: downloaded {} bytes of {} media", buffer.len(), kind);
    Ok(buffer)
}
