//! Output assets produced by a generation run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The media kind of an output asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// A still image.
    Image,
    /// A video clip.
    Video,
    /// An audio clip.
    Audio,
    /// Inline text.
    Text,
    /// Any other downloadable file.
    File,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Text => write!(f, "text"),
            Self::File => write!(f, "file"),
        }
    }
}

/// An asset written to the context's `output` by a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputAsset {
    /// The media kind.
    pub kind: AssetKind,

    /// Where the asset can be fetched (http(s) or data URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Inline content, used by text assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// MIME type, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,

    /// Backend-specific extras (seed, dimensions, storage key...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutputAsset {
    fn with_url(kind: AssetKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: Some(url.into()),
            content: None,
            mime: None,
            metadata: HashMap::new(),
        }
    }

    /// Creates an image asset.
    #[must_use]
    pub fn image(url: impl Into<String>) -> Self {
        Self::with_url(AssetKind::Image, url)
    }

    /// Creates a video asset.
    #[must_use]
    pub fn video(url: impl Into<String>) -> Self {
        Self::with_url(AssetKind::Video, url)
    }

    /// Creates an audio asset.
    #[must_use]
    pub fn audio(url: impl Into<String>) -> Self {
        Self::with_url(AssetKind::Audio, url)
    }

    /// Creates a generic file asset.
    #[must_use]
    pub fn file(url: impl Into<String>) -> Self {
        Self::with_url(AssetKind::File, url)
    }

    /// Creates an inline text asset.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: AssetKind::Text,
            url: None,
            content: Some(content.into()),
            mime: Some("text/plain".to_string()),
            metadata: HashMap::new(),
        }
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
