//! Domain types shared by the pipeline, the watermark engine and the bot glue.

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, naming};

/// Extensions delivered through the video primitive and watermarked by the transcoder.
const MOTION_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

/// Extensions decoded and re-encoded by the raster watermark.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];

// ── ContentKind ─────────────────────────────────────────────────────────────

/// Classification resolved once at ingestion from the final file extension.
///
/// Drives both the watermark strategy and the delivery primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Image,
    Motion,
    GenericDocument,
}

impl ContentKind {
    /// Classify by extension (case-insensitive). Unknown or missing
    /// extensions are generic documents.
    #[must_use]
    pub fn from_file_name(file_name: &str) -> Self {
        let Some(ext) = naming::extension(file_name) else {
            return Self::GenericDocument;
        };
        let ext = ext.to_ascii_lowercase();
        if MOTION_EXTENSIONS.contains(&ext.as_str()) {
            Self::Motion
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Image
        } else {
            Self::GenericDocument
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Motion => "motion",
            Self::GenericDocument => "document",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── SourceDescriptor ────────────────────────────────────────────────────────

/// Where the bytes of a job come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// An object already uploaded to the chat platform.
    RemoteUpload {
        object_id: String,
        /// Size reported by the platform's message metadata, if any.
        declared_size: Option<u64>,
        mime_hint: Option<String>,
    },
    /// A plain HTTP(S) download.
    UrlDownload { url: url::Url },
}

impl SourceDescriptor {
    /// Validate a user-supplied URL. Only `http` and `https` with a host are accepted.
    pub fn url(raw: &str) -> Result<Self> {
        let parsed = url::Url::parse(raw.trim())
            .map_err(|e| Error::MalformedUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::UnsupportedScheme(parsed.scheme().to_owned()));
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(Error::MissingHost);
        }
        Ok(Self::UrlDownload { url: parsed })
    }

    #[must_use]
    pub fn remote(
        object_id: impl Into<String>,
        declared_size: Option<u64>,
        mime_hint: Option<String>,
    ) -> Self {
        Self::RemoteUpload {
            object_id: object_id.into(),
            declared_size,
            mime_hint,
        }
    }

    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::RemoteUpload { .. } => "remote_upload",
            Self::UrlDownload { .. } => "url_download",
        }
    }
}

// ── RgbaColor ───────────────────────────────────────────────────────────────

/// Watermark color; alpha enables translucency.
///
/// Serialized as a four element array (`[255, 255, 255, 128]`), parsed from
/// user input as `r,g,b,a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u8; 4]", into = "[u8; 4]")]
pub struct RgbaColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl RgbaColor {
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    #[must_use]
    pub const fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for RgbaColor {
    fn default() -> Self {
        Self::new(255, 255, 255, 128)
    }
}

impl From<[u8; 4]> for RgbaColor {
    fn from([r, g, b, a]: [u8; 4]) -> Self {
        Self::new(r, g, b, a)
    }
}

impl From<RgbaColor> for [u8; 4] {
    fn from(color: RgbaColor) -> Self {
        color.to_array()
    }
}

impl FromStr for RgbaColor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(Error::ColorArity(parts.len()));
        }
        let mut channels = [0u8; 4];
        for (slot, part) in channels.iter_mut().zip(&parts) {
            *slot = part
                .parse::<u8>()
                .map_err(|_| Error::ColorChannel((*part).to_owned()))?;
        }
        Ok(Self::from(channels))
    }
}

impl fmt::Display for RgbaColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.r, self.g, self.b, self.a)
    }
}

// ── WatermarkSpec ───────────────────────────────────────────────────────────

/// Resolved watermark settings for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkSpec {
    pub text: String,
    pub color: RgbaColor,
    pub font_size: u32,
    /// Overlay image for motion content. Takes precedence over `text` there.
    pub image_path: Option<PathBuf>,
}

impl WatermarkSpec {
    #[must_use]
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Parse a user-supplied font size. Zero is rejected.
    pub fn parse_font_size(raw: &str) -> Result<u32> {
        match raw.trim().parse::<u32>() {
            Ok(size) if size > 0 => Ok(size),
            _ => Err(Error::FontSize(raw.trim().to_owned())),
        }
    }
}
