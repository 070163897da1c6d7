//! Config schema types (telegram, watermark, transfer, transcoder).
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tidemark_common::{RgbaColor, WatermarkSpec},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TidemarkConfig {
    pub telegram: TelegramConfig,
    pub watermark: WatermarkConfig,
    pub transfer: TransferConfig,
    pub transcoder: TranscoderConfig,
}

/// Bot account settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
    /// Bot API base URL override (self-hosted Bot API server).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    /// Long-poll timeout passed to `getUpdates`.
    pub poll_timeout_secs: u32,
}

impl TelegramConfig {
    /// The token, if one is configured and non-blank.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token
            .as_ref()
            .map(|t| t.expose_secret().as_str())
            .filter(|t| !t.trim().is_empty())
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("api_url", &self.api_url)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: None,
            poll_timeout_secs: 30,
        }
    }
}

/// System-wide watermark defaults. Requesters override these per chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    pub text: String,
    /// `[r, g, b, a]`; alpha is translucency.
    pub color: RgbaColor,
    pub font_size: u32,
    /// TrueType/OpenType font for raster text. Common system fonts are tried when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_path: Option<PathBuf>,
    /// Overlay image for videos. When set it replaces the text overlay there.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
}

impl WatermarkConfig {
    #[must_use]
    pub fn to_spec(&self) -> WatermarkSpec {
        WatermarkSpec {
            text: self.text.clone(),
            color: self.color,
            font_size: self.font_size,
            image_path: self.image_path.clone(),
        }
    }
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            text: "Tidemark".into(),
            color: RgbaColor::default(),
            font_size: 40,
            font_path: None,
            image_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Root for per-job scratch directories. System temp dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    /// Timeout of the HEAD probe issued before a URL download.
    pub probe_timeout_secs: u64,
    /// Connect and per-read timeout of source downloads.
    pub download_timeout_secs: u64,
    /// Name used when the requester replies `/default`.
    pub default_output_name: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            probe_timeout_secs: 5,
            download_timeout_secs: 60,
            default_output_name: "output".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Executable name (looked up on `PATH`) or absolute path.
    pub binary: String,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".into(),
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = TidemarkConfig::default();
        assert_eq!(cfg.telegram.poll_timeout_secs, 30);
        assert_eq!(cfg.watermark.text, "Tidemark");
        assert_eq!(cfg.watermark.color, RgbaColor::new(255, 255, 255, 128));
        assert_eq!(cfg.watermark.font_size, 40);
        assert_eq!(cfg.transfer.probe_timeout_secs, 5);
        assert_eq!(cfg.transfer.download_timeout_secs, 60);
        assert_eq!(cfg.transfer.default_output_name, "output");
        assert_eq!(cfg.transcoder.binary, "ffmpeg");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: TidemarkConfig = toml::from_str(
            r#"
            [telegram]
            token = "123:ABC"

            [watermark]
            color = [0, 0, 0, 255]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.telegram.token(), Some("123:ABC"));
        assert_eq!(cfg.watermark.color, RgbaColor::new(0, 0, 0, 255));
        assert_eq!(cfg.watermark.font_size, 40);
        assert_eq!(cfg.transcoder.binary, "ffmpeg");
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let cfg = TelegramConfig {
            token: Some(Secret::new("  ".into())),
            ..Default::default()
        };
        assert_eq!(cfg.token(), None);
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = TelegramConfig {
            token: Some(Secret::new("secret-token".into())),
            ..Default::default()
        };
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn serialize_roundtrip_keeps_token() {
        let mut cfg = TidemarkConfig::default();
        cfg.telegram.token = Some(Secret::new("tok".into()));
        let json = serde_json::to_string(&cfg).unwrap();
        let back: TidemarkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.telegram.token(), Some("tok"));
    }

    #[test]
    fn spec_snapshot_copies_defaults() {
        let cfg = WatermarkConfig {
            image_path: Some(PathBuf::from("/logo.png")),
            ..Default::default()
        };
        let spec = cfg.to_spec();
        assert_eq!(spec.text, "Tidemark");
        assert_eq!(spec.image_path.as_deref(), Some(std::path::Path::new("/logo.png")));
    }
}
