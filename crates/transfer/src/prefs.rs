use std::collections::HashMap;

use {
    tidemark_common::{RgbaColor, WatermarkSpec},
    tokio::sync::RwLock,
    tracing::info,
};

use crate::error::Result;

/// Platform identifier of the person who sent a request.
pub type RequesterId = i64;

/// Field a settings reply applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatermarkField {
    Text,
    Color,
    Size,
}

impl WatermarkField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Color => "color",
            Self::Size => "size",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Overrides {
    text: Option<String>,
    color: Option<RgbaColor>,
    font_size: Option<u32>,
}

/// Per-requester watermark overrides layered over configured defaults.
///
/// Jobs take a [`snapshot`](Self::snapshot) at start; later changes never
/// affect a running job.
#[derive(Debug)]
pub struct PreferenceStore {
    defaults: WatermarkSpec,
    overrides: RwLock<HashMap<RequesterId, Overrides>>,
}

impl PreferenceStore {
    #[must_use]
    pub fn new(defaults: WatermarkSpec) -> Self {
        Self {
            defaults,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn defaults(&self) -> &WatermarkSpec {
        &self.defaults
    }

    /// Effective settings for `requester` right now.
    pub async fn snapshot(&self, requester: RequesterId) -> WatermarkSpec {
        let mut spec = self.defaults.clone();
        if let Some(o) = self.overrides.read().await.get(&requester) {
            if let Some(text) = &o.text {
                spec.text.clone_from(text);
            }
            if let Some(color) = o.color {
                spec.color = color;
            }
            if let Some(size) = o.font_size {
                spec.font_size = size;
            }
        }
        spec
    }

    /// Parse a settings reply and store it. Invalid input leaves the store untouched.
    pub async fn apply_input(
        &self,
        requester: RequesterId,
        field: WatermarkField,
        raw: &str,
    ) -> Result<()> {
        match field {
            WatermarkField::Text => self.set_text(requester, raw.to_string()).await,
            WatermarkField::Color => self.set_color(requester, raw.parse::<RgbaColor>()?).await,
            WatermarkField::Size => {
                self.set_font_size(requester, WatermarkSpec::parse_font_size(raw)?)
                    .await;
            },
        }
        info!(requester, field = field.as_str(), "watermark preference updated");
        Ok(())
    }

    pub async fn set_text(&self, requester: RequesterId, text: String) {
        self.overrides.write().await.entry(requester).or_default().text = Some(text);
    }

    pub async fn set_color(&self, requester: RequesterId, color: RgbaColor) {
        self.overrides.write().await.entry(requester).or_default().color = Some(color);
    }

    pub async fn set_font_size(&self, requester: RequesterId, size: u32) {
        self.overrides
            .write()
            .await
            .entry(requester)
            .or_default()
            .font_size = Some(size);
    }
}
