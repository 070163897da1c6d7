use std::{path::Path, sync::Arc};

use {
    bytes::Bytes,
    tidemark_common::{ContentKind, WatermarkSpec},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::{
    error::{Result, WatermarkError},
    glyph::{FontRasterizer, GlyphRasterizer},
    motion::{MotionMark, Transcoder},
    raster,
};

/// Chooses and runs the watermark strategy for a piece of content.
#[derive(Clone)]
pub struct WatermarkEngine {
    rasterizer: Option<Arc<dyn GlyphRasterizer>>,
    transcoder: Transcoder,
}

impl std::fmt::Debug for WatermarkEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkEngine")
            .field("has_font", &self.rasterizer.is_some())
            .field("transcoder", &self.transcoder)
            .finish()
    }
}

impl WatermarkEngine {
    #[must_use]
    pub fn new(rasterizer: Option<Arc<dyn GlyphRasterizer>>, transcoder: Transcoder) -> Self {
        Self {
            rasterizer,
            transcoder,
        }
    }

    /// Build from configuration. A missing font only disables image watermarks.
    #[must_use]
    pub fn from_config(font_path: Option<&Path>, transcoder_binary: &str) -> Self {
        let rasterizer = match FontRasterizer::discover(font_path) {
            Ok(font) => {
                debug!(font = %font.source().display(), "watermark font ready");
                Some(Arc::new(font) as Arc<dyn GlyphRasterizer>)
            },
            Err(e) => {
                warn!(error = %e, "no watermark font; images will be delivered unmarked");
                None
            },
        };
        Self::new(rasterizer, Transcoder::new(transcoder_binary))
    }

    /// Whether `apply` would transform content of this kind under `spec`.
    #[must_use]
    pub fn applies_to(kind: ContentKind, spec: &WatermarkSpec) -> bool {
        match kind {
            ContentKind::Image => spec.has_text(),
            ContentKind::Motion => MotionMark::from_spec(spec).is_some(),
            ContentKind::GenericDocument => false,
        }
    }

    /// Watermark `data`. Content the engine does not touch is returned as is.
    ///
    /// Errors never leave partial output; callers deliver the original bytes.
    pub async fn apply(
        &self,
        kind: ContentKind,
        data: Bytes,
        file_name: &str,
        spec: &WatermarkSpec,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        if cancel.is_cancelled() {
            return Err(WatermarkError::Cancelled);
        }
        if !Self::applies_to(kind, spec) {
            return Ok(data);
        }

        match kind {
            ContentKind::Image => self.apply_raster(data, file_name, spec).await,
            ContentKind::Motion => {
                let Some(mark) = MotionMark::from_spec(spec) else {
                    return Ok(data);
                };
                self.transcoder
                    .apply(&data, file_name, &mark, work_dir, cancel)
                    .await
                    .map(Bytes::from)
            },
            ContentKind::GenericDocument => Ok(data),
        }
    }

    async fn apply_raster(&self, data: Bytes, file_name: &str, spec: &WatermarkSpec) -> Result<Bytes> {
        let rasterizer = self
            .rasterizer
            .clone()
            .ok_or_else(|| WatermarkError::font("no font available"))?;
        let file_name = file_name.to_string();
        let spec = spec.clone();

        // Decoding and re-encoding large images is CPU-bound.
        tokio::task::spawn_blocking(move || {
            raster::apply_text(&data, &file_name, &spec, rasterizer.as_ref()).map(Bytes::from)
        })
        .await
        .map_err(|e| WatermarkError::external("raster watermark task failed", e))?
    }
}
