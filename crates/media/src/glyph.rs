//! Glyph metrics and rasterization for text watermarks.

use std::path::{Path, PathBuf};

use {
    ab_glyph::{Font, FontVec, GlyphId, PxScale, ScaleFont, point},
    tracing::debug,
};

use crate::error::{Result, WatermarkError};

/// Fonts tried when no font path is configured.
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Font file names looked up in the user's font directory.
const USER_FONT_NAMES: &[&str] = &["DejaVuSans.ttf", "Arial.ttf", "arial.ttf"];

/// Pixel size of rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextExtent {
    pub width: u32,
    pub height: u32,
}

/// Measures and rasterizes a line of text.
pub trait GlyphRasterizer: Send + Sync {
    /// Bounding box of `text` at `px` pixels.
    fn measure(&self, text: &str, px: f32) -> TextExtent;

    /// Rasterize `text` with its bounding box's top-left at `origin`.
    ///
    /// `plot` receives absolute pixel coordinates (possibly negative or
    /// outside the target) and a coverage value in `0.0..=1.0`.
    fn draw(&self, text: &str, px: f32, origin: (i64, i64), plot: &mut dyn FnMut(i64, i64, f32));
}

/// [`GlyphRasterizer`] backed by a TrueType/OpenType font.
pub struct FontRasterizer {
    font: FontVec,
    source: PathBuf,
}

impl std::fmt::Debug for FontRasterizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontRasterizer")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl FontRasterizer {
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| WatermarkError::font(format!("cannot read {}: {e}", path.display())))?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| WatermarkError::font(format!("cannot parse {}: {e}", path.display())))?;
        Ok(Self {
            font,
            source: path.to_path_buf(),
        })
    }

    /// Load the configured font, or the first usable system font.
    pub fn discover(configured: Option<&Path>) -> Result<Self> {
        if let Some(path) = configured {
            return Self::from_path(path);
        }

        let user_fonts = dirs_next::font_dir()
            .into_iter()
            .flat_map(|dir| USER_FONT_NAMES.iter().map(move |name| dir.join(name)));
        let candidates = SYSTEM_FONT_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .chain(user_fonts);

        for path in candidates.filter(|p| p.is_file()) {
            match Self::from_path(&path) {
                Ok(rasterizer) => {
                    debug!(font = %path.display(), "loaded watermark font");
                    return Ok(rasterizer);
                },
                Err(e) => debug!(font = %path.display(), error = %e, "skipping font"),
            }
        }
        Err(WatermarkError::font(
            "no font configured and no system font found",
        ))
    }

    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    fn advance_positions(&self, text: &str, scale: PxScale) -> (Vec<(GlyphId, f32)>, f32) {
        let scaled = self.font.as_scaled(scale);
        let mut caret = 0.0f32;
        let mut prev: Option<GlyphId> = None;
        let mut glyphs = Vec::with_capacity(text.len());
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = prev {
                caret += scaled.kern(prev, id);
            }
            glyphs.push((id, caret));
            caret += scaled.h_advance(id);
            prev = Some(id);
        }
        (glyphs, caret)
    }
}

impl GlyphRasterizer for FontRasterizer {
    fn measure(&self, text: &str, px: f32) -> TextExtent {
        let scale = PxScale::from(px);
        let (_, width) = self.advance_positions(text, scale);
        let height = self.font.as_scaled(scale).height();
        TextExtent {
            width: width.max(0.0).ceil() as u32,
            height: height.max(0.0).ceil() as u32,
        }
    }

    fn draw(&self, text: &str, px: f32, origin: (i64, i64), plot: &mut dyn FnMut(i64, i64, f32)) {
        let scale = PxScale::from(px);
        let ascent = self.font.as_scaled(scale).ascent();
        let (glyphs, _) = self.advance_positions(text, scale);

        for (id, x) in glyphs {
            let glyph = id.with_scale_and_position(scale, point(x, ascent));
            let Some(outlined) = self.font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            let left = origin.0 + bounds.min.x as i64;
            let top = origin.1 + bounds.min.y as i64;
            outlined.draw(|gx, gy, coverage| {
                plot(left + i64::from(gx), top + i64::from(gy), coverage);
            });
        }
    }
}
