//! Watermark engine: raster text watermarks, motion-picture overlays through an
//! external transcoder, and pass-through for everything else.

pub mod engine;
pub mod error;
pub mod glyph;
pub mod motion;
pub mod raster;

pub use {
    engine::WatermarkEngine,
    error::{Result, WatermarkError},
    glyph::{FontRasterizer, GlyphRasterizer, TextExtent},
    motion::{MotionMark, Transcoder},
};
