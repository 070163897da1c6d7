//! Text watermarks on still images.
//!
//! The text sits in the bottom-right corner with a 10 px margin, blended with
//! source-over compositing so the color's alpha acts as translucency.

use std::io::Cursor;

use {
    image::{
        DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage, codecs::jpeg::JpegEncoder,
    },
    tidemark_common::{RgbaColor, WatermarkSpec, naming},
};

use crate::{
    error::{Result, WatermarkError},
    glyph::GlyphRasterizer,
};

/// Distance between the text box and the right/bottom edges.
pub const MARGIN: i64 = 10;

/// JPEG re-encode quality.
pub const JPEG_QUALITY: u8 = 95;

/// Font size actually used on a `width`×`height` image.
///
/// Shrinks to a tenth of the shorter side when the image is smaller than the
/// requested size in either dimension. Never below 1 px.
#[must_use]
pub fn effective_font_size(width: u32, height: u32, requested: u32) -> u32 {
    let size = if width < requested || height < requested {
        requested.min(width.min(height) / 10)
    } else {
        requested
    };
    size.max(1)
}

/// Top-left corner of a `text_width`×`text_height` box in the bottom-right corner.
#[must_use]
pub fn placement(width: u32, height: u32, text_width: u32, text_height: u32) -> (i64, i64) {
    (
        i64::from(width) - i64::from(text_width) - MARGIN,
        i64::from(height) - i64::from(text_height) - MARGIN,
    )
}

/// Draw `spec.text` onto the encoded image in `data`, re-encoding by the
/// extension of `file_name`.
pub fn apply_text(
    data: &[u8],
    file_name: &str,
    spec: &WatermarkSpec,
    rasterizer: &dyn GlyphRasterizer,
) -> Result<Vec<u8>> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| WatermarkError::external("failed to guess image format", e))?;
    let source_format = reader.format();
    let decoded = reader.decode().map_err(WatermarkError::Decode)?;

    let mut canvas = decoded.to_rgba8();
    draw_text(&mut canvas, spec, rasterizer);

    let format = output_format(file_name).or(source_format).unwrap_or(ImageFormat::Png);
    encode(canvas, format)
}

/// Composite the text onto `canvas` in place.
pub fn draw_text(canvas: &mut RgbaImage, spec: &WatermarkSpec, rasterizer: &dyn GlyphRasterizer) {
    let (width, height) = canvas.dimensions();
    let px = effective_font_size(width, height, spec.font_size) as f32;
    let extent = rasterizer.measure(&spec.text, px);
    let origin = placement(width, height, extent.width, extent.height);
    let color = spec.color;

    rasterizer.draw(&spec.text, px, origin, &mut |x, y, coverage| {
        let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
            return;
        };
        if x >= width || y >= height || coverage <= 0.0 {
            return;
        }
        let bottom = *canvas.get_pixel(x, y);
        canvas.put_pixel(x, y, blend_over(bottom, color, coverage));
    });
}

/// Porter-Duff "over" of `color` (scaled by glyph coverage) onto `bottom`.
fn blend_over(bottom: Rgba<u8>, color: RgbaColor, coverage: f32) -> Rgba<u8> {
    let top_alpha = (f32::from(color.a) / 255.0) * coverage.clamp(0.0, 1.0);
    let bottom_alpha = f32::from(bottom[3]) / 255.0;
    let out_alpha = top_alpha + bottom_alpha * (1.0 - top_alpha);

    if out_alpha < 0.001 {
        return Rgba([0, 0, 0, 0]);
    }

    let channel = |top: u8, bottom: u8| -> u8 {
        let t = f32::from(top) / 255.0;
        let b = f32::from(bottom) / 255.0;
        let value = (t * top_alpha + b * bottom_alpha * (1.0 - top_alpha)) / out_alpha;
        (value * 255.0).round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        channel(color.r, bottom[0]),
        channel(color.g, bottom[1]),
        channel(color.b, bottom[2]),
        (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

fn output_format(file_name: &str) -> Option<ImageFormat> {
    match naming::extension(file_name)?.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        "webp" => Some(ImageFormat::WebP),
        "bmp" => Some(ImageFormat::Bmp),
        _ => None,
    }
}

fn encode(canvas: RgbaImage, format: ImageFormat) -> Result<Vec<u8>> {
    let image = DynamicImage::ImageRgba8(canvas);
    let mut output = Cursor::new(Vec::new());
    match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut output, JPEG_QUALITY);
            DynamicImage::ImageRgb8(image.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(WatermarkError::Encode)?;
        },
        other => image
            .write_to(&mut output, other)
            .map_err(WatermarkError::Encode)?,
    }
    Ok(output.into_inner())
}
