//! Still-image thumbnail pipeline and the generator seam used by the cache
//!
//! Images are decoded with the `image` crate, scaled so the long edge fits the
//! configured maximum (never upscaled), composited onto an opaque white canvas
//! of exactly the scaled size and encoded as PNG.

use crate::error::GenerationError;
use crate::video::{self, FfmpegSource};
use crate::ThumbnailConfig;
use image::imageops::{self, FilterType};
use image::{GenericImageView, ImageFormat, ImageReader, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;

/// Encoded artifact bytes plus the pixel size they decode to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Produces artifact bytes for a source file. The cache calls through this
/// trait so callers can swap the decoding backend.
pub trait ArtifactGenerator: Send + Sync {
    fn make_still(&self, source: &Path, max_dimension: u32) -> Result<Rendered, GenerationError>;

    fn make_loop(
        &self,
        source: &Path,
        max_dimension: u32,
        frame_count: u32,
    ) -> Result<Rendered, GenerationError>;
}

/// Default generator: `image` for stills, ffmpeg/ffprobe for videos
#[derive(Debug, Clone)]
pub struct MediaGenerator {
    ffmpeg_path: String,
    ffprobe_path: String,
    frame_delay_ms: u32,
}

impl MediaGenerator {
    pub fn from_config(config: &ThumbnailConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            frame_delay_ms: config.frame_delay_ms,
        }
    }
}

impl Default for MediaGenerator {
    fn default() -> Self {
        Self::from_config(&ThumbnailConfig::default())
    }
}

impl ArtifactGenerator for MediaGenerator {
    fn make_still(&self, source: &Path, max_dimension: u32) -> Result<Rendered, GenerationError> {
        make_still(source, max_dimension)
    }

    fn make_loop(
        &self,
        source: &Path,
        max_dimension: u32,
        frame_count: u32,
    ) -> Result<Rendered, GenerationError> {
        let mut stream = FfmpegSource::open(source, &self.ffprobe_path, &self.ffmpeg_path)?;
        video::make_loop(&mut stream, max_dimension, frame_count, self.frame_delay_ms)
    }
}

/// Fit `(width, height)` inside a `max_dimension` square, preserving aspect ratio.
///
/// Sizes already within bounds are returned unchanged. Otherwise both axes are
/// scaled by `max_dimension / max(width, height)` and floored, so the long edge
/// lands exactly on `max_dimension` and neither axis drops below 1.
pub fn scaled_size(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }

    let longest = u64::from(width.max(height));
    let max = u64::from(max_dimension);
    let new_width = (u64::from(width) * max / longest).max(1) as u32;
    let new_height = (u64::from(height) * max / longest).max(1) as u32;
    (new_width, new_height)
}

/// Decode an image file and render its PNG thumbnail
pub fn make_still(source: &Path, max_dimension: u32) -> Result<Rendered, GenerationError> {
    let img = ImageReader::open(source)
        .map_err(|e| GenerationError::unreadable(source, e))?
        .with_guessed_format()
        .map_err(|e| GenerationError::unreadable(source, e))?
        .decode()
        .map_err(|e| GenerationError::unreadable(source, e))?;

    let (width, height) = img.dimensions();
    let (target_width, target_height) = scaled_size(width, height, max_dimension);

    let rgba = img.to_rgba8();
    let resized = if (target_width, target_height) == (width, height) {
        rgba
    } else {
        imageops::resize(&rgba, target_width, target_height, FilterType::Lanczos3)
    };

    let canvas = compose_on_white(&resized);
    let bytes = encode_png(canvas, source)?;

    Ok(Rendered {
        bytes,
        width: target_width,
        height: target_height,
    })
}

/// Paste `img` at the origin of a white canvas of the same size, blending alpha.
/// The canvas is never larger than the image, so origin placement equals centring.
fn compose_on_white(img: &RgbaImage) -> RgbaImage {
    let (width, height) = img.dimensions();
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, img, 0, 0);
    canvas
}

fn encode_png(canvas: RgbaImage, source: &Path) -> Result<Vec<u8>, GenerationError> {
    let rgb = image::DynamicImage::ImageRgba8(canvas).to_rgb8();
    let mut buffer = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| GenerationError::encode(source, e))?;
    Ok(buffer)
}
