//! Raster engine backed by the `image` crate.
//!
//! Resampling uses Lanczos3. JPEG is written through `jpeg-encoder`, which
//! emits progressive scans when the artifact asks for them. PNG and GIF use
//! the `image` encoders. No encoder copies source metadata.

use std::io::Cursor;

use image::codecs::gif::GifEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Frame, ImageReader, Rgba, RgbaImage};
use jpeg_encoder::{ColorType, Encoder as JpegEncoder};

use super::engine::{ImageArtifact, ImageEngine, OutputFormat, MAX_QUALITY, MIN_QUALITY};
use super::filters::FilterOp;
use crate::error::TransformError;
use crate::params::Color;

const LAPLACIAN: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0];
const EMBOSS: [f32; 9] = [-2.0, -1.0, 0.0, -1.0, 1.0, 1.0, 0.0, 1.0, 2.0];

/// Sigma of the unsharp mask applied when a request asks for sharpening.
const SHARPEN_SIGMA: f32 = 0.5;

/// Largest canvas the engine will allocate.
pub const MAX_CANVAS_PIXELS: u64 = 64 * 1024 * 1024;

/// [`ImageEngine`] implementation on top of `image`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterEngine;

impl RasterEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ImageEngine for RasterEngine {
    fn name(&self) -> &str {
        "image-rs"
    }

    fn decode(&self, data: &[u8], format: OutputFormat) -> Result<ImageArtifact, TransformError> {
        let image = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| TransformError::Decode(e.to_string()))?
            .decode()
            .map_err(|e| TransformError::Decode(e.to_string()))?;
        Ok(ImageArtifact::new(image, format))
    }

    fn canvas(
        &self,
        width: u32,
        height: u32,
        fill: Color,
        format: OutputFormat,
    ) -> Result<ImageArtifact, TransformError> {
        let (width, height) = (width.max(1), height.max(1));
        if u64::from(width) * u64::from(height) > MAX_CANVAS_PIXELS {
            return Err(TransformError::TooLarge { width, height });
        }
        let buffer = RgbaImage::from_pixel(width, height, Rgba(fill.to_rgba()));
        Ok(ImageArtifact::new(DynamicImage::ImageRgba8(buffer), format))
    }

    fn resize(
        &self,
        artifact: &mut ImageArtifact,
        width: u32,
        height: u32,
        sharpen: bool,
    ) -> Result<(), TransformError> {
        if width == 0 || height == 0 {
            return Err(TransformError::Engine(format!(
                "cannot resize to {}x{}",
                width, height
            )));
        }
        let mut resized = if artifact.dimensions() == (width, height) {
            artifact.image().clone()
        } else {
            artifact.image().resize_exact(width, height, FilterType::Lanczos3)
        };
        if sharpen {
            resized = resized.unsharpen(SHARPEN_SIGMA, 1);
        }
        artifact.replace_image(resized);
        Ok(())
    }

    fn crop(
        &self,
        artifact: &mut ImageArtifact,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<(), TransformError> {
        let (w, h) = artifact.dimensions();
        if width == 0 || height == 0 || x >= w || y >= h {
            return Err(TransformError::Engine(format!(
                "crop {}x{}+{}+{} outside {}x{} image",
                width, height, x, y, w, h
            )));
        }
        let cropped = artifact.image().crop_imm(x, y, width, height);
        artifact.replace_image(cropped);
        Ok(())
    }

    fn composite(&self, canvas: &mut ImageArtifact, overlay: &ImageArtifact, x: i64, y: i64) {
        imageops::overlay(canvas.image_mut(), overlay.image(), x, y);
    }

    fn apply_filter(
        &self,
        artifact: &mut ImageArtifact,
        op: &FilterOp,
    ) -> Result<(), TransformError> {
        let image = artifact.image();
        let filtered = match *op {
            FilterOp::Negate { grey_only } => negate(image, grey_only),
            FilterOp::Modulate {
                brightness,
                saturation,
                hue,
            } => modulate(image, brightness, saturation, hue),
            FilterOp::Level { black, gamma, white } => {
                let white = white.unwrap_or(255.0);
                map_channels(image, |v| level(v, black, gamma, white))
            }
            FilterOp::Colorize { color, opacity } => colorize(image, color, opacity),
            FilterOp::Edge { .. } => image.filter3x3(&LAPLACIAN),
            FilterOp::Emboss { .. } => image.grayscale().filter3x3(&EMBOSS),
            FilterOp::GaussianBlur { sigma, .. } | FilterOp::Blur { sigma, .. } => {
                image.blur(sigma.max(0.1))
            }
            FilterOp::Sketch { sigma, .. } => {
                let mut edges = image.grayscale().filter3x3(&LAPLACIAN);
                edges.invert();
                edges.blur((sigma / 10.0).max(0.1))
            }
            FilterOp::Median { radius } => median(image, radius),
            FilterOp::Flip => image.flipv(),
            FilterOp::Flop => image.fliph(),
            FilterOp::Rotate { degrees } => match degrees {
                90 => image.rotate90(),
                180 => image.rotate180(),
                270 => image.rotate270(),
                _ => image.clone(),
            },
            FilterOp::Sharpen { sigma, .. } => image.unsharpen(sigma.max(0.1), 0),
            FilterOp::UnsharpMask {
                sigma, threshold, ..
            } => image.unsharpen(sigma.max(0.1), (threshold * 255.0) as i32),
            FilterOp::Contrast { increase } => {
                image.adjust_contrast(if increase { 10.0 } else { -10.0 })
            }
            FilterOp::Gamma { gamma } => {
                map_channels(image, |v| level(v, 0.0, gamma, 255.0))
            }
            FilterOp::SepiaTone { threshold } => sepia(image, threshold / 100.0),
        };
        artifact.replace_image(filtered);
        Ok(())
    }

    fn flatten(&self, artifact: &mut ImageArtifact, background: Color) {
        let (w, h) = artifact.dimensions();
        let opaque = Color { a: 0xff, ..background };
        let mut base = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba(opaque.to_rgba())));
        imageops::overlay(&mut base, artifact.image(), 0, 0);
        artifact.replace_image(base);
    }

    fn encode(&self, artifact: &ImageArtifact) -> Result<Vec<u8>, TransformError> {
        let encode_err = |e: image::ImageError| TransformError::Encode(e.to_string());
        let mut out = Vec::new();

        match artifact.format() {
            OutputFormat::Jpeg => {
                let rgb = artifact.image().to_rgb8();
                let (width, height) = rgb.dimensions();
                let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
                    return Err(TransformError::TooLarge { width, height });
                };
                let quality = artifact.settings.quality.clamp(MIN_QUALITY, MAX_QUALITY);
                let mut encoder = JpegEncoder::new(&mut out, quality);
                encoder.set_progressive(artifact.settings.progressive);
                encoder
                    .encode(rgb.as_raw(), w, h, ColorType::Rgb)
                    .map_err(|e| TransformError::Encode(e.to_string()))?;
            }
            OutputFormat::Png => {
                let encoder = PngEncoder::new_with_quality(
                    &mut out,
                    CompressionType::Best,
                    PngFilterType::Adaptive,
                );
                artifact
                    .image()
                    .write_with_encoder(encoder)
                    .map_err(encode_err)?;
            }
            OutputFormat::Gif => {
                let mut encoder = GifEncoder::new(&mut out);
                encoder
                    .encode_frame(Frame::new(artifact.image().to_rgba8()))
                    .map_err(encode_err)?;
            }
        }

        Ok(out)
    }
}

// =============================================================================
// Pixel Operations
// =============================================================================

fn map_rgba(image: &DynamicImage, mut f: impl FnMut(&mut Rgba<u8>)) -> DynamicImage {
    let mut buffer = image.to_rgba8();
    for pixel in buffer.pixels_mut() {
        f(pixel);
    }
    DynamicImage::ImageRgba8(buffer)
}

fn map_channels(image: &DynamicImage, f: impl Fn(u8) -> u8) -> DynamicImage {
    let lut: Vec<u8> = (0..=255u8).map(f).collect();
    map_rgba(image, |p| {
        for c in 0..3 {
            p[c] = lut[p[c] as usize];
        }
    })
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn luma(p: &Rgba<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

fn negate(image: &DynamicImage, grey_only: bool) -> DynamicImage {
    map_rgba(image, |p| {
        if !grey_only || (p[0] == p[1] && p[1] == p[2]) {
            for c in 0..3 {
                p[c] = 255 - p[c];
            }
        }
    })
}

fn modulate(image: &DynamicImage, brightness: f32, saturation: f32, hue: f32) -> DynamicImage {
    let b = brightness / 100.0;
    let s = saturation / 100.0;
    let adjusted = map_rgba(image, |p| {
        let l = luma(p);
        for c in 0..3 {
            let saturated = l + (p[c] as f32 - l) * s;
            p[c] = clamp_u8(saturated * b);
        }
    });
    let rotation = ((hue - 100.0) * 1.8).round() as i32;
    if rotation == 0 {
        adjusted
    } else {
        adjusted.huerotate(rotation)
    }
}

fn level(value: u8, black: f32, gamma: f32, white: f32) -> u8 {
    let range = (white - black).max(1.0);
    let normalized = ((value as f32 - black) / range).clamp(0.0, 1.0);
    clamp_u8(normalized.powf(1.0 / gamma.max(0.01)) * 255.0)
}

fn colorize(image: &DynamicImage, color: Color, opacity: f32) -> DynamicImage {
    let tint = [color.r as f32, color.g as f32, color.b as f32];
    map_rgba(image, |p| {
        for c in 0..3 {
            p[c] = clamp_u8(p[c] as f32 * (1.0 - opacity) + tint[c] * opacity);
        }
    })
}

fn sepia(image: &DynamicImage, strength: f32) -> DynamicImage {
    map_rgba(image, |p| {
        let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
        let tone = [
            0.393 * r + 0.769 * g + 0.189 * b,
            0.349 * r + 0.686 * g + 0.168 * b,
            0.272 * r + 0.534 * g + 0.131 * b,
        ];
        for c in 0..3 {
            p[c] = clamp_u8(p[c] as f32 * (1.0 - strength) + tone[c] * strength);
        }
    })
}

fn median(image: &DynamicImage, radius: u32) -> DynamicImage {
    let source = image.to_rgba8();
    let (w, h) = source.dimensions();
    let r = radius as i64;
    let mut out = RgbaImage::new(w, h);
    let mut window: [Vec<u8>; 4] = Default::default();

    for y in 0..h {
        for x in 0..w {
            for channel in window.iter_mut() {
                channel.clear();
            }
            for dy in -r..=r {
                for dx in -r..=r {
                    let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                    let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                    let p = source.get_pixel(sx, sy);
                    for (c, channel) in window.iter_mut().enumerate() {
                        channel.push(p[c]);
                    }
                }
            }
            let mut value = [0u8; 4];
            for (c, channel) in window.iter_mut().enumerate() {
                let mid = channel.len() / 2;
                value[c] = *channel.select_nth_unstable(mid).1;
            }
            out.put_pixel(x, y, Rgba(value));
        }
    }
    DynamicImage::ImageRgba8(out)
}
