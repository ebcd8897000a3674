//! The transform pipeline.
//!
//! ```text
//! decoded source
//!   │ 1. pre-crop       explicit crop rect, padded with the canvas colour
//!   │ 2. target size    derive missing dimension, apply limits
//!   │ 3. crop mode      exact / cover+crop / fit+pad / fit
//!   │ 4. filters        in request order
//!   │ 5. finalise       alpha handling, progressive JPEG
//!   │ 6. compress       quality
//!   ▼
//! encoded bytes
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::engine::{ImageArtifact, ImageEngine, OutputFormat};
use super::filters::resolve_chain;
use super::geometry::{
    align_offset, centered_offset, clamp_size, cover_size, crop_placement, fit_size, target_size,
};
use crate::error::TransformError;
use crate::params::{Color, CropMode, CropRect, ParameterSet};

/// An encoded thumbnail.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub data: Bytes,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Runs a decoded artifact through crop, resize, filters and encoding.
#[derive(Clone)]
pub struct TransformPipeline {
    engine: Arc<dyn ImageEngine>,
}

impl TransformPipeline {
    pub fn new(engine: Arc<dyn ImageEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn ImageEngine> {
        &self.engine
    }

    /// Render `artifact` according to `params`.
    ///
    /// Filters are resolved before any pixel work so an invalid chain fails
    /// fast.
    pub fn render(
        &self,
        mut artifact: ImageArtifact,
        params: &ParameterSet,
    ) -> Result<RenderedImage, TransformError> {
        let filters = resolve_chain(&params.filters)?;

        if let Some(rect) = &params.crop_rect {
            self.pre_crop(&mut artifact, rect, params)?;
        }

        let target = self.resolve_target(&artifact, params);
        self.apply_crop_mode(&mut artifact, target, params)?;

        for op in &filters {
            self.engine.apply_filter(&mut artifact, op)?;
        }

        self.finalize(&mut artifact, params);
        compress(&mut artifact, params);

        let data = self.engine.encode(&artifact)?;
        let (width, height) = artifact.dimensions();
        debug!(
            width,
            height,
            bytes = data.len(),
            format = artifact.format().mime_type(),
            "Rendered thumbnail"
        );

        Ok(RenderedImage {
            data: Bytes::from(data),
            mime_type: artifact.format().mime_type(),
            width,
            height,
        })
    }

    fn pre_crop(
        &self,
        artifact: &mut ImageArtifact,
        rect: &CropRect,
        params: &ParameterSet,
    ) -> Result<(), TransformError> {
        let source = artifact.dimensions();
        let placement = crop_placement(rect, source);

        // Padding may grow the image past the source, but never past the
        // output limits.
        let (limit_w, limit_h) = (source.0.max(params.max_width), source.1.max(params.max_height));
        let (canvas_w, canvas_h) = placement.canvas;
        if canvas_w > limit_w || canvas_h > limit_h {
            return Err(TransformError::TooLarge {
                width: canvas_w,
                height: canvas_h,
            });
        }

        if placement.is_inside_source() {
            if let Some(region) = placement.region {
                return self
                    .engine
                    .crop(artifact, region.x, region.y, region.width, region.height);
            }
        }

        let format = artifact.format();
        let fill = canvas_fill(params, format);
        let mut canvas = self.engine.canvas(canvas_w, canvas_h, fill, format)?;
        if let Some(region) = placement.region {
            let mut piece = artifact.clone();
            self.engine
                .crop(&mut piece, region.x, region.y, region.width, region.height)?;
            self.engine
                .composite(&mut canvas, &piece, region.dest_x, region.dest_y);
        }
        canvas.settings = artifact.settings.clone();
        *artifact = canvas;
        Ok(())
    }

    fn resolve_target(&self, artifact: &ImageArtifact, params: &ParameterSet) -> (u32, u32) {
        let source = artifact.dimensions();
        let target = target_size((params.width, params.height), source);
        let target = clamp_size(target, (params.max_width, params.max_height));
        if params.allow_upscale {
            target
        } else {
            clamp_size(target, source)
        }
    }

    fn apply_crop_mode(
        &self,
        artifact: &mut ImageArtifact,
        target: (u32, u32),
        params: &ParameterSet,
    ) -> Result<(), TransformError> {
        let (tw, th) = target;
        match params.crop_mode {
            CropMode::Exact => self.engine.resize(artifact, tw, th, params.sharpen),
            CropMode::InnerFit => {
                let (w, h) = fit_size(artifact.dimensions(), target);
                self.engine.resize(artifact, w, h, params.sharpen)
            }
            CropMode::InnerFill => {
                let (w, h) = fit_size(artifact.dimensions(), target);
                self.engine.resize(artifact, w, h, params.sharpen)?;

                let format = artifact.format();
                let mut canvas = self
                    .engine
                    .canvas(tw, th, canvas_fill(params, format), format)?;
                let (x, y) = centered_offset((w, h), target);
                self.engine.composite(&mut canvas, artifact, x, y);
                canvas.settings = artifact.settings.clone();
                *artifact = canvas;
                Ok(())
            }
            CropMode::OuterFill => {
                let scaled = cover_size(artifact.dimensions(), target);
                self.engine
                    .resize(artifact, scaled.0, scaled.1, params.sharpen)?;
                let (x, y) = align_offset(&params.align, scaled, target);
                self.engine.crop(artifact, x, y, tw, th)
            }
        }
    }

    fn finalize(&self, artifact: &mut ImageArtifact, params: &ParameterSet) {
        artifact.settings.progressive =
            artifact.format() == OutputFormat::Jpeg && params.progressive;

        let keep_alpha = artifact.format().supports_alpha() && params.png_transparency;
        if !keep_alpha {
            self.engine.flatten(artifact, params.canvas_color);
        }
    }
}

fn compress(artifact: &mut ImageArtifact, params: &ParameterSet) {
    artifact.settings.quality = params.quality;
}

/// Background for padding: transparent when requested and representable.
fn canvas_fill(params: &ParameterSet, format: OutputFormat) -> Color {
    if params.canvas_transparent && format.supports_alpha() {
        Color::transparent()
    } else {
        params.canvas_color
    }
}
