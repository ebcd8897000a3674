//! Image engine capability.
//!
//! The pipeline only talks to an [`ImageEngine`]; the concrete raster
//! backend lives in [`super::raster`].

use image::{DynamicImage, GenericImageView};

use super::filters::FilterOp;
use crate::error::TransformError;
use crate::params::Color;

/// Minimum encoder quality.
pub const MIN_QUALITY: u8 = 1;

/// Maximum encoder quality.
pub const MAX_QUALITY: u8 = 100;

// =============================================================================
// Output Format
// =============================================================================

/// Encoded output format. Follows the source format where the engine can
/// write it, otherwise PNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Gif,
}

impl OutputFormat {
    pub fn from_mime(mime: &str) -> Self {
        match mime.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => OutputFormat::Jpeg,
            "image/gif" => OutputFormat::Gif,
            _ => OutputFormat::Png,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Gif => "image/gif",
        }
    }

    /// Whether the format can carry transparency.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, OutputFormat::Jpeg)
    }
}

// =============================================================================
// Image Artifact
// =============================================================================

/// Encoder settings attached to an artifact before it is written out.
///
/// Encoders never copy source metadata, so EXIF and ICC data is always
/// stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub quality: u8,
    /// Progressive scans. JPEG only.
    pub progressive: bool,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            quality: crate::params::DEFAULT_QUALITY,
            progressive: false,
        }
    }
}

/// A decoded image plus the format and settings it will be encoded with.
///
/// Owned by exactly one pipeline run; never shared between requests.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    image: DynamicImage,
    format: OutputFormat,
    pub settings: EncodeSettings,
}

impl ImageArtifact {
    pub fn new(image: DynamicImage, format: OutputFormat) -> Self {
        Self {
            image,
            format,
            settings: EncodeSettings::default(),
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut DynamicImage {
        &mut self.image
    }

    /// Swap in new pixels, keeping format and settings.
    pub fn replace_image(&mut self, image: DynamicImage) {
        self.image = image;
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }
}

// =============================================================================
// Engine Capability
// =============================================================================

/// Operations the transform pipeline needs from an image backend.
///
/// Implementations must be thread-safe; each call works on a
/// request-owned [`ImageArtifact`].
pub trait ImageEngine: Send + Sync {
    /// Engine identifier for diagnostics headers.
    fn name(&self) -> &str;

    /// Decode encoded bytes. `format` is the output format to carry.
    fn decode(&self, data: &[u8], format: OutputFormat) -> Result<ImageArtifact, TransformError>;

    /// A new solid canvas. Fails when the engine refuses the allocation.
    fn canvas(
        &self,
        width: u32,
        height: u32,
        fill: Color,
        format: OutputFormat,
    ) -> Result<ImageArtifact, TransformError>;

    /// Resample to exactly `width` × `height`.
    fn resize(
        &self,
        artifact: &mut ImageArtifact,
        width: u32,
        height: u32,
        sharpen: bool,
    ) -> Result<(), TransformError>;

    /// Keep only the given region.
    fn crop(
        &self,
        artifact: &mut ImageArtifact,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<(), TransformError>;

    /// Draw `overlay` onto `canvas` with its top-left corner at `(x, y)`.
    fn composite(&self, canvas: &mut ImageArtifact, overlay: &ImageArtifact, x: i64, y: i64);

    fn apply_filter(&self, artifact: &mut ImageArtifact, op: &FilterOp)
        -> Result<(), TransformError>;

    /// Remove transparency by compositing onto an opaque background.
    fn flatten(&self, artifact: &mut ImageArtifact, background: Color);

    /// Encode with the artifact's settings. GIF output always carries a
    /// logical screen equal to the final frame size.
    fn encode(&self, artifact: &ImageArtifact) -> Result<Vec<u8>, TransformError>;
}
