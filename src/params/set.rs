//! Request parameters merged with server defaults.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Value};

use super::types::{Alignment, Color, CropMode, CropRect, FilterChain};

// =============================================================================
// Defaults
// =============================================================================

/// Edge length used when a request names neither width, height nor crop rect.
pub const DEFAULT_SIZE: u32 = 100;

/// Default output quality (0-100).
pub const DEFAULT_QUALITY: u8 = 90;

/// Default upper bound for either output dimension.
pub const DEFAULT_MAX_DIMENSION: u32 = 1500;

/// Default upper bound for the source file size (10 MiB).
pub const DEFAULT_MAX_SOURCE_BYTES: u64 = 10 * 1024 * 1024;

/// Server-side defaults and limits applied to every request.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderDefaults {
    pub quality: u8,
    pub crop_mode: CropMode,
    pub align: Alignment,
    pub sharpen: bool,
    pub canvas_color: Color,
    pub canvas_transparent: bool,
    pub filters: String,
    pub progressive: bool,
    pub max_width: u32,
    pub max_height: u32,
    pub max_source_bytes: u64,
    pub png_transparency: bool,
    pub allow_upscale: bool,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            crop_mode: CropMode::OuterFill,
            align: Alignment::center(),
            sharpen: false,
            canvas_color: Color::WHITE,
            canvas_transparent: true,
            filters: String::new(),
            progressive: true,
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            png_transparency: true,
            allow_upscale: true,
        }
    }
}

// =============================================================================
// Parameter Set
// =============================================================================

/// Everything that decides what a thumbnail looks like.
///
/// Built once per request from the query string and [`RenderDefaults`];
/// every field participates in the cache fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    /// Source identifier: local path or remote URL.
    pub src: String,

    /// Requested width, already clamped to `max_width`.
    pub width: Option<u32>,

    /// Requested height, already clamped to `max_height`.
    pub height: Option<u32>,

    pub quality: u8,
    pub align: Alignment,
    pub crop_mode: CropMode,
    pub sharpen: bool,
    pub canvas_color: Color,
    pub canvas_transparent: bool,
    pub crop_rect: Option<CropRect>,
    pub filters: FilterChain,
    pub progressive: bool,
    pub allow_upscale: bool,
    pub png_transparency: bool,
    pub max_width: u32,
    pub max_height: u32,
    pub max_source_bytes: u64,
}

impl ParameterSet {
    /// Build a parameter set from query pairs.
    ///
    /// Later occurrences of a key win; empty values count as absent.
    /// Unparseable values fall back to the defaults.
    pub fn from_pairs<I, K, V>(pairs: I, defaults: &RenderDefaults) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let query: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let get = |key: &str| query.get(key).map(String::as_str);

        let mut width = get("w").and_then(parse_dimension);
        let mut height = get("h").and_then(parse_dimension);
        let crop_rect = get("cr").and_then(CropRect::parse);

        if width.is_none() && height.is_none() && crop_rect.is_none() {
            width = Some(DEFAULT_SIZE);
            height = Some(DEFAULT_SIZE);
        }
        let width = width.map(|w| w.min(defaults.max_width));
        let height = height.map(|h| h.min(defaults.max_height));

        let quality = get("q")
            .and_then(|q| q.parse::<i64>().ok())
            .map(|q| q.unsigned_abs().min(100) as u8)
            .unwrap_or(defaults.quality);

        let crop_mode = get("zc")
            .and_then(|z| z.parse::<i64>().ok())
            .map(CropMode::from_code)
            .unwrap_or(defaults.crop_mode);

        let canvas_color = get("cc")
            .and_then(Color::parse_hex)
            .unwrap_or(defaults.canvas_color);

        Self {
            src: get("src").unwrap_or_default().to_string(),
            width,
            height,
            quality,
            align: get("a")
                .map(Alignment::parse)
                .unwrap_or_else(|| defaults.align.clone()),
            crop_mode,
            sharpen: get("s").map(parse_flag).unwrap_or(defaults.sharpen),
            canvas_color,
            canvas_transparent: get("ct")
                .map(parse_flag)
                .unwrap_or(defaults.canvas_transparent),
            crop_rect,
            filters: FilterChain::parse(get("f").unwrap_or(&defaults.filters)),
            progressive: get("p").map(parse_flag).unwrap_or(defaults.progressive),
            allow_upscale: defaults.allow_upscale,
            png_transparency: defaults.png_transparency,
            max_width: defaults.max_width,
            max_height: defaults.max_height,
            max_source_bytes: defaults.max_source_bytes,
        }
    }

    /// Parameters used to render a fallback or error image.
    ///
    /// Fits the image inside the requested box on a transparent canvas with
    /// no filters. A crop rectangle only contributes its extent as the box.
    pub fn unaltered_fit(&self) -> Self {
        let mut params = self.clone();
        if let Some(rect) = params.crop_rect.take() {
            if params.width.is_none() && params.height.is_none() {
                params.width = Some(rect.width().clamp(1, params.max_width));
                params.height = Some(rect.height().clamp(1, params.max_height));
            }
        }
        params.crop_mode = CropMode::InnerFill;
        params.canvas_transparent = true;
        params.filters.clear();
        params
    }

    /// Rendering-affecting fields in key-sorted order.
    pub fn canonical_fields(&self) -> BTreeMap<&'static str, Value> {
        let mut fields = BTreeMap::new();
        fields.insert("a", json!(self.align.code()));
        fields.insert("cc", json!(self.canvas_color.to_string()));
        fields.insert("cr", json!(self.crop_rect.map(|r| r.to_string())));
        fields.insert("ct", json!(self.canvas_transparent));
        fields.insert("f", json!(self.filters.to_string()));
        fields.insert("h", json!(self.height));
        fields.insert("maxh", json!(self.max_height));
        fields.insert("maxsize", json!(self.max_source_bytes));
        fields.insert("maxw", json!(self.max_width));
        fields.insert("p", json!(self.progressive));
        fields.insert("pngalpha", json!(self.png_transparency));
        fields.insert("q", json!(self.quality));
        fields.insert("s", json!(self.sharpen));
        fields.insert("src", json!(self.src));
        fields.insert("upscale", json!(self.allow_upscale));
        fields.insert("w", json!(self.width));
        fields.insert("zc", json!(self.crop_mode.code()));
        fields
    }

    /// Canonical serialisation fed into the cache fingerprint.
    pub fn canonical_json(&self) -> String {
        Value::Object(
            self.canonical_fields()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
        .to_string()
    }
}

fn parse_dimension(value: &str) -> Option<u32> {
    value
        .parse::<i64>()
        .ok()
        .map(|v| v.unsigned_abs().min(u32::MAX as u64) as u32)
        .filter(|v| *v > 0)
}

/// Interpret a query flag. `0`, `false`, `no` and `off` are false.
pub fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}
