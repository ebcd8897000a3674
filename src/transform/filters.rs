//! Filter resolution.
//!
//! A filter invocation is either a legacy numeric id (`2`, `3,20`) or one of
//! a closed set of named engine operations (`colorizeImage,#ff0000,0.5`).
//! Both resolve to a typed [`FilterOp`]; anything else is rejected with
//! [`FilterError::UnknownFilter`].
//!
//! # Legacy ids
//!
//! ```text
//! id  operation            default args     argument rewrite
//! 1   negate               0
//! 2   greyscale            100,0,100        (modulate)
//! 3   brightness           100,100,100      arg0 += 100
//! 4   contrast             0,1,0            arg0 -> (0, gamma)
//! 5   colorize             #FF0000,1        r,g,b,a -> (#rrggbb, a/128)
//! 6   edge detect          0.001
//! 7   emboss               0,0.5
//! 8   gaussian blur        0,0.5
//! 9   selective blur       0,0.5
//! 10  sketch               15,10,45
//! 11  smooth (median)      2
//! ```
//!
//! Supplied arguments override the defaults position by position.

use crate::error::FilterError;
use crate::params::{Color, FilterChain, FilterInvocation};

// =============================================================================
// Filter Operations
// =============================================================================

/// A fully resolved filter with typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Negate { grey_only: bool },
    /// Percentages; 100 leaves the channel unchanged.
    Modulate { brightness: f32, saturation: f32, hue: f32 },
    /// `black`/`white` are 8-bit levels; `None` white means full range.
    Level { black: f32, gamma: f32, white: Option<f32> },
    Colorize { color: Color, opacity: f32 },
    Edge { radius: f32 },
    Emboss { radius: f32, sigma: f32 },
    GaussianBlur { radius: f32, sigma: f32 },
    Blur { radius: f32, sigma: f32 },
    Sketch { radius: f32, sigma: f32, angle: f32 },
    Median { radius: u32 },
    Flip,
    Flop,
    /// Multiple of 90.
    Rotate { degrees: i32 },
    Sharpen { radius: f32, sigma: f32 },
    UnsharpMask { radius: f32, sigma: f32, amount: f32, threshold: f32 },
    Contrast { increase: bool },
    Gamma { gamma: f32 },
    /// Percentage 0-100.
    SepiaTone { threshold: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NamedFilter {
    Negate,
    Modulate,
    Level,
    Colorize,
    Edge,
    Emboss,
    GaussianBlur,
    Blur,
    Sketch,
    MedianFilter,
    Flip,
    Flop,
    Rotate,
    Sharpen,
    UnsharpMask,
    Contrast,
    Gamma,
    SepiaTone,
}

const NAMED_FILTERS: &[(&str, NamedFilter)] = &[
    ("negateImage", NamedFilter::Negate),
    ("modulateImage", NamedFilter::Modulate),
    ("levelImage", NamedFilter::Level),
    ("colorizeImage", NamedFilter::Colorize),
    ("edgeImage", NamedFilter::Edge),
    ("embossImage", NamedFilter::Emboss),
    ("gaussianBlurImage", NamedFilter::GaussianBlur),
    ("blurImage", NamedFilter::Blur),
    ("sketchImage", NamedFilter::Sketch),
    ("medianFilterImage", NamedFilter::MedianFilter),
    ("flipImage", NamedFilter::Flip),
    ("flopImage", NamedFilter::Flop),
    ("rotateImage", NamedFilter::Rotate),
    ("sharpenImage", NamedFilter::Sharpen),
    ("unsharpMaskImage", NamedFilter::UnsharpMask),
    ("contrastImage", NamedFilter::Contrast),
    ("gammaImage", NamedFilter::Gamma),
    ("sepiaToneImage", NamedFilter::SepiaTone),
];

/// Largest median radius accepted; the window grows quadratically.
const MAX_MEDIAN_RADIUS: u32 = 5;

impl NamedFilter {
    fn from_name(name: &str) -> Option<Self> {
        NAMED_FILTERS
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, f)| *f)
    }

    fn defaults(self) -> &'static [&'static str] {
        match self {
            NamedFilter::Negate => &["0"],
            NamedFilter::Modulate => &["100", "100", "100"],
            NamedFilter::Level => &["0", "1", "0"],
            NamedFilter::Colorize => &["#FF0000", "1"],
            NamedFilter::Edge => &["1"],
            NamedFilter::Emboss => &["0", "1"],
            NamedFilter::GaussianBlur | NamedFilter::Blur => &["0", "1"],
            NamedFilter::Sketch => &["15", "10", "45"],
            NamedFilter::MedianFilter => &["1"],
            NamedFilter::Flip | NamedFilter::Flop => &[],
            NamedFilter::Rotate => &["90"],
            NamedFilter::Sharpen => &["0", "1"],
            NamedFilter::UnsharpMask => &["0", "1", "1", "0.05"],
            NamedFilter::Contrast => &["1"],
            NamedFilter::Gamma => &["1"],
            NamedFilter::SepiaTone => &["80"],
        }
    }

    fn build(self, name: &str, args: &[String]) -> Result<FilterOp, FilterError> {
        let num = |i: usize| parse_number(name, args, i);

        let op = match self {
            NamedFilter::Negate => FilterOp::Negate {
                grey_only: num(0)? != 0.0,
            },
            NamedFilter::Modulate => FilterOp::Modulate {
                brightness: num(0)?,
                saturation: num(1)?,
                hue: num(2)?,
            },
            NamedFilter::Level => {
                let white = num(2)?;
                FilterOp::Level {
                    black: num(0)?,
                    gamma: num(1)?,
                    white: (white > 0.0).then_some(white),
                }
            }
            NamedFilter::Colorize => {
                let raw = args.first().map(String::as_str).unwrap_or_default();
                let color = Color::parse_hex(raw).ok_or_else(|| FilterError::InvalidArgument {
                    filter: name.to_string(),
                    message: format!("invalid colour {:?}", raw),
                })?;
                FilterOp::Colorize {
                    color,
                    opacity: num(1)?.clamp(0.0, 1.0),
                }
            }
            NamedFilter::Edge => FilterOp::Edge { radius: num(0)? },
            NamedFilter::Emboss => FilterOp::Emboss {
                radius: num(0)?,
                sigma: num(1)?,
            },
            NamedFilter::GaussianBlur => FilterOp::GaussianBlur {
                radius: num(0)?,
                sigma: num(1)?,
            },
            NamedFilter::Blur => FilterOp::Blur {
                radius: num(0)?,
                sigma: num(1)?,
            },
            NamedFilter::Sketch => FilterOp::Sketch {
                radius: num(0)?,
                sigma: num(1)?,
                angle: num(2)?,
            },
            NamedFilter::MedianFilter => FilterOp::Median {
                radius: (num(0)?.round().max(1.0) as u32).min(MAX_MEDIAN_RADIUS),
            },
            NamedFilter::Flip => FilterOp::Flip,
            NamedFilter::Flop => FilterOp::Flop,
            NamedFilter::Rotate => {
                let degrees = num(0)?;
                if degrees.fract() != 0.0 || (degrees as i32) % 90 != 0 {
                    return Err(FilterError::InvalidArgument {
                        filter: name.to_string(),
                        message: "rotation must be a multiple of 90 degrees".to_string(),
                    });
                }
                FilterOp::Rotate {
                    degrees: (degrees as i32).rem_euclid(360),
                }
            }
            NamedFilter::Sharpen => FilterOp::Sharpen {
                radius: num(0)?,
                sigma: num(1)?,
            },
            NamedFilter::UnsharpMask => FilterOp::UnsharpMask {
                radius: num(0)?,
                sigma: num(1)?,
                amount: num(2)?,
                threshold: num(3)?,
            },
            NamedFilter::Contrast => FilterOp::Contrast {
                increase: num(0)? != 0.0,
            },
            NamedFilter::Gamma => FilterOp::Gamma { gamma: num(0)? },
            NamedFilter::SepiaTone => FilterOp::SepiaTone {
                threshold: num(0)?.clamp(0.0, 100.0),
            },
        };
        Ok(op)
    }
}

// =============================================================================
// Legacy Table
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum ArgRewrite {
    None,
    Brightness,
    Contrast,
    Colorize,
}

struct LegacyFilter {
    id: u8,
    filter: NamedFilter,
    defaults: &'static [&'static str],
    rewrite: ArgRewrite,
}

const LEGACY_FILTERS: &[LegacyFilter] = &[
    LegacyFilter { id: 1, filter: NamedFilter::Negate, defaults: &["0"], rewrite: ArgRewrite::None },
    LegacyFilter { id: 2, filter: NamedFilter::Modulate, defaults: &["100", "0", "100"], rewrite: ArgRewrite::None },
    LegacyFilter { id: 3, filter: NamedFilter::Modulate, defaults: &["100", "100", "100"], rewrite: ArgRewrite::Brightness },
    LegacyFilter { id: 4, filter: NamedFilter::Level, defaults: &["0", "1", "0"], rewrite: ArgRewrite::Contrast },
    LegacyFilter { id: 5, filter: NamedFilter::Colorize, defaults: &["#FF0000", "1"], rewrite: ArgRewrite::Colorize },
    LegacyFilter { id: 6, filter: NamedFilter::Edge, defaults: &["0.001"], rewrite: ArgRewrite::None },
    LegacyFilter { id: 7, filter: NamedFilter::Emboss, defaults: &["0", "0.5"], rewrite: ArgRewrite::None },
    LegacyFilter { id: 8, filter: NamedFilter::GaussianBlur, defaults: &["0", "0.5"], rewrite: ArgRewrite::None },
    LegacyFilter { id: 9, filter: NamedFilter::Blur, defaults: &["0", "0.5"], rewrite: ArgRewrite::None },
    LegacyFilter { id: 10, filter: NamedFilter::Sketch, defaults: &["15", "10", "45"], rewrite: ArgRewrite::None },
    LegacyFilter { id: 11, filter: NamedFilter::MedianFilter, defaults: &["2"], rewrite: ArgRewrite::None },
];

impl ArgRewrite {
    fn apply(self, name: &str, args: &[String]) -> Result<Vec<String>, FilterError> {
        if args.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = args.to_vec();
        match self {
            ArgRewrite::None => {}
            ArgRewrite::Brightness => {
                args[0] = (parse_number(name, &args, 0)? + 100.0).to_string();
            }
            ArgRewrite::Contrast => {
                let value = parse_number(name, &args, 0)?;
                let gamma = if value <= 0.0 { value / 100.0 + 1.0 } else { value };
                args[0] = "0".to_string();
                if args.len() < 2 {
                    args.push(String::new());
                }
                args[1] = gamma.to_string();
            }
            ArgRewrite::Colorize => {
                let channel = |i: usize| -> Result<u8, FilterError> {
                    match args.get(i) {
                        Some(_) => Ok(parse_number(name, &args, i)?.clamp(0.0, 255.0) as u8),
                        None => Ok(0),
                    }
                };
                let color = format!("#{:02x}{:02x}{:02x}", channel(0)?, channel(1)?, channel(2)?);
                let alpha = match args.get(3) {
                    Some(_) => parse_number(name, &args, 3)?,
                    None => 0.0,
                };
                args = vec![color, (alpha / 128.0).to_string()];
            }
        }
        Ok(args)
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolve a single invocation.
pub fn resolve_filter(invocation: &FilterInvocation) -> Result<FilterOp, FilterError> {
    let name = invocation.name.as_str();

    if let Ok(id) = name.parse::<u8>() {
        let legacy = LEGACY_FILTERS
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| FilterError::UnknownFilter(name.to_string()))?;
        let args = legacy.rewrite.apply(name, &invocation.args)?;
        let merged = merge_args(&args, legacy.defaults);
        return legacy.filter.build(name, &merged);
    }

    let filter =
        NamedFilter::from_name(name).ok_or_else(|| FilterError::UnknownFilter(name.to_string()))?;
    let merged = merge_args(&invocation.args, filter.defaults());
    filter.build(name, &merged)
}

/// Resolve a whole chain, preserving order.
pub fn resolve_chain(chain: &FilterChain) -> Result<Vec<FilterOp>, FilterError> {
    chain.iter().map(resolve_filter).collect()
}

fn merge_args(args: &[String], defaults: &[&str]) -> Vec<String> {
    let len = args.len().max(defaults.len());
    (0..len)
        .map(|i| match args.get(i).filter(|a| !a.is_empty()) {
            Some(arg) => arg.clone(),
            None => defaults.get(i).copied().unwrap_or_default().to_string(),
        })
        .collect()
}

fn parse_number(name: &str, args: &[String], index: usize) -> Result<f32, FilterError> {
    let raw = args.get(index).map(String::as_str).unwrap_or("0");
    raw.trim()
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FilterError::InvalidArgument {
            filter: name.to_string(),
            message: format!("argument {} is not a number: {:?}", index + 1, raw),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(spec: &str) -> Result<FilterOp, FilterError> {
        let chain = FilterChain::parse(spec);
        let invocation = chain.iter().next().unwrap();
        resolve_filter(invocation)
    }

    #[test]
    fn test_legacy_negate_and_greyscale() {
        assert_eq!(resolve("1").unwrap(), FilterOp::Negate { grey_only: false });
        assert_eq!(
            resolve("2").unwrap(),
            FilterOp::Modulate {
                brightness: 100.0,
                saturation: 0.0,
                hue: 100.0
            }
        );
    }

    #[test]
    fn test_legacy_brightness_offsets_first_argument() {
        assert_eq!(
            resolve("3,20").unwrap(),
            FilterOp::Modulate {
                brightness: 120.0,
                saturation: 100.0,
                hue: 100.0
            }
        );
        assert_eq!(
            resolve("3").unwrap(),
            FilterOp::Modulate {
                brightness: 100.0,
                saturation: 100.0,
                hue: 100.0
            }
        );
    }

    #[test]
    fn test_legacy_contrast_maps_to_gamma() {
        assert_eq!(
            resolve("4,-50").unwrap(),
            FilterOp::Level {
                black: 0.0,
                gamma: 0.5,
                white: None
            }
        );
        assert_eq!(
            resolve("4,2").unwrap(),
            FilterOp::Level {
                black: 0.0,
                gamma: 2.0,
                white: None
            }
        );
    }

    #[test]
    fn test_legacy_colorize_packs_rgb() {
        assert_eq!(
            resolve("5,255,0,128,64").unwrap(),
            FilterOp::Colorize {
                color: Color::rgb(255, 0, 128),
                opacity: 0.5
            }
        );
        assert_eq!(
            resolve("5").unwrap(),
            FilterOp::Colorize {
                color: Color::rgb(255, 0, 0),
                opacity: 1.0
            }
        );
    }

    #[test]
    fn test_legacy_defaults_fill_missing_positions() {
        assert_eq!(
            resolve("8,2").unwrap(),
            FilterOp::GaussianBlur {
                radius: 2.0,
                sigma: 0.5
            }
        );
        assert_eq!(resolve("11").unwrap(), FilterOp::Median { radius: 2 });
        assert_eq!(
            resolve("10").unwrap(),
            FilterOp::Sketch {
                radius: 15.0,
                sigma: 10.0,
                angle: 45.0
            }
        );
    }

    #[test]
    fn test_unknown_legacy_id() {
        assert_eq!(resolve("99"), Err(FilterError::UnknownFilter("99".into())));
        assert_eq!(resolve("0"), Err(FilterError::UnknownFilter("0".into())));
    }

    #[test]
    fn test_named_filters() {
        assert_eq!(
            resolve("colorizeImage,#00ff00,0.25").unwrap(),
            FilterOp::Colorize {
                color: Color::rgb(0, 255, 0),
                opacity: 0.25
            }
        );
        assert_eq!(resolve("flopImage").unwrap(), FilterOp::Flop);
        assert_eq!(resolve("ROTATEIMAGE,-90").unwrap(), FilterOp::Rotate { degrees: 270 });
        assert_eq!(resolve("gammaImage,2.2").unwrap(), FilterOp::Gamma { gamma: 2.2 });
    }

    #[test]
    fn test_unknown_named_filter_rejected() {
        assert!(matches!(
            resolve("evalImage,1"),
            Err(FilterError::UnknownFilter(name)) if name == "evalImage"
        ));
        assert!(matches!(resolve("readImage"), Err(FilterError::UnknownFilter(_))));
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        assert!(matches!(resolve("3,bright"), Err(FilterError::InvalidArgument { .. })));
        assert!(matches!(
            resolve("colorizeImage,purple"),
            Err(FilterError::InvalidArgument { .. })
        ));
        assert!(matches!(
            resolve("rotateImage,45"),
            Err(FilterError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_resolve_chain_stops_at_first_error() {
        let chain = FilterChain::parse("1|bogus|2");
        assert!(resolve_chain(&chain).is_err());

        let chain = FilterChain::parse("1|2|flipImage");
        let ops = resolve_chain(&chain).unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[2], FilterOp::Flip);
    }
}
