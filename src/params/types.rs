//! Typed values carried by a [`ParameterSet`](super::ParameterSet).

use std::fmt;

// =============================================================================
// Crop Mode
// =============================================================================

/// How the source is fitted into the target box (`zc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CropMode {
    /// 0: stretch to exactly width × height.
    Exact,
    /// 1: scale to cover the box, then crop the overflow.
    #[default]
    OuterFill,
    /// 2: scale to fit inside the box and pad with the canvas colour.
    InnerFill,
    /// 3: scale to fit inside the box; output may be smaller.
    InnerFit,
}

impl CropMode {
    /// Map a numeric code onto a mode. Unknown codes select `Exact`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => CropMode::OuterFill,
            2 => CropMode::InnerFill,
            3 => CropMode::InnerFit,
            _ => CropMode::Exact,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            CropMode::Exact => 0,
            CropMode::OuterFill => 1,
            CropMode::InnerFill => 2,
            CropMode::InnerFit => 3,
        }
    }
}

// =============================================================================
// Alignment
// =============================================================================

/// Placement along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisAlign {
    Start,
    Center,
    End,
}

/// Anchor used when cropping the overflow of a cover resize (`a`).
///
/// Parsed from any combination of `t`, `b`, `l`, `r`; `c`, empty or
/// unrecognised input centres both axes. Contradicting letters on the same
/// axis (`tb`) centre that axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Alignment {
    code: String,
    pub horizontal: AxisAlign,
    pub vertical: AxisAlign,
}

impl Alignment {
    pub fn parse(code: &str) -> Self {
        let code = code.trim().to_ascii_lowercase();
        let has = |c: char| code.contains(c);

        let horizontal = match (has('l'), has('r')) {
            (true, false) => AxisAlign::Start,
            (false, true) => AxisAlign::End,
            _ => AxisAlign::Center,
        };
        let vertical = match (has('t'), has('b')) {
            (true, false) => AxisAlign::Start,
            (false, true) => AxisAlign::End,
            _ => AxisAlign::Center,
        };

        let code = if code.is_empty() { "c".to_string() } else { code };
        Self {
            code,
            horizontal,
            vertical,
        }
    }

    pub fn center() -> Self {
        Self::parse("c")
    }

    /// The code as supplied (lowercased), used in cache keys and filenames.
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl Default for Alignment {
    fn default() -> Self {
        Self::center()
    }
}

// =============================================================================
// Crop Rectangle
// =============================================================================

/// Explicit source sub-rectangle (`cr=x0,y0,x1,y1`).
///
/// Corners may be given in any order; coordinates outside the source are
/// allowed and padded with the canvas colour during the pre-crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CropRect {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl CropRect {
    /// Parse four comma separated integers. Anything else yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let parts: Vec<i64> = value
            .split(',')
            .map(|p| p.trim().parse::<i64>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [x0, y0, x1, y1] => Some(Self {
                x0: *x0,
                y0: *y0,
                x1: *x1,
                y1: *y1,
            }),
            _ => None,
        }
    }

    pub fn left(&self) -> i64 {
        self.x0.min(self.x1)
    }

    pub fn top(&self) -> i64 {
        self.y0.min(self.y1)
    }

    pub fn width(&self) -> u32 {
        self.x0.abs_diff(self.x1).min(u32::MAX as u64) as u32
    }

    pub fn height(&self) -> u32 {
        self.y0.abs_diff(self.y1).min(u32::MAX as u64) as u32
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x0, self.y0, self.x1, self.y1)
    }
}

// =============================================================================
// Canvas Colour
// =============================================================================

/// An RGBA colour given as hex (`fff`, `ffffff`, `ffffff80`, optional `#`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(0xff, 0xff, 0xff);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xff }
    }

    pub fn parse_hex(value: &str) -> Option<Self> {
        let hex = value.trim().trim_start_matches('#');
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let byte = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            3 => {
                let expand = |i: usize| byte(&hex[i..i + 1].repeat(2));
                Some(Self::rgb(expand(0)?, expand(1)?, expand(2)?))
            }
            6 => Some(Self::rgb(byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?)),
            8 => Some(Self {
                r: byte(&hex[0..2])?,
                g: byte(&hex[2..4])?,
                b: byte(&hex[4..6])?,
                a: byte(&hex[6..8])?,
            }),
            _ => None,
        }
    }

    pub fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn transparent() -> Self {
        Self {
            r: 0,
            g: 0,
            b: 0,
            a: 0,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 0xff {
            write!(f, "{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

// =============================================================================
// Filter Chain
// =============================================================================

/// One `name,arg,arg` segment of the `f` parameter, unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterInvocation {
    pub name: String,
    pub args: Vec<String>,
}

/// The parsed `f` parameter: `|`-separated invocations, applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FilterChain {
    invocations: Vec<FilterInvocation>,
}

impl FilterChain {
    pub fn parse(value: &str) -> Self {
        let invocations = value
            .split('|')
            .filter_map(|segment| {
                let mut parts = segment.split(',').map(|p| p.trim().to_string());
                let name = parts.next().filter(|n| !n.is_empty())?;
                Some(FilterInvocation {
                    name,
                    args: parts.collect(),
                })
            })
            .collect();
        Self { invocations }
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterInvocation> {
        self.invocations.iter()
    }

    pub fn clear(&mut self) {
        self.invocations.clear();
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, inv) in self.invocations.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(&inv.name)?;
            for arg in &inv.args {
                write!(f, ",{}", arg)?;
            }
        }
        Ok(())
    }
}
