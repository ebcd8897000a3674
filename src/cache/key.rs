//! Cache file naming.
//!
//! The default name is `prefix + sha256(salt ‖ canonical params ‖ version) +
//! suffix`. An optional template replaces the hash with readable
//! placeholders:
//!
//! | Placeholder  | Value                                  |
//! |--------------|----------------------------------------|
//! | `%filename%` | source file stem                       |
//! | `%ext%`      | source extension                       |
//! | `%w%` `%h%`  | requested width/height (`0` if unset)  |
//! | `%q%`        | quality                                |
//! | `%a%`        | alignment code                         |
//! | `%zc%`       | crop mode code                         |
//! | `%s%`        | `s` when sharpening, else empty        |
//! | `%cc%`       | canvas colour hex                      |
//! | `%ct%`       | `t` when canvas is transparent         |
//! | `%cr%`       | crop rect `x0,y0,x1,y1` or empty       |
//! | `%filters%`  | filter chain                           |
//! | `%pjpg%`     | `p` when progressive                   |
//! | `%upscale%`  | empty, or `nu` when upscaling is off   |

use sha2::{Digest, Sha256};

use crate::params::ParameterSet;

/// Mixed into every fingerprint; bump to invalidate all cache entries.
pub const CACHE_KEY_VERSION: &str = "1.1";

/// Hex SHA-256 fingerprint of a parameter set.
pub fn fingerprint(params: &ParameterSet, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(params.canonical_json().as_bytes());
    hasher.update(CACHE_KEY_VERSION.as_bytes());
    hex::encode(hasher.finalize())
}

/// Expand a filename template for the given parameters.
///
/// Substituted values are sanitised so a template can never produce a path
/// separator or a parent-directory component.
pub fn expand_template(template: &str, params: &ParameterSet) -> String {
    let (stem, ext) = split_source_name(&params.src);
    let flag = |on: bool, v: &str| if on { v.to_string() } else { String::new() };

    let replacements: [(&str, String); 14] = [
        ("%filename%", stem),
        ("%ext%", ext),
        ("%w%", params.width.unwrap_or(0).to_string()),
        ("%h%", params.height.unwrap_or(0).to_string()),
        ("%q%", params.quality.to_string()),
        ("%a%", params.align.code().to_string()),
        ("%zc%", params.crop_mode.code().to_string()),
        ("%s%", flag(params.sharpen, "s")),
        ("%cc%", params.canvas_color.to_string()),
        ("%ct%", flag(params.canvas_transparent, "t")),
        ("%cr%", params.crop_rect.map(|r| r.to_string()).unwrap_or_default()),
        ("%filters%", params.filters.to_string()),
        ("%pjpg%", flag(params.progressive, "p")),
        ("%upscale%", flag(!params.allow_upscale, "nu")),
    ];

    let mut name = template.to_string();
    for (placeholder, value) in replacements {
        name = name.replace(placeholder, &sanitize(&value));
    }
    let name = sanitize(&name);
    if name.trim_matches('.').is_empty() {
        "_".to_string()
    } else {
        name
    }
}

fn split_source_name(src: &str) -> (String, String) {
    let without_query = src.split(['?', '#']).next().unwrap_or_default();
    let base = without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), ext.to_string()),
        _ => (base.to_string(), String::new()),
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ',') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .replace("..", "_")
}
