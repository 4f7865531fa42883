//! Lettering height to font size, per comic font.
//!
//! Each family has a linear fit from measured glyph height in pixels to the
//! font size that reproduces it.

/// `(family, slope, intercept)`
const REGRESSIONS: &[(&str, f64, f64)] = &[
    ("Kalam", 1.3887, 2.307),
    ("Komika Jam", 1.1685, 2.8405),
    ("Komika Slim", 1.4908, 2.25),
    ("VTC Letterer Pro", 1.6876, 0.9447),
    ("Bangers Regular", 1.4474, -0.7746),
    ("CC Wild Words", 1.2094, 0.2395),
];

const DEFAULT_REGRESSION: (f64, f64) = (1.2094, 0.2395);

/// Estimated font size in whole pixels, or `None` without a usable height.
pub fn original_font_size(font_family: &str, font_height_px: Option<f32>) -> Option<f32> {
    let height = font_height_px.filter(|height| *height != 0.0 && height.is_finite())? as f64;
    let (slope, intercept) = REGRESSIONS
        .iter()
        .find(|(family, _, _)| *family == font_family)
        .map(|(_, slope, intercept)| (*slope, *intercept))
        .unwrap_or(DEFAULT_REGRESSION);
    Some((slope * height + intercept).trunc() as f32)
}
