//! Auto-sizing of translated text into its box.
//!
//! Every box starts at its estimated font size (at least the floor). Each
//! round, overflowing boxes above the floor shrink by one pixel; boxes at the
//! floor grow by one pixel per side instead, up to [`MAX_GROW_STEPS`] times.

use super::font::{FontMetrics, measure_text_width_px};
use super::wrap::{LINE_HEIGHT, widest_token, wrap_text};

pub const MIN_FONT_SIZE_PX: f32 = 14.0;
pub const MAX_FIT_ROUNDS: usize = 1000;
pub const MAX_GROW_STEPS: usize = 20;
/// Added to both dimensions after fitting so glyph overhang is not clipped.
pub const FIT_PADDING_PX: f32 = 10.0;

/// Answers whether text set at a font size overflows a box.
pub trait TextMeasure: Sync {
    fn overflows(&self, text: &str, font_size_px: f32, width: f32, height: f32) -> bool;
}

impl<F> TextMeasure for F
where
    F: Fn(&str, f32, f32, f32) -> bool + Sync,
{
    fn overflows(&self, text: &str, font_size_px: f32, width: f32, height: f32) -> bool {
        self(text, font_size_px, width, height)
    }
}

/// Measures with glyph advances when a font is loaded, else by estimate.
pub struct GlyphMeasure<'a> {
    font: Option<&'a FontMetrics>,
}

impl<'a> GlyphMeasure<'a> {
    pub fn new(font: Option<&'a FontMetrics>) -> Self {
        Self { font }
    }

    pub fn lines(&self, text: &str, font_size_px: f32, width: f32) -> Vec<String> {
        let width_of = |value: &str| measure_text_width_px(value, font_size_px, self.font);
        wrap_text(text, width, &width_of)
    }
}

impl TextMeasure for GlyphMeasure<'_> {
    fn overflows(&self, text: &str, font_size_px: f32, width: f32, height: f32) -> bool {
        let width_of = |value: &str| measure_text_width_px(value, font_size_px, self.font);
        if widest_token(text, &width_of) > width {
            return true;
        }
        let lines = wrap_text(text, width, &width_of).len();
        lines as f32 * font_size_px * LINE_HEIGHT > height
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitBox {
    pub text: String,
    pub width: f32,
    pub height: f32,
    pub font_size: f32,
}

impl FitBox {
    /// A box at its scaled size, starting from `estimate` or the floor.
    pub fn new(text: impl Into<String>, width: f32, height: f32, estimate: Option<f32>) -> Self {
        Self {
            text: text.into(),
            width,
            height,
            font_size: estimate.unwrap_or(MIN_FONT_SIZE_PX).max(MIN_FONT_SIZE_PX),
        }
    }

    fn overflows(&self, measure: &dyn TextMeasure) -> bool {
        measure.overflows(&self.text, self.font_size, self.width, self.height)
    }

    fn grow_until_fits(&mut self, measure: &dyn TextMeasure) {
        let mut steps = 0;
        while self.overflows(measure) && steps < MAX_GROW_STEPS {
            self.width = self.width.trunc() + 1.0;
            self.height = self.height.trunc() + 1.0;
            steps += 1;
        }
    }

    fn pad(&mut self) {
        self.width = self.width.trunc() + FIT_PADDING_PX;
        self.height = self.height.trunc() + FIT_PADDING_PX;
    }
}

/// Fits every box in place and pads it. Returns the number of rounds used.
pub fn fit_text(boxes: &mut [FitBox], measure: &dyn TextMeasure) -> usize {
    let mut rounds = 0;
    while rounds < MAX_FIT_ROUNDS {
        if !boxes.iter().any(|fit| fit.overflows(measure)) {
            break;
        }
        for fit in boxes.iter_mut() {
            if !fit.overflows(measure) {
                continue;
            }
            if fit.font_size <= MIN_FONT_SIZE_PX {
                fit.grow_until_fits(measure);
            } else {
                fit.font_size -= 1.0;
            }
        }
        rounds += 1;
    }
    for fit in boxes.iter_mut() {
        fit.pad();
    }
    rounds
}
