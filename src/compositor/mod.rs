//! Paints translated labels over an image.
//!
//! Boxes are sorted by z-index, scaled from the image the service saw to the
//! image being painted, and fitted. Lettering is masked with the cleaned
//! background patch (or a white rounded rectangle), then every label is
//! rasterised on its own and placed after overlapping labels are nudged apart.

pub mod fit;
pub mod font;
pub mod font_size;
pub mod layout;
pub mod render;
pub mod wrap;

use anyhow::{Context, Result};
use image::RgbaImage;
use rayon::prelude::*;
use tiny_skia::{Pixmap, PixmapPaint, Transform};
use tracing::debug;

use crate::models::{DEFAULT_FONT_COLOR, DEFAULT_FONT_STROKE_COLOR, TextBox, TranslationResults};
use fit::{FitBox, GlyphMeasure, TextMeasure, fit_text};
use font_size::original_font_size;
use layout::{Rect, Scale, anchor, resolve_collisions, sort_by_z_index};
use render::{BackgroundPatch, TextStyle};

pub use font::FontContext;
pub use render::{encode_image, image_format_from_mime};

/// Where one label ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub text: String,
    /// The source region in painted-image pixels.
    pub region: Rect,
    /// The fitted, padded label after collision adjustment.
    pub label: Rect,
    pub font_size: f32,
}

pub struct Composited {
    pub image: RgbaImage,
    pub placements: Vec<Placement>,
}

pub struct Compositor {
    fonts: FontContext,
}

impl Compositor {
    pub fn new(fonts: FontContext) -> Self {
        Self { fonts }
    }

    /// Decodes `image_bytes` and paints `results` over it.
    pub fn compose(&self, image_bytes: &[u8], results: &TranslationResults) -> Result<Composited> {
        let base = image::load_from_memory(image_bytes)
            .with_context(|| "failed to decode image for compositing")?
            .to_rgba8();
        let measure = GlyphMeasure::new(self.fonts.metrics());
        self.compose_with(base, results, &measure)
    }

    pub fn compose_with(
        &self,
        base: RgbaImage,
        results: &TranslationResults,
        measure: &dyn TextMeasure,
    ) -> Result<Composited> {
        let (width, height) = base.dimensions();
        let mut boxes = results.translations.clone();
        sort_by_z_index(&mut boxes);

        let scale = Scale::between(
            (width, height),
            (results.image.width, results.image.height),
        );
        let regions: Vec<Rect> = boxes.iter().map(|text_box| scale.apply(text_box)).collect();
        let mut fits: Vec<FitBox> = boxes
            .iter()
            .zip(&regions)
            .map(|(text_box, region)| {
                let estimate = original_font_size(
                    self.fonts.family(),
                    text_box.font_height_px.map(|px| px * scale.y),
                );
                FitBox::new(text_box.translated_text.clone(), region.w, region.h, estimate)
            })
            .collect();

        let (painted, rounds) = rayon::join(
            || self.paint_backgrounds(base, &boxes, &regions),
            || fit_text(&mut fits, measure),
        );
        let mut canvas = painted?;
        debug!(labels = boxes.len(), rounds, "fitted labels");

        let labels: Vec<Pixmap> = boxes
            .par_iter()
            .zip(fits.par_iter())
            .map(|(text_box, fit)| self.render_label(text_box, fit))
            .collect::<Result<_>>()?;

        let mut placed: Vec<Rect> = regions
            .iter()
            .zip(&fits)
            .map(|(region, fit)| anchor(region, fit.width, fit.height))
            .collect();
        resolve_collisions(&mut placed, width as f32, height as f32);

        for (label, rect) in labels.iter().zip(&placed) {
            canvas.draw_pixmap(
                0,
                0,
                label.as_ref(),
                &PixmapPaint::default(),
                Transform::from_translate(rect.x, rect.y),
                None,
            );
        }

        let placements = fits
            .into_iter()
            .zip(regions)
            .zip(placed)
            .map(|((fit, region), label)| Placement {
                text: fit.text,
                region,
                label,
                font_size: fit.font_size,
            })
            .collect();

        Ok(Composited {
            image: render::pixmap_to_rgba(&canvas)?,
            placements,
        })
    }

    fn paint_backgrounds(
        &self,
        base: RgbaImage,
        boxes: &[TextBox],
        regions: &[Rect],
    ) -> Result<Pixmap> {
        let (width, height) = base.dimensions();
        let mut pixmap = render::pixmap_from_rgba(base)?;
        if boxes.is_empty() {
            return Ok(pixmap);
        }
        let patches: Vec<BackgroundPatch<'_>> = boxes
            .iter()
            .zip(regions)
            .map(|(text_box, region)| BackgroundPatch {
                rect: *region,
                image: text_box.background.as_deref().filter(|bg| !bg.is_empty()),
            })
            .collect();
        let svg = render::background_svg(width, height, &patches);
        render::render_svg_onto(&svg, self.fonts.database(), &mut pixmap)?;
        Ok(pixmap)
    }

    fn render_label(&self, text_box: &TextBox, fit: &FitBox) -> Result<Pixmap> {
        let width = fit.width.max(1.0) as u32;
        let height = fit.height.max(1.0) as u32;
        let lines = GlyphMeasure::new(self.fonts.metrics()).lines(
            &fit.text,
            fit.font_size,
            fit.width,
        );
        let family = self.fonts.svg_family();
        let style = TextStyle {
            font_family: &family,
            font_size: fit.font_size,
            color: text_box.font_color.as_deref().unwrap_or(DEFAULT_FONT_COLOR),
            stroke_color: text_box
                .font_stroke_color
                .as_deref()
                .unwrap_or(DEFAULT_FONT_STROKE_COLOR),
        };
        let svg = render::text_svg(width, height, &lines, &style);
        render::render_svg_pixmap(&svg, self.fonts.database())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::DEFAULT_FONT_FAMILY;
    use crate::models::ImageSize;

    fn text_box(text: &str, min: (f32, f32), max: (f32, f32)) -> TextBox {
        TextBox {
            original_language: "ja".to_string(),
            translated_text: text.to_string(),
            min_x: min.0,
            min_y: min.1,
            max_x: max.0,
            max_y: max.1,
            font_height_px: None,
            font_color: None,
            font_stroke_color: None,
            z_index: None,
            background: None,
        }
    }

    fn compositor() -> Compositor {
        Compositor::new(FontContext::empty(DEFAULT_FONT_FAMILY))
    }

    #[test]
    fn no_translations_leaves_image_untouched() {
        let base = RgbaImage::from_pixel(20, 20, image::Rgba([10, 20, 30, 255]));
        let results = TranslationResults {
            image: ImageSize {
                width: 20,
                height: 20,
            },
            translations: vec![],
            base64_data: None,
        };
        let never = |_: &str, _: f32, _: f32, _: f32| false;
        let out = compositor().compose_with(base.clone(), &results, &never).unwrap();
        assert_eq!(out.image, base);
        assert!(out.placements.is_empty());
    }

    #[test]
    fn boxes_are_scaled_to_the_painted_image() {
        let base = RgbaImage::from_pixel(200, 100, image::Rgba([0, 0, 0, 255]));
        let results = TranslationResults {
            image: ImageSize {
                width: 100,
                height: 50,
            },
            translations: vec![text_box("hi", (10.0, 10.0), (40.0, 30.0))],
            base64_data: None,
        };
        let never = |_: &str, _: f32, _: f32, _: f32| false;
        let out = compositor().compose_with(base, &results, &never).unwrap();
        let placement = &out.placements[0];
        assert_eq!(
            placement.region,
            Rect {
                x: 20.0,
                y: 20.0,
                w: 60.0,
                h: 40.0
            }
        );
        assert_eq!((placement.label.w, placement.label.h), (70.0, 50.0));
        // Masked white inside the region, untouched outside.
        assert_eq!(out.image.get_pixel(50, 40).0, [255, 255, 255, 255]);
        assert_eq!(out.image.get_pixel(150, 90).0, [0, 0, 0, 255]);
    }

    #[test]
    fn placements_follow_z_order() {
        let base = RgbaImage::from_pixel(100, 100, image::Rgba([0, 0, 0, 255]));
        let mut top = text_box("top", (0.0, 0.0), (20.0, 20.0));
        top.z_index = Some(4);
        let results = TranslationResults {
            image: ImageSize {
                width: 100,
                height: 100,
            },
            translations: vec![top, text_box(" ", (50.0, 50.0), (60.0, 60.0))],
            base64_data: None,
        };
        let never = |_: &str, _: f32, _: f32, _: f32| false;
        let out = compositor().compose_with(base, &results, &never).unwrap();
        let order: Vec<&str> = out.placements.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(order, vec![" ", "top"]);
    }
}
