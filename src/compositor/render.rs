use anyhow::{Context, Result, anyhow};
use image::RgbaImage;
use resvg::render;
use std::io::Cursor;
use std::sync::Arc;
use tiny_skia::{IntSize, Pixmap, Transform};
use usvg::{Options, Tree, fontdb};

use super::layout::Rect;
use super::wrap::LINE_HEIGHT;
use crate::data_url;

pub const CORNER_RADIUS_PX: f32 = 8.0;
pub const STROKE_OFFSET_PX: f32 = 3.0;

/// Unit offsets of the shadow copies that together read as an outline.
const STROKE_DIRECTIONS: [(f32, f32); 16] = [
    (1.0, 0.0),
    (0.924, 0.383),
    (0.707, 0.707),
    (0.383, 0.924),
    (0.0, 1.0),
    (-0.383, 0.924),
    (-0.707, 0.707),
    (-0.924, 0.383),
    (-1.0, 0.0),
    (-0.924, -0.383),
    (-0.707, -0.707),
    (-0.383, -0.924),
    (0.0, -1.0),
    (0.383, -0.924),
    (0.707, -0.707),
    (0.924, -0.383),
];

/// What to paint under one label before text goes on top.
pub struct BackgroundPatch<'a> {
    pub rect: Rect,
    /// Cleaned-up image of the region, if the service sent one.
    pub image: Option<&'a str>,
}

pub struct TextStyle<'a> {
    pub font_family: &'a str,
    pub font_size: f32,
    pub color: &'a str,
    pub stroke_color: &'a str,
}

pub fn background_svg(width: u32, height: u32, patches: &[BackgroundPatch<'_>]) -> String {
    let mut svg = svg_open(width, height);
    for (idx, patch) in patches.iter().enumerate() {
        let Rect { x, y, w, h } = patch.rect;
        match patch.image {
            Some(image) => {
                let clip_id = format!("bg-{}", idx);
                svg.push_str(&format!(
                    r#"<clipPath id="{id}"><rect x="{x}" y="{y}" width="{w}" height="{h}" rx="{r}" ry="{r}"/></clipPath>"#,
                    id = clip_id,
                    r = CORNER_RADIUS_PX
                ));
                let uri = escape_xml(&patch_uri(image));
                svg.push_str(&format!(
                    r#"<image href="{uri}" xlink:href="{uri}" x="{x}" y="{y}" width="{w}" height="{h}" preserveAspectRatio="none" clip-path="url(#{id})"/>"#,
                    id = clip_id
                ));
            }
            None => {
                svg.push_str(&format!(
                    r##"<rect x="{x}" y="{y}" width="{w}" height="{h}" rx="{r}" ry="{r}" fill="#ffffff" stroke="#ffffff"/>"##,
                    r = CORNER_RADIUS_PX
                ));
            }
        }
    }
    svg.push_str("</svg>");
    svg
}

/// A transparent `width`x`height` image with `lines` centred on both axes.
pub fn text_svg(width: u32, height: u32, lines: &[String], style: &TextStyle<'_>) -> String {
    let mut svg = svg_open(width, height);
    if lines.is_empty() {
        svg.push_str("</svg>");
        return svg;
    }

    let line_height = style.font_size * LINE_HEIGHT;
    let block_top = (height as f32 - line_height * lines.len() as f32) / 2.0;
    let center_x = width as f32 / 2.0;
    // Approximate ascent that centres glyphs inside their line box.
    let baseline_shift = line_height / 2.0 + style.font_size * 0.35;

    let mut text_rows = String::new();
    for (idx, line) in lines.iter().enumerate() {
        text_rows.push_str(&format!(
            r#"<text x="{x}" y="{y}">{text}</text>"#,
            x = center_x,
            y = block_top + idx as f32 * line_height + baseline_shift,
            text = escape_xml(line)
        ));
    }

    svg.push_str(&format!(
        r#"<g font-family="{family}" font-size="{size}" text-anchor="middle">"#,
        family = escape_xml(style.font_family),
        size = style.font_size
    ));
    for (dx, dy) in STROKE_DIRECTIONS {
        svg.push_str(&format!(
            r#"<g fill="{fill}" transform="translate({tx} {ty})">{rows}</g>"#,
            fill = escape_xml(style.stroke_color),
            tx = dx * STROKE_OFFSET_PX,
            ty = dy * STROKE_OFFSET_PX,
            rows = text_rows
        ));
    }
    svg.push_str(&format!(
        r#"<g fill="{fill}">{rows}</g>"#,
        fill = escape_xml(style.color),
        rows = text_rows
    ));
    svg.push_str("</g></svg>");
    svg
}

pub fn render_svg_pixmap(svg: &str, fontdb: Arc<fontdb::Database>) -> Result<Pixmap> {
    let tree = parse_svg(svg, fontdb)?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    render(&tree, Transform::identity(), &mut pixmap.as_mut());
    Ok(pixmap)
}

/// Rasterises `svg` over the existing contents of `pixmap`.
pub fn render_svg_onto(svg: &str, fontdb: Arc<fontdb::Database>, pixmap: &mut Pixmap) -> Result<()> {
    let tree = parse_svg(svg, fontdb)?;
    render(&tree, Transform::identity(), &mut pixmap.as_mut());
    Ok(())
}

fn parse_svg(svg: &str, fontdb: Arc<fontdb::Database>) -> Result<Tree> {
    let options = Options {
        fontdb,
        ..Options::default()
    };
    Tree::from_str(svg, &options).with_context(|| "failed to parse SVG")
}

pub fn pixmap_from_rgba(image: RgbaImage) -> Result<Pixmap> {
    let (width, height) = image.dimensions();
    let size = IntSize::from_wh(width, height).ok_or_else(|| anyhow!("empty image"))?;
    let mut data = image.into_raw();
    for pixel in data.chunks_exact_mut(4) {
        let alpha = pixel[3] as u16;
        for channel in &mut pixel[..3] {
            *channel = ((*channel as u16 * alpha + 127) / 255) as u8;
        }
    }
    Pixmap::from_vec(data, size).ok_or_else(|| anyhow!("failed to build pixmap"))
}

pub fn pixmap_to_rgba(pixmap: &Pixmap) -> Result<RgbaImage> {
    let data = pixmap
        .pixels()
        .iter()
        .flat_map(|pixel| {
            let color = pixel.demultiply();
            [color.red(), color.green(), color.blue(), color.alpha()]
        })
        .collect();
    RgbaImage::from_raw(pixmap.width(), pixmap.height(), data)
        .ok_or_else(|| anyhow!("failed to build image buffer from pixmap"))
}

pub fn encode_image(image: &RgbaImage, output_mime: &str) -> Result<Vec<u8>> {
    let format = image_format_from_mime(output_mime)
        .ok_or_else(|| anyhow!("unsupported output image mime '{}'", output_mime))?;
    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    let result = if format == image::ImageFormat::Jpeg {
        image::DynamicImage::ImageRgba8(image.clone())
            .to_rgb8()
            .write_to(&mut cursor, format)
    } else {
        image.write_to(&mut cursor, format)
    };
    result.with_context(|| "failed to encode composited image")?;
    Ok(bytes)
}

pub fn image_format_from_mime(mime: &str) -> Option<image::ImageFormat> {
    match mime {
        "image/png" => Some(image::ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Some(image::ImageFormat::Jpeg),
        "image/gif" => Some(image::ImageFormat::Gif),
        "image/webp" => Some(image::ImageFormat::WebP),
        "image/bmp" => Some(image::ImageFormat::Bmp),
        "image/tiff" => Some(image::ImageFormat::Tiff),
        _ => None,
    }
}

fn svg_open(width: u32, height: u32) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    )
}

fn patch_uri(image: &str) -> String {
    if data_url::is_data_url(image) {
        image.trim().to_string()
    } else {
        format!("data:image/png;base64,{}", image.trim())
    }
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_db() -> Arc<fontdb::Database> {
        Arc::new(fontdb::Database::new())
    }

    #[test]
    fn white_rounded_patch_leaves_corners_untouched() {
        let base = RgbaImage::from_pixel(40, 40, image::Rgba([0, 0, 0, 255]));
        let mut pixmap = pixmap_from_rgba(base).unwrap();
        let svg = background_svg(
            40,
            40,
            &[BackgroundPatch {
                rect: Rect {
                    x: 0.0,
                    y: 0.0,
                    w: 40.0,
                    h: 40.0,
                },
                image: None,
            }],
        );
        render_svg_onto(&svg, empty_db(), &mut pixmap).unwrap();
        let out = pixmap_to_rgba(&pixmap).unwrap();
        assert_eq!(out.get_pixel(20, 20).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn text_svg_has_sixteen_outline_copies() {
        let svg = text_svg(
            120,
            40,
            &["Hello & bye".to_string()],
            &TextStyle {
                font_family: "'CC Wild Words', sans-serif",
                font_size: 16.0,
                color: "#000000",
                stroke_color: "#ffffff",
            },
        );
        assert_eq!(svg.matches("fill=\"#ffffff\"").count(), 16);
        assert_eq!(svg.matches("fill=\"#000000\"").count(), 1);
        assert!(svg.contains("Hello &amp; bye"));
        assert!(svg.contains("translate(3 0)"));
        let pixmap = render_svg_pixmap(&svg, empty_db()).unwrap();
        assert_eq!((pixmap.width(), pixmap.height()), (120, 40));
    }

    #[test]
    fn rgba_round_trips_through_pixmap() {
        let image = RgbaImage::from_pixel(3, 2, image::Rgba([200, 100, 50, 255]));
        let pixmap = pixmap_from_rgba(image.clone()).unwrap();
        assert_eq!(pixmap_to_rgba(&pixmap).unwrap(), image);
    }

    #[test]
    fn bare_base64_patches_get_a_data_prefix() {
        assert_eq!(patch_uri("AAAA"), "data:image/png;base64,AAAA");
        assert_eq!(patch_uri("data:image/webp;base64,AA"), "data:image/webp;base64,AA");
    }
}
