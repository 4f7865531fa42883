use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use ttf_parser::Face;
use ttf_parser::name_id;
use usvg::fontdb;

use crate::languages::SYSTEM_DEFAULT_FONT;

#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    space_advance: u16,
    family: Option<String>,
    face_index: u32,
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }
}

/// Fonts available to the compositor: a database for rasterising and, when
/// the requested family resolved, glyph metrics for measuring.
#[derive(Clone)]
pub struct FontContext {
    db: Arc<fontdb::Database>,
    metrics: Option<FontMetrics>,
    family: String,
}

impl FontContext {
    /// Loads system fonts plus an optional font file, and resolves `family`.
    pub fn load(font_path: Option<&Path>, family: &str) -> Result<Self> {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();

        if let Some(path) = font_path {
            let data = std::fs::read(path)
                .with_context(|| format!("failed to read font: {}", path.display()))?;
            let metrics = load_font_metrics_from_data(&data, None)
                .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))?;
            db.load_font_data(data);
            let family = metrics
                .family()
                .map(str::to_string)
                .unwrap_or_else(|| family.to_string());
            return Ok(Self {
                db: Arc::new(db),
                metrics: Some(metrics),
                family,
            });
        }

        let metrics = load_font_metrics_from_family(&db, family)
            .or_else(|_| load_font_metrics_from_family(&db, "sans-serif"))
            .ok();
        Ok(Self {
            db: Arc::new(db),
            metrics,
            family: family.to_string(),
        })
    }

    /// No fonts at all. Text is measured by estimate and not rasterised.
    pub fn empty(family: &str) -> Self {
        Self {
            db: Arc::new(fontdb::Database::new()),
            metrics: None,
            family: family.to_string(),
        }
    }

    pub fn database(&self) -> Arc<fontdb::Database> {
        Arc::clone(&self.db)
    }

    pub fn metrics(&self) -> Option<&FontMetrics> {
        self.metrics.as_ref()
    }

    /// Family the regression formulas and CSS-like styling key on.
    pub fn family(&self) -> &str {
        &self.family
    }

    /// `font-family` value for SVG text.
    pub fn svg_family(&self) -> String {
        if self.family == SYSTEM_DEFAULT_FONT {
            return "sans-serif".to_string();
        }
        match self.metrics.as_ref().and_then(FontMetrics::family) {
            Some(resolved) if !resolved.eq_ignore_ascii_case(&self.family) => {
                format!("'{}', '{}', sans-serif", self.family, resolved)
            }
            _ => format!("'{}', sans-serif", self.family),
        }
    }
}

pub(crate) fn measure_text_width_px(text: &str, font_size: f32, font: Option<&FontMetrics>) -> f32 {
    if let Some(font) = font {
        if let Ok(face) = Face::parse(&font.data, font.face_index) {
            let mut advance = 0u32;
            for ch in text.chars() {
                if ch == '\n' {
                    continue;
                }
                if ch == ' ' {
                    advance = advance.saturating_add(font.space_advance as u32);
                    continue;
                }
                let glyph_advance = face
                    .glyph_index(ch)
                    .and_then(|glyph| face.glyph_hor_advance(glyph))
                    .unwrap_or(font.space_advance);
                advance = advance.saturating_add(glyph_advance as u32);
            }
            let units = font.units_per_em.max(1) as f32;
            return advance as f32 * (font_size / units);
        }
    }
    estimate_text_width_units(text) * font_size
}

fn estimate_char_units(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if is_cjk(ch) {
        1.0
    } else {
        0.9
    }
}

pub(crate) fn is_cjk(ch: char) -> bool {
    matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF | 0xAC00..=0xD7AF
    )
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units).sum()
}

fn load_font_metrics_from_data(data: &[u8], preferred_family: Option<&str>) -> Result<FontMetrics> {
    let mut fallback = None;
    let count = ttf_parser::fonts_in_collection(data).unwrap_or(1);
    for index in 0..count {
        let Ok(face) = Face::parse(data, index) else {
            continue;
        };
        let family = extract_family_name(&face);
        let units_per_em = face.units_per_em().max(1);
        let space_advance = face
            .glyph_index(' ')
            .and_then(|id| face.glyph_hor_advance(id))
            .unwrap_or(units_per_em / 2);
        let metrics = FontMetrics {
            data: Arc::new(data.to_vec()),
            units_per_em,
            space_advance,
            family: family.clone(),
            face_index: index,
        };
        if let (Some(preferred), Some(found)) = (preferred_family, &family) {
            if found.eq_ignore_ascii_case(preferred) {
                return Ok(metrics);
            }
        }
        if fallback.is_none() {
            fallback = Some(metrics);
        }
    }
    fallback.ok_or_else(|| anyhow!("failed to parse font data"))
}

fn load_font_metrics_from_family(db: &fontdb::Database, family: &str) -> Result<FontMetrics> {
    let generic = family.eq_ignore_ascii_case("sans-serif") || family == SYSTEM_DEFAULT_FONT;
    let families = if generic {
        vec![fontdb::Family::SansSerif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let data = db
        .with_face_data(id, |data, _index| data.to_vec())
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    load_font_metrics_from_data(&data, (!generic).then_some(family))
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}
