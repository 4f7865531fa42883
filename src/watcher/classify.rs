//! Which page elements are worth translating.

use regex::Regex;
use std::sync::OnceLock;

use crate::page::ElementProbe;

/// Smaller elements are icons or decoration.
pub const MIN_TRANSLATABLE_PX: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Image,
    Canvas,
    /// Any other element painted with a CSS background image.
    BackgroundElement,
}

/// The kind of element, regardless of eligibility.
pub fn element_kind(probe: &ElementProbe) -> Option<ElementKind> {
    if probe.is_image() {
        Some(ElementKind::Image)
    } else if probe.is_canvas() {
        Some(ElementKind::Canvas)
    } else if has_background_url(probe) {
        Some(ElementKind::BackgroundElement)
    } else {
        None
    }
}

/// The kind of element, if it is eligible for translation right now.
pub fn classify(probe: &ElementProbe) -> Option<ElementKind> {
    let kind = element_kind(probe)?;
    let eligible = match kind {
        ElementKind::Image => can_translate_image(probe),
        ElementKind::Canvas => can_translate_canvas(probe),
        ElementKind::BackgroundElement => can_translate_background(probe),
    };
    eligible.then_some(kind)
}

pub fn can_translate_image(probe: &ElementProbe) -> bool {
    if probe.src.as_deref().is_none_or(str::is_empty) {
        return false;
    }
    if probe.width == 0 || probe.height == 0 {
        return false;
    }
    if probe.width < MIN_TRANSLATABLE_PX || probe.height < MIN_TRANSLATABLE_PX {
        return false;
    }
    let loading = !probe.complete || probe.natural_height == 0;
    !loading
}

pub fn can_translate_canvas(probe: &ElementProbe) -> bool {
    probe.width != 0
        && probe.height != 0
        && probe.width >= MIN_TRANSLATABLE_PX
        && probe.height >= MIN_TRANSLATABLE_PX
}

pub fn can_translate_background(probe: &ElementProbe) -> bool {
    if probe.client_width < MIN_TRANSLATABLE_PX || probe.client_height < MIN_TRANSLATABLE_PX {
        return false;
    }
    background_url(probe).is_some()
}

/// Background image URL, preferring inline style over computed style and
/// `background-image` over the `background` shorthand.
pub fn background_url(probe: &ElementProbe) -> Option<String> {
    if probe.is_image() || probe.is_canvas() {
        return None;
    }
    let style = &probe.style;
    [
        &style.inline_background_image,
        &style.inline_background,
        &style.computed_background_image,
        &style.computed_background,
    ]
    .into_iter()
    .find(|value| value.contains("url("))
    .and_then(|value| extract_url(value))
}

fn has_background_url(probe: &ElementProbe) -> bool {
    background_url(probe).is_some()
}

fn extract_url(value: &str) -> Option<String> {
    static URL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = URL_PATTERN
        .get_or_init(|| Regex::new(r"url\(([^)]+)\)").ok())
        .as_ref()?;
    let raw = pattern.captures(value)?.get(1)?.as_str();
    Some(strip_outer_quotes(raw).to_string())
}

fn strip_outer_quotes(value: &str) -> &str {
    let value = value
        .strip_prefix(['"', '\''])
        .unwrap_or(value);
    value.strip_suffix(['"', '\'']).unwrap_or(value)
}
