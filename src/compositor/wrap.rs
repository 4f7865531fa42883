//! Word wrapping for translated text, with per-glyph breaks for CJK.

use super::font::is_cjk;

/// Line height as a multiple of font size.
pub const LINE_HEIGHT: f32 = 1.25;

/// Wraps `text` into lines no wider than `max_width`, where `width_of`
/// measures a string at the current font size. A single token wider than
/// the limit gets a line of its own.
pub fn wrap_text(text: &str, max_width: f32, width_of: &dyn Fn(&str) -> f32) -> Vec<String> {
    let tokens = tokenize_text(text);
    let mut result = Vec::new();
    let mut current = String::new();

    for token in &tokens {
        if token == "\n" {
            if !current.trim().is_empty() {
                result.push(current.trim_end().to_string());
            }
            current.clear();
            continue;
        }
        if token == " " {
            if !current.is_empty() && !current.ends_with(' ') {
                current.push(' ');
            }
            continue;
        }
        let mut candidate = current.clone();
        candidate.push_str(token);
        if width_of(candidate.trim_end()) > max_width && !current.trim().is_empty() {
            result.push(current.trim_end().to_string());
            current.clear();
        }
        current.push_str(token);
    }

    if !current.trim().is_empty() {
        result.push(current.trim_end().to_string());
    }
    result
}

/// Width of the widest unbreakable token.
pub fn widest_token(text: &str, width_of: &dyn Fn(&str) -> f32) -> f32 {
    tokenize_text(text)
        .iter()
        .filter(|token| token.as_str() != " " && token.as_str() != "\n")
        .map(|token| width_of(token))
        .fold(0.0, f32::max)
}

fn tokenize_text(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch == '\n' || ch.is_whitespace() || is_cjk(ch) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            let token = if ch == '\n' {
                "\n".to_string()
            } else if ch.is_whitespace() {
                " ".to_string()
            } else {
                ch.to_string()
            };
            tokens.push(token);
            continue;
        }
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
