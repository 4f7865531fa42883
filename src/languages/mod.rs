use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_FONT_FAMILY: &str = "CC Wild Words";
pub const SYSTEM_DEFAULT_FONT: &str = "system-default";
pub const UI_FONT_FAMILY: &str = "PatrickHand-Regular";

/// Target languages the translation service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LanguageCode {
    Ar,
    De,
    En,
    Es,
    Fr,
    Hi,
    Id,
    It,
    Ja,
    Ko,
    Pl,
    PtBr,
    PtPt,
    Ru,
    Th,
    Vi,
    ZhCn,
    ZhTw,
}

impl LanguageCode {
    pub const ALL: [LanguageCode; 18] = [
        LanguageCode::Ar,
        LanguageCode::De,
        LanguageCode::En,
        LanguageCode::Es,
        LanguageCode::Fr,
        LanguageCode::Hi,
        LanguageCode::Id,
        LanguageCode::It,
        LanguageCode::Ja,
        LanguageCode::Ko,
        LanguageCode::Pl,
        LanguageCode::PtBr,
        LanguageCode::PtPt,
        LanguageCode::Ru,
        LanguageCode::Th,
        LanguageCode::Vi,
        LanguageCode::ZhCn,
        LanguageCode::ZhTw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageCode::Ar => "ar",
            LanguageCode::De => "de",
            LanguageCode::En => "en",
            LanguageCode::Es => "es",
            LanguageCode::Fr => "fr",
            LanguageCode::Hi => "hi",
            LanguageCode::Id => "id",
            LanguageCode::It => "it",
            LanguageCode::Ja => "ja",
            LanguageCode::Ko => "ko",
            LanguageCode::Pl => "pl",
            LanguageCode::PtBr => "pt-BR",
            LanguageCode::PtPt => "pt-PT",
            LanguageCode::Ru => "ru",
            LanguageCode::Th => "th",
            LanguageCode::Vi => "vi",
            LanguageCode::ZhCn => "zh-CN",
            LanguageCode::ZhTw => "zh-TW",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LanguageCode::Ar => "Arabic",
            LanguageCode::De => "German",
            LanguageCode::En => "English",
            LanguageCode::Es => "Spanish",
            LanguageCode::Fr => "French",
            LanguageCode::Hi => "Hindi",
            LanguageCode::Id => "Indonesian",
            LanguageCode::It => "Italian",
            LanguageCode::Ja => "Japanese",
            LanguageCode::Ko => "Korean",
            LanguageCode::Pl => "Polish",
            LanguageCode::PtBr => "Portuguese (Brazil)",
            LanguageCode::PtPt => "Portuguese",
            LanguageCode::Ru => "Russian",
            LanguageCode::Th => "Thai",
            LanguageCode::Vi => "Vietnamese",
            LanguageCode::ZhCn => "Chinese (Simplified)",
            LanguageCode::ZhTw => "Chinese (Traditional)",
        }
    }

    /// Languages the comic fonts have no glyphs for.
    pub fn forces_system_font(&self) -> bool {
        matches!(
            self,
            LanguageCode::Hi
                | LanguageCode::Th
                | LanguageCode::Ja
                | LanguageCode::Ko
                | LanguageCode::ZhCn
                | LanguageCode::ZhTw
                | LanguageCode::Vi
                | LanguageCode::Ar
        )
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageCode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        LanguageCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == value)
            .ok_or_else(|| anyhow!("unsupported language code '{}'", value))
    }
}

impl TryFrom<String> for LanguageCode {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<LanguageCode> for String {
    fn from(code: LanguageCode) -> Self {
        code.as_str().to_string()
    }
}

/// Picks a target language from a BCP 47 locale such as `pt-BR` or `fr-CA`.
///
/// An exact match wins, then the first supported code sharing the primary
/// subtag, then English.
pub fn default_language(locale: &str) -> LanguageCode {
    let locale = locale.trim();
    if let Ok(code) = locale.parse::<LanguageCode>() {
        return code;
    }
    let short = primary_subtag(locale);
    if short.is_empty() {
        return LanguageCode::En;
    }
    LanguageCode::ALL
        .iter()
        .copied()
        .find(|code| code.as_str().starts_with(short))
        .unwrap_or(LanguageCode::En)
}

/// Font family used for translated text, given the configured family.
pub fn font_family_for(language: LanguageCode, configured: Option<&str>) -> String {
    if language.forces_system_font() {
        return SYSTEM_DEFAULT_FONT.to_string();
    }
    configured
        .map(str::trim)
        .filter(|family| !family.is_empty())
        .unwrap_or(DEFAULT_FONT_FAMILY)
        .to_string()
}

/// Font family used for overlay UI strings, given the user's locale.
pub fn ui_font_family(locale: &str) -> &'static str {
    match primary_subtag(locale) {
        "hi" | "th" | "ja" | "ko" | "zh" | "vi" | "ar" => SYSTEM_DEFAULT_FONT,
        _ => UI_FONT_FAMILY,
    }
}

/// Locale of the running process, from the usual POSIX variables.
pub fn system_locale() -> String {
    for key in ["LC_ALL", "LC_MESSAGES", "LANG"] {
        if let Ok(value) = std::env::var(key) {
            let value = value.split('.').next().unwrap_or("").replace('_', "-");
            if !value.is_empty() && value != "C" && value != "POSIX" {
                return value;
            }
        }
    }
    "en-US".to_string()
}

fn primary_subtag(locale: &str) -> &str {
    locale.split('-').next().unwrap_or("").trim()
}
