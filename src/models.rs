use serde::{Deserialize, Serialize};

/// Translated text placed over an image when the account is out of quota.
/// The page treats a box carrying exactly this text as an upsell signal.
pub const OUT_OF_QUOTA_MESSAGE: &str =
    "Out of translations. Server costs are expensive. Upgrade for more!";
pub const SERVER_ERROR_MESSAGE: &str =
    "Server is down or experiencing issues. Sorry for the inconvenience.";

pub const DEFAULT_FONT_COLOR: &str = "#000000";
pub const DEFAULT_FONT_STROKE_COLOR: &str = "#ffffff";
/// Translated text of a filler box that only blanks out the source lettering.
pub const BLANK_PLACEHOLDER: &str = "   ";

/// One translated region, in the pixel space of the image that was sent to
/// the translation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBox {
    pub original_language: String,
    pub translated_text: String,
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_height_px: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_stroke_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    /// Data URL of the region with the original lettering removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

impl TextBox {
    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn is_out_of_quota(&self) -> bool {
        self.translated_text == OUT_OF_QUOTA_MESSAGE
    }

    /// Filler boxes the service emits to blank out lettering without text.
    pub fn is_blank(&self) -> bool {
        self.translated_text == BLANK_PLACEHOLDER
    }

    fn synthetic(message: &str) -> Self {
        Self {
            original_language: "Unknown".to_string(),
            translated_text: message.to_string(),
            min_x: 0.0,
            min_y: 0.0,
            max_x: 200.0,
            max_y: 200.0,
            font_height_px: None,
            font_color: None,
            font_stroke_color: None,
            z_index: None,
            background: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Result of translating one image, as returned to the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResults {
    /// Dimensions of the image the text boxes were computed on.
    pub image: ImageSize,
    pub translations: Vec<TextBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_data: Option<String>,
}

impl TranslationResults {
    pub fn is_out_of_quota(&self) -> bool {
        self.translations.iter().any(TextBox::is_out_of_quota)
    }
}

/// What the remote service answered for one image, before dimensions are
/// attached. `error_message` marks synthetic results that must not be cached.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiTranslation {
    pub translations: Vec<TextBox>,
    pub error_message: Option<String>,
}

impl ApiTranslation {
    pub fn out_of_quota() -> Self {
        Self::synthetic(OUT_OF_QUOTA_MESSAGE)
    }

    pub fn server_error() -> Self {
        Self::synthetic(SERVER_ERROR_MESSAGE)
    }

    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }

    fn synthetic(message: &str) -> Self {
        Self {
            translations: vec![TextBox::synthetic(message)],
            error_message: Some(message.to_string()),
        }
    }
}

/// Image handed to the translation pipeline. At least one of `src` and
/// `base64_data` must be set; inline data wins when both are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_data: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl ImageDescriptor {
    /// The content the identity of this image is derived from.
    pub fn content_key(&self) -> Option<&str> {
        self.src
            .as_deref()
            .filter(|src| !src.is_empty())
            .or_else(|| self.base64_data.as_deref().filter(|data| !data.is_empty()))
    }
}
