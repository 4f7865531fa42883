//! Request/response messages between a page and the background process.
//!
//! Messages travel as JSON objects tagged by `kind`. Replies are JSON too:
//! `null` when a message has no meaningful answer or was dropped.

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::background::Background;
use crate::chrome::Tab;
use crate::client::TranslateOutcome;
use crate::languages::LanguageCode;
use crate::models::{ImageDescriptor, TextBox, TranslationResults};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDimensions {
    pub top: i64,
    pub left: i64,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BackgroundMessage {
    #[serde(rename_all = "camelCase")]
    TranslateImage {
        image: ImageDescriptor,
        translate_to: LanguageCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        translation_model: Option<String>,
        #[serde(default)]
        include_base64_data: bool,
    },
    #[serde(rename_all = "camelCase")]
    TranslateSnapshot {
        dimensions: SnapshotDimensions,
        translate_to: LanguageCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        translation_model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_number: Option<u64>,
    },
    SetExtensionIcon,
    OpenLoginPopup,
    OpenSettings,
}

/// Who sent a message, as far as the background can tell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSender {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<Tab>,
}

/// Body of `POST /message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message: Value,
    #[serde(default)]
    pub sender: MessageSender,
}

/// Answer to `translateImage`. Failures travel as bare strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireImageReply", into = "WireImageReply")]
pub enum ImageReply {
    Translated(TranslationResults),
    /// Too many requests in flight, or this one already is. Retry later.
    FullQueue,
    FetchError,
    SiteAccessError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum ReplyStatus {
    FullQueue,
    FetchError,
    SiteAccessError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WireImageReply {
    Status(ReplyStatus),
    Translated(TranslationResults),
}

impl From<WireImageReply> for ImageReply {
    fn from(wire: WireImageReply) -> Self {
        match wire {
            WireImageReply::Status(ReplyStatus::FullQueue) => ImageReply::FullQueue,
            WireImageReply::Status(ReplyStatus::FetchError) => ImageReply::FetchError,
            WireImageReply::Status(ReplyStatus::SiteAccessError) => ImageReply::SiteAccessError,
            WireImageReply::Translated(results) => ImageReply::Translated(results),
        }
    }
}

impl From<ImageReply> for WireImageReply {
    fn from(reply: ImageReply) -> Self {
        match reply {
            ImageReply::FullQueue => WireImageReply::Status(ReplyStatus::FullQueue),
            ImageReply::FetchError => WireImageReply::Status(ReplyStatus::FetchError),
            ImageReply::SiteAccessError => WireImageReply::Status(ReplyStatus::SiteAccessError),
            ImageReply::Translated(results) => WireImageReply::Translated(results),
        }
    }
}

impl From<TranslateOutcome> for ImageReply {
    fn from(outcome: TranslateOutcome) -> Self {
        match outcome {
            TranslateOutcome::Translated(results) => ImageReply::Translated(results),
            TranslateOutcome::FetchError => ImageReply::FetchError,
            TranslateOutcome::SiteAccessError => ImageReply::SiteAccessError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotReply {
    pub translations: Vec<TextBox>,
    pub zoom_factor: f64,
}

/// Checks an inbound message and types it. The error is a human-readable
/// explanation for the log.
pub fn parse_message(value: &Value) -> Result<BackgroundMessage, String> {
    let Some(object) = value.as_object().filter(|object| !object.is_empty()) else {
        return Err("Message must not be empty.".to_string());
    };
    let kind = object.get("kind").and_then(Value::as_str).unwrap_or("");
    let problem = match kind {
        "translateImage" => validate_image_message(value),
        "translateSnapshot" => validate_snapshot_message(value),
        "setExtensionIcon" | "openLoginPopup" | "openSettings" => None,
        _ => Some("Unsupported message kind.".to_string()),
    };
    if let Some(problem) = problem {
        return Err(problem);
    }
    serde_json::from_value(value.clone()).map_err(|err| err.to_string())
}

fn validate_image_message(message: &Value) -> Option<String> {
    let Some(image) = message.get("image").filter(|image| !image.is_null()) else {
        return Some("translateImage message must set image.".to_string());
    };

    let mut problems = String::new();
    if !is_truthy(image.get("src")) && !is_truthy(image.get("base64Data")) {
        problems.push_str("translateImage message must set image.src or image.base64Data\n");
    }
    if !is_truthy(image.get("height")) {
        problems.push_str("translateImage message must set image.height\n");
    }
    if !is_truthy(image.get("width")) {
        problems.push_str("translateImage message must set image.width\n");
    }
    if !is_truthy(message.get("translateTo")) {
        problems.push_str("translateImage message must set translateTo\n");
    }
    (!problems.is_empty()).then_some(problems)
}

fn validate_snapshot_message(message: &Value) -> Option<String> {
    let mut problems = String::new();
    if !is_truthy(message.get("translateTo")) {
        problems.push_str("Must supply translateTo.\n");
    }

    match message.get("dimensions").filter(|value| !value.is_null()) {
        None => problems.push_str("Must supply dimensions of top, left, width, and height.\n"),
        Some(dimensions) => {
            for field in ["top", "left", "width", "height"] {
                if !is_integer(dimensions.get(field)) {
                    problems.push_str(&format!("{} must be an integer.", field));
                }
            }
        }
    }
    (!problems.is_empty()).then_some(problems)
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(_) => true,
    }
}

fn is_integer(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_f64)
        .is_some_and(|n| n.is_finite() && n.fract() == 0.0)
}

/// Transport from a page to the background process.
pub trait MessageBus: Send + Sync {
    fn post<'a>(&'a self, message: &'a BackgroundMessage) -> BoxFuture<'a, Result<Value>>;
}

pub async fn request_image_translation(
    bus: &dyn MessageBus,
    message: &BackgroundMessage,
) -> Result<Option<ImageReply>> {
    decode_reply(bus.post(message).await?)
}

pub async fn request_snapshot(
    bus: &dyn MessageBus,
    message: &BackgroundMessage,
) -> Result<Option<SnapshotReply>> {
    decode_reply(bus.post(message).await?)
}

fn decode_reply<T: DeserializeOwned>(value: Value) -> Result<Option<T>> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .context("malformed reply from background")
}

/// Delivers messages to a background in the same process.
pub struct LocalBus {
    background: Arc<Background>,
    sender: MessageSender,
}

impl LocalBus {
    pub fn new(background: Arc<Background>, sender: MessageSender) -> Self {
        Self { background, sender }
    }
}

impl MessageBus for LocalBus {
    fn post<'a>(&'a self, message: &'a BackgroundMessage) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let value = serde_json::to_value(message).context("failed to encode message")?;
            Ok(self
                .background
                .handle(value, &self.sender)
                .await
                .unwrap_or(Value::Null))
        })
    }
}

/// Delivers messages to a background served over HTTP (`POST /message`).
pub struct HttpBus {
    client: reqwest::Client,
    endpoint: String,
    sender: MessageSender,
}

impl HttpBus {
    pub fn new(base_url: &str, sender: MessageSender) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("failed to build message bus client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/message", base_url.trim_end_matches('/')),
            sender,
        })
    }
}

impl MessageBus for HttpBus {
    fn post<'a>(&'a self, message: &'a BackgroundMessage) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let envelope = Envelope {
                message: serde_json::to_value(message).context("failed to encode message")?,
                sender: self.sender.clone(),
            };
            let response = self
                .client
                .post(&self.endpoint)
                .json(&envelope)
                .send()
                .await
                .with_context(|| format!("failed to reach background at {}", self.endpoint))?
                .error_for_status()
                .context("background rejected message")?;
            response
                .json::<Value>()
                .await
                .context("failed to read background reply")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageSize;
    use serde_json::json;

    #[test]
    fn translate_image_wire_shape() {
        let message = BackgroundMessage::TranslateImage {
            image: ImageDescriptor {
                src: Some("https://cdn.example/1.jpg".to_string()),
                base64_data: None,
                width: 800,
                height: 1200,
            },
            translate_to: LanguageCode::En,
            translation_model: None,
            include_base64_data: true,
        };
        insta::assert_json_snapshot!(message, @r###"
        {
          "kind": "translateImage",
          "image": {
            "src": "https://cdn.example/1.jpg",
            "width": 800,
            "height": 1200
          },
          "translateTo": "en",
          "includeBase64Data": true
        }
        "###);
    }

    #[test]
    fn replies_round_trip_through_strings_and_objects() {
        assert_eq!(serde_json::to_value(ImageReply::FullQueue).unwrap(), json!("FullQueue"));
        let parsed: ImageReply = serde_json::from_value(json!("SiteAccessError")).unwrap();
        assert_eq!(parsed, ImageReply::SiteAccessError);

        let results = json!({
            "image": { "width": 10, "height": 20 },
            "translations": []
        });
        let parsed: ImageReply = serde_json::from_value(results).unwrap();
        assert_eq!(
            parsed,
            ImageReply::Translated(TranslationResults {
                image: ImageSize {
                    width: 10,
                    height: 20
                },
                translations: vec![],
                base64_data: None,
            })
        );
    }

    #[test]
    fn image_messages_report_every_missing_field() {
        let problem = parse_message(&json!({ "kind": "translateImage", "image": {} })).unwrap_err();
        assert_eq!(
            problem,
            "translateImage message must set image.src or image.base64Data\n\
             translateImage message must set image.height\n\
             translateImage message must set image.width\n\
             translateImage message must set translateTo\n"
        );
        assert_eq!(
            parse_message(&json!({ "kind": "translateImage" })).unwrap_err(),
            "translateImage message must set image."
        );
    }

    #[test]
    fn snapshot_dimensions_must_be_integers() {
        let problem = parse_message(&json!({
            "kind": "translateSnapshot",
            "translateTo": "en",
            "dimensions": { "top": 1.5, "left": 0, "width": 100, "height": 100 }
        }))
        .unwrap_err();
        assert_eq!(problem, "top must be an integer.");

        let parsed = parse_message(&json!({
            "kind": "translateSnapshot",
            "translateTo": "ja",
            "dimensions": { "top": 1, "left": 2, "width": 300, "height": 400 },
            "requestNumber": 7
        }))
        .unwrap();
        assert!(matches!(
            parsed,
            BackgroundMessage::TranslateSnapshot {
                request_number: Some(7),
                ..
            }
        ));
    }

    #[test]
    fn unknown_or_empty_messages_are_rejected() {
        assert_eq!(
            parse_message(&json!({ "kind": "selfDestruct" })).unwrap_err(),
            "Unsupported message kind."
        );
        assert_eq!(parse_message(&Value::Null).unwrap_err(), "Message must not be empty.");
        assert_eq!(
            parse_message(&json!({ "kind": "openSettings" })).unwrap(),
            BackgroundMessage::OpenSettings
        );
    }

    #[test]
    fn unsupported_language_fails_typing() {
        let problem = parse_message(&json!({
            "kind": "translateImage",
            "image": { "src": "a", "width": 1, "height": 1 },
            "translateTo": "xx"
        }))
        .unwrap_err();
        assert!(problem.contains("unsupported language code"), "{}", problem);
    }
}
