//! The long-lived background process: owns the translation cache, the
//! request gate and the client, and answers page messages.

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::TranslationCache;
use crate::chrome::{BrowserChrome, PopupWindow, Tab};
use crate::client::{ImageSource, TranslateApi, TranslateOutcome, TranslationClient};
use crate::data_url;
use crate::gate::{Admission, RequestGate};
use crate::identity::ContentIdentity;
use crate::languages::LanguageCode;
use crate::messaging::{
    self, BackgroundMessage, ImageReply, MessageSender, SnapshotDimensions, SnapshotReply,
};
use crate::models::ImageDescriptor;
use crate::settings::ConfigStore;

pub const ACTIVE_ICON_PATH: &str = "icons/128x128.png";
pub const LOGIN_POPUP_WIDTH: u32 = 376;
pub const LOGIN_POPUP_HEIGHT: u32 = 440;

pub struct Background {
    config: Arc<dyn ConfigStore>,
    client: TranslationClient,
    gate: RequestGate,
    chrome: Arc<dyn BrowserChrome>,
}

impl Background {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        api: Arc<dyn TranslateApi>,
        images: Arc<dyn ImageSource>,
        chrome: Arc<dyn BrowserChrome>,
    ) -> Result<Self> {
        let ceiling = config.load()?.max_in_flight;
        let cache = Arc::new(TranslationCache::new());
        Ok(Self {
            client: TranslationClient::new(api, images, cache, Arc::clone(&config)),
            gate: RequestGate::new(ceiling),
            config,
            chrome,
        })
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        self.client.cache()
    }

    /// Answers one raw message. Malformed messages are logged and dropped.
    pub async fn handle(&self, message: Value, sender: &MessageSender) -> Option<Value> {
        match messaging::parse_message(&message) {
            Ok(parsed) => self.dispatch(parsed, sender).await,
            Err(problem) => {
                debug!(
                    sender = ?sender,
                    message = %message,
                    "dropping message: {}",
                    problem.trim_end()
                );
                None
            }
        }
    }

    pub async fn dispatch(&self, message: BackgroundMessage, sender: &MessageSender) -> Option<Value> {
        match message {
            BackgroundMessage::TranslateImage {
                image,
                translate_to,
                translation_model,
                include_base64_data,
            } => {
                let reply = self
                    .translate_image(
                        &image,
                        translate_to,
                        translation_model.as_deref(),
                        include_base64_data,
                    )
                    .await;
                to_reply(&reply)
            }
            BackgroundMessage::TranslateSnapshot {
                dimensions,
                translate_to,
                translation_model,
                ..
            } => {
                let reply = self
                    .translate_snapshot(
                        dimensions,
                        translate_to,
                        translation_model.as_deref(),
                        sender,
                    )
                    .await?;
                to_reply(&reply)
            }
            BackgroundMessage::SetExtensionIcon => {
                if let Err(err) = self.set_extension_icon().await {
                    warn!("failed to set extension icon: {:#}", err);
                }
                None
            }
            BackgroundMessage::OpenLoginPopup => {
                if let Err(err) = self.open_login_popup().await {
                    warn!("failed to open login popup: {:#}", err);
                }
                None
            }
            BackgroundMessage::OpenSettings => {
                if let Err(err) = self.open_settings().await {
                    warn!("failed to open settings: {:#}", err);
                }
                None
            }
        }
    }

    /// Translates one page image, admitting at most the gate's ceiling of
    /// distinct images at a time.
    pub async fn translate_image(
        &self,
        image: &ImageDescriptor,
        target: LanguageCode,
        model: Option<&str>,
        include_base64_data: bool,
    ) -> ImageReply {
        let Some(content) = image.content_key() else {
            return ImageReply::FetchError;
        };
        let identity = ContentIdentity::from_content(target, model, content);
        let permit = match self.gate.acquire(&identity) {
            Admission::Granted(permit) => permit,
            rejected => {
                debug!(?rejected, in_flight = self.gate.in_flight(), "queue full");
                return ImageReply::FullQueue;
            }
        };
        let outcome = self
            .client
            .translate(image, target, model, include_base64_data)
            .await;
        permit.release();
        outcome.into()
    }

    /// Captures the sender's visible tab, crops the selected region and
    /// translates it. Not admission controlled.
    pub async fn translate_snapshot(
        &self,
        dimensions: SnapshotDimensions,
        target: LanguageCode,
        model: Option<&str>,
        sender: &MessageSender,
    ) -> Option<SnapshotReply> {
        let tab = sender.tab.as_ref()?;
        let (data_url, zoom_factor) = self.take_snapshot(dimensions, tab).await?;
        let image = ImageDescriptor {
            src: Some(data_url),
            base64_data: None,
            width: u32::try_from(dimensions.width).ok()?,
            height: u32::try_from(dimensions.height).ok()?,
        };
        match self.client.translate(&image, target, model, false).await {
            TranslateOutcome::Translated(results) => Some(SnapshotReply {
                translations: results.translations,
                zoom_factor,
            }),
            other => {
                debug!(?other, "snapshot translation failed");
                None
            }
        }
    }

    async fn take_snapshot(&self, dimensions: SnapshotDimensions, tab: &Tab) -> Option<(String, f64)> {
        // Missing when the tab was closed or navigated away.
        let captured = self.chrome.capture_visible_tab(tab.window_id).await?;
        let zoom_factor = self.chrome.zoom_factor(tab.id).await;
        let cropped = tokio::task::spawn_blocking(move || {
            crop_snapshot(&captured, dimensions, zoom_factor)
        })
        .await;
        match cropped {
            Ok(Ok(data_url)) => Some((data_url, zoom_factor)),
            Ok(Err(err)) => {
                warn!("failed to crop snapshot: {:#}", err);
                None
            }
            Err(err) => {
                warn!("snapshot task failed: {}", err);
                None
            }
        }
    }

    async fn set_extension_icon(&self) -> Result<()> {
        let Some(tab) = self.chrome.current_tab().await else {
            return Ok(());
        };
        if self.config.is_active_host(&tab.host_name())? {
            self.chrome.set_icon(tab.id, ACTIVE_ICON_PATH).await?;
        }
        Ok(())
    }

    async fn open_login_popup(&self) -> Result<()> {
        let tab = self
            .chrome
            .current_tab()
            .await
            .ok_or_else(|| anyhow!("no active tab to refresh after login"))?;
        info!(tab = tab.id, "opening login popup");
        self.chrome
            .open_popup(PopupWindow {
                url: format!("loginPopup.html?refreshOnCompleteTabId={}", tab.id),
                width: LOGIN_POPUP_WIDTH,
                height: LOGIN_POPUP_HEIGHT,
                top: 0,
                left: 0,
                focused: true,
            })
            .await
    }

    async fn open_settings(&self) -> Result<()> {
        let url = format!("chrome://extensions/?id={}", self.chrome.extension_id());
        self.chrome.open_tab(&url).await
    }
}

fn to_reply<T: serde::Serialize>(reply: &T) -> Option<Value> {
    match serde_json::to_value(reply) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("failed to encode reply: {}", err);
            None
        }
    }
}

/// Crops a region given in CSS pixels out of a capture taken at
/// `zoom_factor` device pixels per CSS pixel. The crop keeps device
/// resolution.
pub fn crop_snapshot(
    captured: &str,
    dimensions: SnapshotDimensions,
    zoom_factor: f64,
) -> Result<String> {
    let (_, bytes) = data_url::decode(captured)?;
    let screenshot = image::load_from_memory(&bytes).context("failed to decode tab capture")?;
    let scale = |value: i64| (value as f64 * zoom_factor).round().max(0.0) as u32;
    let x = scale(dimensions.left).min(screenshot.width());
    let y = scale(dimensions.top).min(screenshot.height());
    let width = scale(dimensions.width).min(screenshot.width() - x);
    let height = scale(dimensions.height).min(screenshot.height() - y);
    if width == 0 || height == 0 {
        return Err(anyhow!("snapshot region is outside the capture"));
    }
    let cropped = screenshot.crop_imm(x, y, width, height);
    let mut out = Vec::new();
    cropped
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .context("failed to encode snapshot")?;
    Ok(data_url::encode("image/png", &out))
}
