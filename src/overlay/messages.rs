use anyhow::Result;
use serde::Serialize;

use crate::messaging::{BackgroundMessage, MessageBus};
use crate::page::PageHost;

pub const FETCH_ERROR_MESSAGE: &str =
    "Could not load this image. The unlocker extension can read images this site blocks.";
pub const SITE_ACCESS_ERROR_MESSAGE: &str =
    "Site access is restricted. Allow the extension to read this site in its settings.";
pub const OUT_OF_QUOTA_MESSAGE: &str = "Feed the server hamsters.";
pub const QUEUED_MESSAGE: &str = "Queued";

pub const SUBSCRIPTION_URL: &str = "https://mangatranslator.ai/subscription";
pub const UNLOCKER_URL: &str = "https://mangatranslator.ai/unlocker";

/// A button shown under a system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayAction {
    Login,
    Upgrade,
    DownloadUnlocker,
    OpenSettings,
}

impl OverlayAction {
    pub fn label(self) -> &'static str {
        match self {
            OverlayAction::Login => "Log in",
            OverlayAction::Upgrade => "Upgrade",
            OverlayAction::DownloadUnlocker => "Download",
            OverlayAction::OpenSettings => "Settings",
        }
    }

    /// Runs the action as if its button were clicked.
    pub async fn perform(self, bus: &dyn MessageBus, host: &dyn PageHost) -> Result<()> {
        match self {
            OverlayAction::Login => {
                bus.post(&BackgroundMessage::OpenLoginPopup).await?;
            }
            OverlayAction::OpenSettings => {
                bus.post(&BackgroundMessage::OpenSettings).await?;
            }
            OverlayAction::Upgrade => host.open_url(SUBSCRIPTION_URL),
            OverlayAction::DownloadUnlocker => host.open_url(UNLOCKER_URL),
        }
        Ok(())
    }
}

/// Text pinned to the top left of an overlay, such as "Queued".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMessage {
    pub text: String,
    pub font_family: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessage {
    pub text: String,
    pub actions: Vec<OverlayAction>,
    pub font_family: String,
}

/// Everything an overlay currently shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayContent {
    pub spinner: bool,
    pub header: Option<HeaderMessage>,
    pub messages: Vec<SystemMessage>,
}

impl OverlayContent {
    pub fn is_empty(&self) -> bool {
        !self.spinner && self.header.is_none() && self.messages.is_empty()
    }
}
