//! Browser chrome the background process drives: tabs, toolbar icon,
//! popups and screen capture.

use anyhow::Result;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::info;

use crate::settings::normalize_host;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: u64,
    pub window_id: u64,
    pub url: String,
}

impl Tab {
    pub fn host_name(&self) -> String {
        normalize_host(&self.url).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupWindow {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub top: i32,
    pub left: i32,
    pub focused: bool,
}

pub trait BrowserChrome: Send + Sync {
    fn extension_id(&self) -> &str;

    /// Active tab of the focused window.
    fn current_tab(&self) -> BoxFuture<'_, Option<Tab>>;

    /// PNG data URL of the visible part of a window's active tab.
    fn capture_visible_tab(&self, window_id: u64) -> BoxFuture<'_, Option<String>>;

    fn zoom_factor(&self, tab_id: u64) -> BoxFuture<'_, f64>;

    fn set_icon<'a>(&'a self, tab_id: u64, path: &'a str) -> BoxFuture<'a, Result<()>>;

    fn open_popup(&self, popup: PopupWindow) -> BoxFuture<'_, Result<()>>;

    fn open_tab<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChromeAction {
    SetIcon { tab_id: u64, path: String },
    OpenPopup(PopupWindow),
    OpenTab(String),
}

/// Chrome for a background process with no browser attached. Tab state and
/// captures are supplied by the embedder; requested actions are logged and
/// recorded.
pub struct HeadlessChrome {
    extension_id: String,
    current_tab: Mutex<Option<Tab>>,
    capture: Mutex<Option<(String, f64)>>,
    actions: Mutex<Vec<ChromeAction>>,
}

impl HeadlessChrome {
    pub fn new(extension_id: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            current_tab: Mutex::new(None),
            capture: Mutex::new(None),
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn set_current_tab(&self, tab: Option<Tab>) {
        *self.current_tab.lock().unwrap_or_else(PoisonError::into_inner) = tab;
    }

    /// What the next capture returns, and the zoom it was taken at.
    pub fn set_capture(&self, data_url: impl Into<String>, zoom_factor: f64) {
        *self.capture.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((data_url.into(), zoom_factor));
    }

    pub fn actions(&self) -> Vec<ChromeAction> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, action: ChromeAction) {
        info!(?action, "browser action");
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }
}

impl BrowserChrome for HeadlessChrome {
    fn extension_id(&self) -> &str {
        &self.extension_id
    }

    fn current_tab(&self) -> BoxFuture<'_, Option<Tab>> {
        let tab = self
            .current_tab
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Box::pin(async move { tab })
    }

    fn capture_visible_tab(&self, _window_id: u64) -> BoxFuture<'_, Option<String>> {
        let capture = self
            .capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(data_url, _)| data_url.clone());
        Box::pin(async move { capture })
    }

    fn zoom_factor(&self, _tab_id: u64) -> BoxFuture<'_, f64> {
        let zoom = self
            .capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(1.0, |(_, zoom)| *zoom);
        Box::pin(async move { zoom })
    }

    fn set_icon<'a>(&'a self, tab_id: u64, path: &'a str) -> BoxFuture<'a, Result<()>> {
        self.record(ChromeAction::SetIcon {
            tab_id,
            path: path.to_string(),
        });
        Box::pin(async { Ok(()) })
    }

    fn open_popup(&self, popup: PopupWindow) -> BoxFuture<'_, Result<()>> {
        self.record(ChromeAction::OpenPopup(popup));
        Box::pin(async { Ok(()) })
    }

    fn open_tab<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>> {
        self.record(ChromeAction::OpenTab(url.to_string()));
        Box::pin(async { Ok(()) })
    }
}
