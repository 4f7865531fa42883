//! Region translation: the user selects a rectangle of the visible tab, the
//! background captures and translates it, and the labels are laid out over
//! the selection in percentages so they follow the panel.

use anyhow::Result;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::languages;
use crate::messaging::{self, BackgroundMessage, MessageBus, SnapshotDimensions, SnapshotReply};
use crate::models::{DEFAULT_FONT_COLOR, DEFAULT_FONT_STROKE_COLOR};
use crate::overlay::{OUT_OF_QUOTA_MESSAGE, OverlayAction};
use crate::settings::ConfigStore;

/// Quiet period after the last page interaction before a new snapshot.
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(1500);
/// Lets the page repaint without the old labels before it is captured.
pub const SCREEN_CLEAR_DELAY: Duration = Duration::from_millis(400);

const QUOTA_LABEL_OFFSET_PX: f64 = 6.0;
const QUOTA_LABEL_SIZE_PX: f64 = 200.0;
const QUOTA_LABEL_FONT_SIZE: f32 = 30.0;
const QUOTA_LABEL_COLOR: &str = "#976353";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Length {
    Percent(f64),
    Px(f64),
}

/// One label positioned inside the panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelLabel {
    pub text: String,
    pub top: Length,
    pub left: Length,
    pub width: Length,
    pub height: Length,
    pub background: Option<String>,
    pub font_color: String,
    pub font_stroke_color: String,
    pub font_family: String,
    pub font_size: Option<f32>,
    pub actions: Vec<OverlayAction>,
}

/// Rounds to two decimals, half away from zero, after trimming binary noise
/// to 15 significant digits.
pub fn round2(value: f64) -> f64 {
    let scaled = value.abs() * 100.0;
    let trimmed = format!("{:.14e}", scaled).parse().unwrap_or(scaled);
    let rounded: f64 = f64::round(trimmed) / 100.0;
    if value < 0.0 { -rounded } else { rounded }
}

/// Lays out snapshot results over a panel of `panel_width` by
/// `panel_height` CSS pixels.
///
/// Boxes come back in device pixels of the capture, so percentages are
/// divided by the zoom factor.
pub fn place_labels(
    reply: &SnapshotReply,
    panel_width: f64,
    panel_height: f64,
    font_family: &str,
    ui_font: &str,
) -> Vec<PanelLabel> {
    let zoom = 1.0 / reply.zoom_factor;
    let percent = |value: f32, extent: f64| Length::Percent(round2(zoom * (value as f64 / extent) * 100.0));
    reply
        .translations
        .iter()
        .map(|text_box| {
            if text_box.is_out_of_quota() {
                return quota_label(ui_font);
            }
            PanelLabel {
                text: text_box.translated_text.clone(),
                top: percent(text_box.min_y, panel_height),
                left: percent(text_box.min_x, panel_width),
                width: percent(text_box.width(), panel_width),
                height: percent(text_box.height(), panel_height),
                background: text_box.background.clone(),
                font_color: color_or(&text_box.font_color, DEFAULT_FONT_COLOR),
                font_stroke_color: color_or(&text_box.font_stroke_color, DEFAULT_FONT_STROKE_COLOR),
                font_family: font_family.to_string(),
                font_size: text_box.font_height_px,
                actions: Vec::new(),
            }
        })
        .collect()
}

fn color_or(color: &Option<String>, fallback: &str) -> String {
    color.clone().unwrap_or_else(|| fallback.to_string())
}

// Pinned to the panel corner, not to capture coordinates.
fn quota_label(ui_font: &str) -> PanelLabel {
    PanelLabel {
        text: OUT_OF_QUOTA_MESSAGE.to_string(),
        top: Length::Px(QUOTA_LABEL_OFFSET_PX),
        left: Length::Px(QUOTA_LABEL_OFFSET_PX),
        width: Length::Px(QUOTA_LABEL_SIZE_PX),
        height: Length::Px(QUOTA_LABEL_SIZE_PX),
        background: None,
        font_color: QUOTA_LABEL_COLOR.to_string(),
        font_stroke_color: DEFAULT_FONT_STROKE_COLOR.to_string(),
        font_family: ui_font.to_string(),
        font_size: Some(QUOTA_LABEL_FONT_SIZE),
        actions: vec![OverlayAction::Upgrade, OverlayAction::Login],
    }
}

#[derive(Default)]
struct PanelState {
    request_number: u64,
    loading: bool,
    labels: Vec<PanelLabel>,
}

struct PanelInner {
    bus: Arc<dyn MessageBus>,
    config: Arc<dyn ConfigStore>,
    region: SnapshotDimensions,
    ui_font: String,
    state: Mutex<PanelState>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

/// A selected region of the tab kept translated as the page changes.
#[derive(Clone)]
pub struct SnapshotPanel {
    inner: Arc<PanelInner>,
}

impl SnapshotPanel {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        config: Arc<dyn ConfigStore>,
        region: SnapshotDimensions,
    ) -> Self {
        Self {
            inner: Arc::new(PanelInner {
                bus,
                config,
                region,
                ui_font: languages::ui_font_family(&languages::system_locale()).to_string(),
                state: Mutex::new(PanelState::default()),
                pending: Mutex::new(None),
            }),
        }
    }

    pub fn region(&self) -> SnapshotDimensions {
        self.inner.region
    }

    pub fn labels(&self) -> Vec<PanelLabel> {
        self.lock_state().labels.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock_state().loading
    }

    /// Call on every click, key press, scroll or resize. The snapshot is
    /// retaken once interactions stop for [`DEBOUNCE_DELAY`].
    pub fn trigger(&self) {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = pending.take() {
            timer.abort();
        }
        let panel = self.clone();
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE_DELAY).await;
            // Detached so a later trigger cannot cancel a request in flight.
            tokio::spawn(async move {
                if let Err(err) = panel.refresh().await {
                    warn!("snapshot translation failed: {:#}", err);
                }
            });
        }));
    }

    /// Retakes the snapshot now. Returns false when a newer request started
    /// while this one was out, in which case its reply is discarded.
    pub async fn refresh(&self) -> Result<bool> {
        let request_number = {
            let mut state = self.lock_state();
            state.request_number += 1;
            state.labels.clear();
            state.request_number
        };

        tokio::time::sleep(SCREEN_CLEAR_DELAY).await;
        self.lock_state().loading = true;

        let message = BackgroundMessage::TranslateSnapshot {
            dimensions: self.inner.region,
            translate_to: self.inner.config.target_language()?,
            translation_model: self.inner.config.translation_model()?,
            request_number: Some(request_number),
        };
        let reply = messaging::request_snapshot(self.inner.bus.as_ref(), &message).await;

        if self.lock_state().request_number != request_number {
            debug!(request_number, "discarding superseded snapshot");
            return Ok(false);
        }
        self.lock_state().loading = false;

        let Some(reply) = reply? else {
            return Ok(true);
        };
        let font_family = self.inner.config.font_family()?;
        let labels = place_labels(
            &reply,
            self.inner.region.width as f64,
            self.inner.region.height as f64,
            &font_family,
            &self.inner.ui_font,
        );
        let mut state = self.lock_state();
        if state.request_number == request_number {
            state.labels = labels;
        }
        Ok(true)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PanelState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
