//! What the pipeline needs from a rendered page.
//!
//! A page embedding exposes its DOM through [`PageHost`] and draws overlays
//! through [`OverlaySurface`]. Elements are opaque handles; their observable
//! state is read as an [`ElementProbe`] snapshot.

use futures_util::future::BoxFuture;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Style values relevant to classification, inline and computed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleProbe {
    pub inline_background_image: String,
    pub inline_background: String,
    pub computed_background_image: String,
    pub computed_background: String,
    pub visibility: String,
    pub display: String,
}

/// Snapshot of one element's observable state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementProbe {
    /// Lowercase tag name.
    pub tag: String,
    pub src: Option<String>,
    /// Displayed size for images, bitmap size for canvases.
    pub width: u32,
    pub height: u32,
    pub natural_width: u32,
    pub natural_height: u32,
    /// Image finished loading.
    pub complete: bool,
    pub client_width: u32,
    pub client_height: u32,
    pub style: StyleProbe,
    pub hidden: bool,
    /// Still part of the document body.
    pub attached: bool,
}

impl ElementProbe {
    pub fn is_image(&self) -> bool {
        self.tag.eq_ignore_ascii_case("img")
    }

    pub fn is_canvas(&self) -> bool {
        self.tag.eq_ignore_ascii_case("canvas")
    }

    /// Hidden by attribute or inline style.
    pub fn is_hidden(&self) -> bool {
        self.hidden || self.style.visibility == "hidden" || self.style.display == "none"
    }
}

/// Page geometry of an element's content box, scroll offsets included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub top: f32,
    pub left: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Resize,
    Intersection,
    Attributes,
    /// Insertions and removals anywhere below the target.
    Subtree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveTarget {
    Document,
    Element(ElementId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementChange {
    Resized,
    IntersectionChanged,
    AttributeChanged(String),
    NodesAdded(Vec<ElementId>),
    NodesRemoved(Vec<ElementId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageEvent {
    /// The element the change happened on, if any.
    pub target: Option<ElementId>,
    pub change: ElementChange,
}

/// Change notifications for one observation. Dropping it cancels the
/// observation; `cancel` does so explicitly.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<PageEvent>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<PageEvent>,
        on_cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Next notification, or `None` once the page stops delivering.
    pub async fn next(&mut self) -> Option<PageEvent> {
        self.events.recv().await
    }

    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
        self.events.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

/// The pixels behind an element could not be read back, typically because
/// cross-origin content tainted them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelsUnavailable;

/// A mutation the pipeline applies to an element.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEdit {
    SetSrc(String),
    SetBackgroundImage(String),
    /// Resize the canvas to the image and draw it at the origin.
    PaintCanvas(RgbaImage),
    /// `data-original-src`, used to revert translations.
    SetOriginalSrc(Option<String>),
    /// Drop `<source>` siblings inside a `<picture>` parent.
    RemovePictureSources,
}

pub trait PageHost: Send + Sync {
    fn hostname(&self) -> String;

    /// Every element currently in the document, in document order.
    fn elements(&self) -> Vec<ElementId>;

    /// `None` once the element no longer exists.
    fn probe(&self, id: ElementId) -> Option<ElementProbe>;

    fn bounds(&self, id: ElementId) -> Option<Bounds>;

    /// Full-resolution pixels: an image at its natural size, a canvas bitmap,
    /// or the decoded background image.
    fn read_pixels(&self, id: ElementId) -> BoxFuture<'_, Result<RgbaImage, PixelsUnavailable>>;

    fn apply(&self, id: ElementId, edit: PageEdit) -> anyhow::Result<()>;

    fn observe(&self, target: ObserveTarget, kinds: &[ChangeKind]) -> Subscription;

    fn open_url(&self, url: &str);
}

/// Identifies one overlay drawn by an [`OverlaySurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverlayId(pub u64);

/// Isolated drawing layer above the page (a shadow root in a browser).
pub trait OverlaySurface: Send + Sync {
    /// Whether the root layer still exists. Toggling translations off
    /// removes it.
    fn has_root(&self) -> bool;

    fn create_root(&self);

    fn mount(&self, overlay: OverlayId, bounds: Bounds);

    fn reposition(&self, overlay: OverlayId, bounds: Bounds);

    fn render(&self, overlay: OverlayId, content: &crate::overlay::OverlayContent);

    fn unmount(&self, overlay: OverlayId);

    /// Removes every overlay artifact this crate ever drew.
    fn unmount_all(&self);
}
