//! Transient overlay bound to one page element: a delayed loading spinner,
//! a header line and system messages with action buttons.
//!
//! The overlay follows its element through page change notifications and
//! takes itself down when the element goes away, is hidden, or has its
//! `src` swapped.

pub mod messages;

pub use messages::{
    FETCH_ERROR_MESSAGE, HeaderMessage, OUT_OF_QUOTA_MESSAGE, OverlayAction, OverlayContent,
    QUEUED_MESSAGE, SITE_ACCESS_ERROR_MESSAGE, SystemMessage,
};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::page::{
    ChangeKind, ElementChange, ElementId, ObserveTarget, OverlayId, OverlaySurface, PageEvent,
    PageHost, Subscription,
};

/// Requests answered faster than this never show a spinner.
pub const SPINNER_DELAY: Duration = Duration::from_millis(500);

static NEXT_OVERLAY_ID: AtomicU64 = AtomicU64::new(1);

pub type OverlayHook = Box<dyn Fn() + Send + Sync>;

/// Callbacks into the owner of the overlay.
pub struct OverlayHooks {
    /// The element was detached, hidden, or had its `src` replaced.
    pub on_removed: OverlayHook,
    /// The element moved, resized, or the page mutated around it.
    pub on_changed: OverlayHook,
}

impl OverlayHooks {
    pub fn none() -> Self {
        Self {
            on_removed: Box::new(|| {}),
            on_changed: Box::new(|| {}),
        }
    }
}

struct Shared {
    id: OverlayId,
    element: ElementId,
    host: Arc<dyn PageHost>,
    surface: Arc<dyn OverlaySurface>,
    content: Mutex<OverlayContent>,
    spinner: Mutex<Option<JoinHandle<()>>>,
    removed: AtomicBool,
    closed: Notify,
    hooks: OverlayHooks,
}

#[derive(Clone)]
pub struct Overlay {
    shared: Arc<Shared>,
}

impl Overlay {
    /// Mounts an overlay over `element`. `None` when the element has no
    /// geometry (already gone). Must be called inside a tokio runtime.
    pub fn create(
        host: Arc<dyn PageHost>,
        surface: Arc<dyn OverlaySurface>,
        element: ElementId,
        hooks: OverlayHooks,
    ) -> Option<Self> {
        let bounds = host.bounds(element)?;
        let id = OverlayId(NEXT_OVERLAY_ID.fetch_add(1, Ordering::Relaxed));
        surface.mount(id, bounds);

        let element_changes = host.observe(
            ObserveTarget::Element(element),
            &[ChangeKind::Resize, ChangeKind::Intersection, ChangeKind::Attributes],
        );
        let document_changes = host.observe(ObserveTarget::Document, &[ChangeKind::Subtree]);

        let shared = Arc::new(Shared {
            id,
            element,
            host,
            surface,
            content: Mutex::new(OverlayContent::default()),
            spinner: Mutex::new(None),
            removed: AtomicBool::new(false),
            closed: Notify::new(),
            hooks,
        });
        tokio::spawn(follow_element(
            Arc::clone(&shared),
            element_changes,
            document_changes,
        ));
        Some(Self { shared })
    }

    pub fn id(&self) -> OverlayId {
        self.shared.id
    }

    pub fn element(&self) -> ElementId {
        self.shared.element
    }

    pub fn is_removed(&self) -> bool {
        self.shared.removed.load(Ordering::SeqCst)
    }

    pub fn content(&self) -> OverlayContent {
        self.shared.lock_content().clone()
    }

    /// Turning loading on shows the spinner only once [`SPINNER_DELAY`] has
    /// passed; turning it off cancels a pending spinner.
    pub fn set_loading(&self, loading: bool) {
        let previous = self
            .shared
            .spinner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pending) = previous {
            pending.abort();
        }

        if loading {
            let shared = Arc::clone(&self.shared);
            let pending = tokio::spawn(async move {
                tokio::time::sleep(SPINNER_DELAY).await;
                shared.update(|content| content.spinner = true);
            });
            *self
                .shared
                .spinner
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(pending);
        } else {
            self.shared.update(|content| content.spinner = false);
        }
    }

    /// Replaces any previous header.
    pub fn display_header_message(&self, text: &str, font_family: &str) {
        let header = HeaderMessage {
            text: text.to_string(),
            font_family: font_family.to_string(),
        };
        self.shared.update(|content| content.header = Some(header));
    }

    pub fn remove_header_message(&self) {
        self.shared.update(|content| content.header = None);
    }

    pub fn add_system_message(&self, text: &str, actions: &[OverlayAction], font_family: &str) {
        let message = SystemMessage {
            text: text.to_string(),
            actions: actions.to_vec(),
            font_family: font_family.to_string(),
        };
        self.shared.update(|content| content.messages.push(message));
    }

    /// Takes the overlay down without notifying the owner.
    pub fn remove(&self) {
        self.shared.detach();
    }
}

impl Shared {
    fn lock_content(&self) -> std::sync::MutexGuard<'_, OverlayContent> {
        self.content.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, change: impl FnOnce(&mut OverlayContent)) {
        if self.removed.load(Ordering::SeqCst) {
            return;
        }
        let snapshot = {
            let mut content = self.lock_content();
            change(&mut content);
            content.clone()
        };
        self.surface.render(self.id, &snapshot);
    }

    /// Returns false when the overlay was already detached.
    fn detach(&self) -> bool {
        if self.removed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(pending) = self
            .spinner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pending.abort();
        }
        self.surface.unmount(self.id);
        self.closed.notify_one();
        true
    }

    fn reposition(&self) {
        if let Some(bounds) = self.host.bounds(self.element) {
            self.surface.reposition(self.id, bounds);
        }
        (self.hooks.on_changed)();
    }

    fn element_gone(&self) -> bool {
        self.host
            .probe(self.element)
            .is_none_or(|probe| !probe.attached || probe.is_hidden())
    }
}

enum Source {
    Element,
    Document,
}

async fn follow_element(
    shared: Arc<Shared>,
    mut element_changes: Subscription,
    mut document_changes: Subscription,
) {
    loop {
        let (source, event) = tokio::select! {
            _ = shared.closed.notified() => break,
            Some(event) = element_changes.next() => (Source::Element, event),
            Some(event) = document_changes.next() => (Source::Document, event),
            else => break,
        };
        if shared.removed.load(Ordering::SeqCst) {
            break;
        }
        if invalidates(&shared, &source, &event) {
            debug!(element = %shared.element, change = ?event.change, "overlay invalidated");
            if shared.detach() {
                (shared.hooks.on_removed)();
            }
            break;
        }
        shared.reposition();
    }
}

fn invalidates(shared: &Shared, source: &Source, event: &PageEvent) -> bool {
    if shared.element_gone() {
        return true;
    }
    match (source, &event.change) {
        (Source::Element, ElementChange::AttributeChanged(name)) => name == "src",
        (Source::Document, ElementChange::NodesRemoved(nodes)) => nodes.contains(&shared.element),
        _ => false,
    }
}
