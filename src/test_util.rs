#[cfg(test)]
pub(crate) fn with_temp_home<F, R>(func: F) -> R
where
    F: FnOnce(&std::path::Path) -> R,
{
    static HOME_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
    let _guard = HOME_MUTEX
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let dir = tempfile::tempdir().expect("tempdir");
    let old_home = std::env::var("HOME").ok();
    let old_base = std::env::var(crate::settings::API_BASE_ENV).ok();
    // SAFETY: callers are serialized by HOME_MUTEX.
    unsafe {
        std::env::set_var("HOME", dir.path());
        std::env::remove_var(crate::settings::API_BASE_ENV);
    }
    let result = func(dir.path());
    unsafe {
        match old_home {
            Some(old) => std::env::set_var("HOME", old),
            None => std::env::remove_var("HOME"),
        }
        if let Some(old) = old_base {
            std::env::set_var(crate::settings::API_BASE_ENV, old);
        }
    }
    result
}

use image::RgbaImage;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::overlay::OverlayContent;
use crate::page::{
    Bounds, ChangeKind, ElementChange, ElementId, ElementProbe, ObserveTarget, OverlayId,
    OverlaySurface, PageEdit, PageEvent, PageHost, PixelsUnavailable, Subscription,
};

struct FakeElement {
    probe: ElementProbe,
    bounds: Bounds,
    pixels: Option<RgbaImage>,
    original_src: Option<String>,
}

/// In-memory page with a single overlay layer.
pub(crate) struct FakePage {
    host: String,
    elements: Mutex<BTreeMap<ElementId, FakeElement>>,
    observers: Mutex<Vec<(ObserveTarget, mpsc::UnboundedSender<PageEvent>)>>,
    edits: Mutex<Vec<(ElementId, PageEdit)>>,
    opened: Mutex<Vec<String>>,
    root: AtomicBool,
    overlays: Mutex<HashMap<OverlayId, (Bounds, Option<OverlayContent>)>>,
    unmount_all_calls: AtomicUsize,
    edit_hook: Mutex<Option<EditHook>>,
}

type EditHook = Box<dyn Fn(ElementId, &PageEdit) + Send + Sync>;

impl FakePage {
    pub(crate) fn new(host: &str) -> Arc<Self> {
        Arc::new(Self {
            host: host.to_string(),
            elements: Mutex::new(BTreeMap::new()),
            observers: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            root: AtomicBool::new(false),
            overlays: Mutex::new(HashMap::new()),
            unmount_all_calls: AtomicUsize::new(0),
            edit_hook: Mutex::new(None),
        })
    }

    fn insert(&self, id: u64, probe: ElementProbe, pixels: Option<RgbaImage>) -> ElementId {
        let id = ElementId(id);
        let bounds = Bounds {
            top: 0.0,
            left: 0.0,
            width: probe.width.max(probe.client_width) as f32,
            height: probe.height.max(probe.client_height) as f32,
        };
        self.elements.lock().unwrap().insert(
            id,
            FakeElement {
                probe,
                bounds,
                pixels,
                original_src: None,
            },
        );
        id
    }

    /// A loaded `<img>` whose pixels are unreadable until [`Self::set_pixels`].
    pub(crate) fn add_image(&self, id: u64, src: &str, width: u32, height: u32) -> ElementId {
        self.insert(
            id,
            ElementProbe {
                tag: "img".to_string(),
                src: Some(src.to_string()),
                width,
                height,
                natural_width: width,
                natural_height: height,
                complete: true,
                client_width: width,
                client_height: height,
                attached: true,
                ..ElementProbe::default()
            },
            None,
        )
    }

    pub(crate) fn add_canvas(&self, id: u64, pixels: RgbaImage) -> ElementId {
        self.insert(
            id,
            ElementProbe {
                tag: "canvas".to_string(),
                width: pixels.width(),
                height: pixels.height(),
                client_width: pixels.width(),
                client_height: pixels.height(),
                attached: true,
                ..ElementProbe::default()
            },
            Some(pixels),
        )
    }

    pub(crate) fn add_background(&self, id: u64, url: &str, width: u32, height: u32) -> ElementId {
        let mut probe = ElementProbe {
            tag: "div".to_string(),
            client_width: width,
            client_height: height,
            attached: true,
            ..ElementProbe::default()
        };
        probe.style.inline_background_image = format!("url(\"{}\")", url);
        self.insert(id, probe, None)
    }

    pub(crate) fn set_pixels(&self, id: ElementId, pixels: RgbaImage) {
        if let Some(element) = self.elements.lock().unwrap().get_mut(&id) {
            element.pixels = Some(pixels);
        }
    }

    /// Pixels read back as tainted from now on.
    pub(crate) fn set_pixels_unavailable(&self, id: ElementId) {
        if let Some(element) = self.elements.lock().unwrap().get_mut(&id) {
            element.pixels = None;
        }
    }

    /// Draws over a canvas the way page script would, without notifications.
    pub(crate) fn repaint(&self, id: ElementId, pixels: RgbaImage) {
        self.set_pixels(id, pixels);
    }

    pub(crate) fn update_probe(&self, id: ElementId, change: impl FnOnce(&mut ElementProbe)) {
        if let Some(element) = self.elements.lock().unwrap().get_mut(&id) {
            change(&mut element.probe);
        }
        self.emit_element(id, ElementChange::AttributeChanged("style".to_string()));
    }

    pub(crate) fn move_element(&self, id: ElementId, bounds: Bounds) {
        if let Some(element) = self.elements.lock().unwrap().get_mut(&id) {
            element.bounds = bounds;
        }
        self.emit_element(id, ElementChange::Resized);
    }

    pub(crate) fn detach(&self, id: ElementId) {
        if let Some(element) = self.elements.lock().unwrap().get_mut(&id) {
            element.probe.attached = false;
        }
        self.emit_document(ElementChange::NodesRemoved(vec![id]));
    }

    /// Announces elements added with `add_*` as freshly inserted nodes.
    pub(crate) fn announce_inserted(&self, ids: Vec<ElementId>) {
        self.emit_document(ElementChange::NodesAdded(ids));
    }

    pub(crate) fn resize(&self, id: ElementId, width: u32, height: u32) {
        if let Some(element) = self.elements.lock().unwrap().get_mut(&id) {
            element.probe.width = width;
            element.probe.height = height;
            element.probe.client_width = width;
            element.probe.client_height = height;
            element.bounds.width = width as f32;
            element.bounds.height = height as f32;
        }
        self.emit_element(id, ElementChange::Resized);
    }

    pub(crate) fn probe_of(&self, id: ElementId) -> ElementProbe {
        self.elements.lock().unwrap()[&id].probe.clone()
    }

    pub(crate) fn pixels_of(&self, id: ElementId) -> Option<RgbaImage> {
        self.elements.lock().unwrap()[&id].pixels.clone()
    }

    pub(crate) fn original_src_of(&self, id: ElementId) -> Option<String> {
        self.elements.lock().unwrap()[&id].original_src.clone()
    }

    pub(crate) fn edits_for(&self, id: ElementId) -> Vec<PageEdit> {
        self.edits
            .lock()
            .unwrap()
            .iter()
            .filter(|(target, _)| *target == id)
            .map(|(_, edit)| edit.clone())
            .collect()
    }

    pub(crate) fn opened_urls(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub(crate) fn rendered(&self, overlay: OverlayId) -> Option<OverlayContent> {
        self.overlays
            .lock()
            .unwrap()
            .get(&overlay)
            .and_then(|(_, content)| content.clone())
    }

    /// Every overlay currently mounted, with what it shows.
    pub(crate) fn overlay_contents(&self) -> Vec<OverlayContent> {
        self.overlays
            .lock()
            .unwrap()
            .values()
            .map(|(_, content)| content.clone().unwrap_or_default())
            .collect()
    }

    pub(crate) fn is_mounted(&self, overlay: OverlayId) -> bool {
        self.overlays.lock().unwrap().contains_key(&overlay)
    }

    pub(crate) fn mounted_bounds(&self, overlay: OverlayId) -> Option<Bounds> {
        self.overlays
            .lock()
            .unwrap()
            .get(&overlay)
            .map(|(bounds, _)| *bounds)
    }

    pub(crate) fn remove_root(&self) {
        self.root.store(false, Ordering::SeqCst);
    }

    /// Runs `hook` on every applied edit, before change notifications go out.
    pub(crate) fn on_edit(&self, hook: impl Fn(ElementId, &PageEdit) + Send + Sync + 'static) {
        *self.edit_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Live observations of `target`.
    pub(crate) fn observer_count(&self, target: ObserveTarget) -> usize {
        self.observers
            .lock()
            .unwrap()
            .iter()
            .filter(|(observed, sender)| *observed == target && !sender.is_closed())
            .count()
    }

    pub(crate) fn unmount_all_calls(&self) -> usize {
        self.unmount_all_calls.load(Ordering::SeqCst)
    }

    fn emit_element(&self, id: ElementId, change: ElementChange) {
        self.emit(ObserveTarget::Element(id), Some(id), change);
    }

    fn emit_document(&self, change: ElementChange) {
        self.emit(ObserveTarget::Document, None, change);
    }

    fn emit(&self, target: ObserveTarget, element: Option<ElementId>, change: ElementChange) {
        self.observers.lock().unwrap().retain(|(observed, sender)| {
            if *observed != target {
                return !sender.is_closed();
            }
            sender
                .send(PageEvent {
                    target: element,
                    change: change.clone(),
                })
                .is_ok()
        });
    }
}

impl PageHost for FakePage {
    fn hostname(&self) -> String {
        self.host.clone()
    }

    fn elements(&self) -> Vec<ElementId> {
        self.elements
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, element)| element.probe.attached)
            .map(|(id, _)| *id)
            .collect()
    }

    fn probe(&self, id: ElementId) -> Option<ElementProbe> {
        self.elements
            .lock()
            .unwrap()
            .get(&id)
            .map(|element| element.probe.clone())
    }

    fn bounds(&self, id: ElementId) -> Option<Bounds> {
        self.elements
            .lock()
            .unwrap()
            .get(&id)
            .map(|element| element.bounds)
    }

    fn read_pixels(
        &self,
        id: ElementId,
    ) -> futures_util::future::BoxFuture<'_, Result<RgbaImage, PixelsUnavailable>> {
        let pixels = self
            .elements
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|element| element.pixels.clone());
        Box::pin(async move { pixels.ok_or(PixelsUnavailable) })
    }

    fn apply(&self, id: ElementId, edit: PageEdit) -> anyhow::Result<()> {
        let notify = {
            let mut elements = self.elements.lock().unwrap();
            let element = elements
                .get_mut(&id)
                .ok_or_else(|| anyhow::anyhow!("no element {}", id))?;
            match &edit {
                PageEdit::SetSrc(src) => {
                    element.probe.src = Some(src.clone());
                    Some("src")
                }
                PageEdit::SetBackgroundImage(url) => {
                    element.probe.style.inline_background_image = format!("url(\"{}\")", url);
                    Some("style")
                }
                PageEdit::PaintCanvas(pixels) => {
                    element.probe.width = pixels.width();
                    element.probe.height = pixels.height();
                    element.pixels = Some(pixels.clone());
                    None
                }
                PageEdit::SetOriginalSrc(original) => {
                    element.original_src = original.clone();
                    Some("data-original-src")
                }
                PageEdit::RemovePictureSources => None,
            }
        };
        if let Some(hook) = self.edit_hook.lock().unwrap().as_ref() {
            hook(id, &edit);
        }
        self.edits.lock().unwrap().push((id, edit));
        if let Some(attribute) = notify {
            self.emit_element(id, ElementChange::AttributeChanged(attribute.to_string()));
        }
        Ok(())
    }

    fn observe(&self, target: ObserveTarget, _kinds: &[ChangeKind]) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.observers.lock().unwrap().push((target, sender));
        Subscription::new(receiver, || {})
    }

    fn open_url(&self, url: &str) {
        self.opened.lock().unwrap().push(url.to_string());
    }
}

impl OverlaySurface for FakePage {
    fn has_root(&self) -> bool {
        self.root.load(Ordering::SeqCst)
    }

    fn create_root(&self) {
        self.root.store(true, Ordering::SeqCst);
    }

    fn mount(&self, overlay: OverlayId, bounds: Bounds) {
        self.overlays.lock().unwrap().insert(overlay, (bounds, None));
    }

    fn reposition(&self, overlay: OverlayId, bounds: Bounds) {
        if let Some(entry) = self.overlays.lock().unwrap().get_mut(&overlay) {
            entry.0 = bounds;
        }
    }

    fn render(&self, overlay: OverlayId, content: &OverlayContent) {
        if let Some(entry) = self.overlays.lock().unwrap().get_mut(&overlay) {
            entry.1 = Some(content.clone());
        }
    }

    fn unmount(&self, overlay: OverlayId) {
        self.overlays.lock().unwrap().remove(&overlay);
    }

    fn unmount_all(&self) {
        self.unmount_all_calls.fetch_add(1, Ordering::SeqCst);
        self.root.store(false, Ordering::SeqCst);
        self.overlays.lock().unwrap().clear();
    }
}
