//! Finds translatable elements on an active page, sends them for
//! translation and swaps the translated image in.
//!
//! Each element is claimed before work starts so concurrent triggers (the
//! periodic scan, node insertion, image resize) handle it once. Overlay hooks
//! release the claim when the element is invalidated. Canvases are compared
//! against their pixel hash around every suspension point, since page script
//! may redraw them at any time.

pub mod claims;
pub mod classify;

pub use claims::{ClaimRegistry, OriginalRecord};
pub use classify::{ElementKind, background_url, classify, element_kind};

use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::resize::encode_pixels;
use crate::client::{MAX_UPLOAD_PX, calculate_resized_aspect_ratio};
use crate::compositor::{Compositor, encode_image};
use crate::data_url;
use crate::hash::{fast_hash, hash_pixels};
use crate::languages::{self, DEFAULT_FONT_FAMILY};
use crate::messaging::{self, BackgroundMessage, ImageReply, MessageBus};
use crate::models::{ImageDescriptor, TranslationResults};
use crate::overlay::{
    FETCH_ERROR_MESSAGE, OUT_OF_QUOTA_MESSAGE, Overlay, OverlayAction, OverlayHooks,
    QUEUED_MESSAGE, SITE_ACCESS_ERROR_MESSAGE,
};
use crate::page::{
    ChangeKind, ElementChange, ElementId, ElementProbe, ObserveTarget, OverlaySurface, PageEdit,
    PageHost,
};
use crate::settings::ConfigStore;

/// How often the page is rescanned.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(1000);
/// How long to wait before asking again after a `FullQueue` reply.
pub const QUEUE_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// How one pass over an element ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementOutcome {
    /// Already claimed, gone, or not an image-bearing element.
    Skipped,
    /// The element already shows a translation.
    AlreadyTranslated,
    /// Canvas content changed while the request was out.
    Invalidated,
    NoTranslations,
    FetchError,
    SiteAccessError,
    OutOfQuota,
    Translated,
    Failed,
}

#[derive(Clone)]
pub struct ElementWatcher {
    host: Arc<dyn PageHost>,
    surface: Arc<dyn OverlaySurface>,
    bus: Arc<dyn MessageBus>,
    config: Arc<dyn ConfigStore>,
    compositor: Arc<Compositor>,
    claims: Arc<ClaimRegistry>,
    ui_font: String,
}

impl ElementWatcher {
    pub fn new(
        host: Arc<dyn PageHost>,
        surface: Arc<dyn OverlaySurface>,
        bus: Arc<dyn MessageBus>,
        config: Arc<dyn ConfigStore>,
        compositor: Arc<Compositor>,
    ) -> Self {
        Self {
            host,
            surface,
            bus,
            config,
            compositor,
            claims: Arc::new(ClaimRegistry::new()),
            ui_font: languages::ui_font_family(&languages::system_locale()).to_string(),
        }
    }

    pub fn claims(&self) -> &Arc<ClaimRegistry> {
        &self.claims
    }

    fn is_active(&self) -> bool {
        let hostname = self.host.hostname();
        match self.config.is_active_host(&hostname) {
            Ok(active) => active,
            Err(err) => {
                warn!("failed to read active sites: {:#}", err);
                false
            }
        }
    }

    /// Scans the whole page once. Returns the spawned translations.
    pub fn on_page_inject(&self) -> Vec<JoinHandle<ElementOutcome>> {
        if !self.is_active() {
            return Vec::new();
        }
        if !self.surface.has_root() {
            // Translations were toggled off, which tore the overlay layer down.
            self.claims.clear_claims();
            self.surface.create_root();
        }
        self.host
            .elements()
            .into_iter()
            .filter(|id| {
                self.host
                    .probe(*id)
                    .is_some_and(|probe| classify(&probe).is_some())
            })
            .filter(|id| !self.claims.is_claimed(*id))
            .map(|id| self.spawn_translate(id))
            .collect()
    }

    /// Scans on an interval and reacts to inserted and resized elements,
    /// until the page stops delivering notifications.
    pub async fn run(self) {
        let mut document = self
            .host
            .observe(ObserveTarget::Document, &[ChangeKind::Subtree]);
        let (resized_tx, mut resized_rx) = mpsc::unbounded_channel();
        let mut resize_watches = ResizeWatches::default();
        let mut interval = tokio::time::interval(RETRY_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.on_page_inject();
                }
                event = document.next() => match event {
                    Some(event) => match event.change {
                        ElementChange::NodesAdded(added) => {
                            self.on_nodes_added(&added, &resized_tx, &mut resize_watches);
                        }
                        ElementChange::NodesRemoved(removed) => {
                            for id in removed {
                                resize_watches.stop(id);
                            }
                        }
                        _ => {}
                    },
                    None => break,
                },
                Some(id) = resized_rx.recv() => self.on_resized(id),
            }
        }
        debug!("page stopped delivering changes; watcher exiting");
    }

    fn on_nodes_added(
        &self,
        added: &[ElementId],
        resized: &mpsc::UnboundedSender<ElementId>,
        resize_watches: &mut ResizeWatches,
    ) {
        if !self.is_active() {
            return;
        }
        for &id in added {
            let Some(probe) = self.host.probe(id) else {
                continue;
            };
            if probe.is_image() && !resize_watches.is_watching(id) {
                // Lazy loaders often size images after insertion.
                resize_watches.insert(id, self.watch_resize(id, resized.clone()));
            }
            if classify(&probe).is_some() {
                self.spawn_translate(id);
            }
        }
    }

    fn on_resized(&self, id: ElementId) {
        if self
            .host
            .probe(id)
            .is_some_and(|probe| classify(&probe).is_some())
        {
            self.spawn_translate(id);
        }
    }

    fn watch_resize(
        &self,
        id: ElementId,
        resized: mpsc::UnboundedSender<ElementId>,
    ) -> JoinHandle<()> {
        let mut changes = self
            .host
            .observe(ObserveTarget::Element(id), &[ChangeKind::Resize]);
        tokio::spawn(async move {
            while let Some(event) = changes.next().await {
                if event.change == ElementChange::Resized && resized.send(id).is_err() {
                    break;
                }
            }
        })
    }

    pub fn spawn_translate(&self, id: ElementId) -> JoinHandle<ElementOutcome> {
        let watcher = self.clone();
        tokio::spawn(async move {
            let outcome = watcher.translate_element(id).await;
            debug!(element = %id, ?outcome, "element pass finished");
            outcome
        })
    }

    /// Runs the full pipeline for one element.
    pub async fn translate_element(&self, id: ElementId) -> ElementOutcome {
        if !self.claims.claim(id) {
            return ElementOutcome::Skipped;
        }
        let Some((probe, kind)) = self
            .host
            .probe(id)
            .and_then(|probe| element_kind(&probe).map(|kind| (probe, kind)))
        else {
            self.claims.unclaim(id);
            return ElementOutcome::Skipped;
        };

        let current_hash = self.content_hash(id, kind, &probe).await;
        if self.claims.is_finished(&current_hash) {
            return ElementOutcome::AlreadyTranslated;
        }

        let Some(overlay) = Overlay::create(
            Arc::clone(&self.host),
            Arc::clone(&self.surface),
            id,
            self.invalidation_hooks(id, kind),
        ) else {
            self.claims.unclaim(id);
            return ElementOutcome::Skipped;
        };
        overlay.set_loading(true);

        let font_family = self.config.font_family().unwrap_or_else(|err| {
            warn!("failed to read font family: {:#}", err);
            DEFAULT_FONT_FAMILY.to_string()
        });

        if self.canvas_changed(id, kind, &current_hash).await {
            return self.invalidate(id, &overlay);
        }

        let reply = self
            .wait_for_translation(id, kind, &probe, &overlay, &font_family)
            .await;

        if self.canvas_changed(id, kind, &current_hash).await {
            return self.invalidate(id, &overlay);
        }

        overlay.set_loading(false);
        overlay.remove_header_message();

        let results = match reply {
            Ok(Some(ImageReply::Translated(results))) => results,
            Ok(Some(ImageReply::FetchError)) => {
                overlay.add_system_message(
                    FETCH_ERROR_MESSAGE,
                    &[OverlayAction::DownloadUnlocker],
                    &self.ui_font,
                );
                return ElementOutcome::FetchError;
            }
            Ok(Some(ImageReply::SiteAccessError)) => {
                overlay.add_system_message(
                    SITE_ACCESS_ERROR_MESSAGE,
                    &[OverlayAction::OpenSettings],
                    &self.ui_font,
                );
                return ElementOutcome::SiteAccessError;
            }
            Ok(Some(ImageReply::FullQueue)) | Ok(None) => return ElementOutcome::Failed,
            Err(err) => {
                warn!(element = %id, "translation failed: {:#}", err);
                return ElementOutcome::Failed;
            }
        };

        if results.translations.is_empty() {
            if kind == ElementKind::Canvas {
                self.claims.mark_finished(&current_hash);
            }
            return ElementOutcome::NoTranslations;
        }

        if results.is_out_of_quota() {
            overlay.add_system_message(
                OUT_OF_QUOTA_MESSAGE,
                &[OverlayAction::Upgrade, OverlayAction::Login],
                &self.ui_font,
            );
            return ElementOutcome::OutOfQuota;
        }

        let Some(sent) = results.base64_data.clone() else {
            warn!(element = %id, "translation reply carried no image data");
            return ElementOutcome::Failed;
        };
        let painted = match self.paint(kind, sent.clone(), results).await {
            Ok(painted) => painted,
            Err(err) => {
                warn!(element = %id, "failed to paint translations: {:#}", err);
                return ElementOutcome::Failed;
            }
        };

        if self.canvas_changed(id, kind, &current_hash).await {
            return self.invalidate(id, &overlay);
        }

        // Recorded before the swap: follower hooks may unclaim as soon as
        // the element changes.
        self.claims.mark_finished(&painted.content_hash());
        if let Err(err) = self.swap_in(id, kind, sent, painted) {
            warn!(element = %id, "failed to replace element image: {:#}", err);
            return ElementOutcome::Failed;
        }
        ElementOutcome::Translated
    }

    fn invalidation_hooks(&self, id: ElementId, kind: ElementKind) -> OverlayHooks {
        let on_removed = {
            let claims = Arc::clone(&self.claims);
            move || {
                claims.unclaim(id);
            }
        };
        let on_changed = {
            let claims = Arc::clone(&self.claims);
            move || {
                // Page script may have redrawn the canvas.
                if kind == ElementKind::Canvas {
                    claims.unclaim(id);
                }
            }
        };
        OverlayHooks {
            on_removed: Box::new(on_removed),
            on_changed: Box::new(on_changed),
        }
    }

    fn invalidate(&self, id: ElementId, overlay: &Overlay) -> ElementOutcome {
        debug!(element = %id, "canvas changed during translation");
        self.claims.unclaim(id);
        overlay.remove();
        ElementOutcome::Invalidated
    }

    async fn canvas_changed(&self, id: ElementId, kind: ElementKind, expected: &str) -> bool {
        if kind != ElementKind::Canvas {
            return false;
        }
        let Some(probe) = self.host.probe(id) else {
            return true;
        };
        self.content_hash(id, kind, &probe).await != expected
    }

    /// Fingerprint of what the element currently shows. Empty when there is
    /// nothing to fingerprint.
    async fn content_hash(&self, id: ElementId, kind: ElementKind, probe: &ElementProbe) -> String {
        match kind {
            ElementKind::Image => probe.src.as_deref().map(fast_hash).unwrap_or_default(),
            ElementKind::BackgroundElement => background_url(probe)
                .map(|url| fast_hash(&url))
                .unwrap_or_default(),
            ElementKind::Canvas => {
                if probe.width == 0 || probe.height == 0 {
                    return String::new();
                }
                match self.host.read_pixels(id).await {
                    Ok(pixels) => hash_pixels(pixels.as_raw()),
                    Err(_) => String::new(),
                }
            }
        }
    }

    async fn wait_for_translation(
        &self,
        id: ElementId,
        kind: ElementKind,
        probe: &ElementProbe,
        overlay: &Overlay,
        font_family: &str,
    ) -> Result<Option<ImageReply>> {
        let (width, height, base64_data) = self.read_element_image(id, kind, probe).await?;
        let src = match kind {
            ElementKind::Canvas => {
                // Tainted canvases can only be read by the unlocker.
                if base64_data.is_none() {
                    return Ok(Some(ImageReply::FetchError));
                }
                None
            }
            ElementKind::Image => probe.src.clone(),
            ElementKind::BackgroundElement => background_url(probe),
        };

        let message = BackgroundMessage::TranslateImage {
            image: ImageDescriptor {
                src,
                base64_data,
                width,
                height,
            },
            translate_to: self.config.target_language()?,
            translation_model: self.config.translation_model()?,
            include_base64_data: true,
        };

        loop {
            let reply = messaging::request_image_translation(self.bus.as_ref(), &message).await?;
            if reply != Some(ImageReply::FullQueue) {
                return Ok(reply);
            }
            overlay.display_header_message(QUEUED_MESSAGE, font_family);
            tokio::time::sleep(QUEUE_RETRY_DELAY).await;
        }
    }

    /// Reads the element's pixels as an upload-ready data URL. When the
    /// pixels cannot be read the natural size is reported with no data, and
    /// the background fetches the image itself.
    async fn read_element_image(
        &self,
        id: ElementId,
        kind: ElementKind,
        probe: &ElementProbe,
    ) -> Result<(u32, u32, Option<String>)> {
        let natural = match kind {
            ElementKind::Image => (probe.natural_width, probe.natural_height),
            ElementKind::Canvas => (probe.width, probe.height),
            ElementKind::BackgroundElement => (probe.client_width, probe.client_height),
        };
        let Ok(pixels) = self.host.read_pixels(id).await else {
            debug!(element = %id, "pixels unavailable, sending by url");
            return Ok((natural.0, natural.1, None));
        };
        let (width, height) = pixels.dimensions();
        let resized = calculate_resized_aspect_ratio(width, height, MAX_UPLOAD_PX, MAX_UPLOAD_PX);
        let encoded = tokio::task::spawn_blocking(move || encode_pixels(pixels, resized))
            .await
            .context("pixel encoding task failed")??;
        Ok((encoded.width, encoded.height, Some(encoded.data_url)))
    }

    async fn paint(
        &self,
        kind: ElementKind,
        sent: String,
        results: TranslationResults,
    ) -> Result<Painted> {
        let compositor = Arc::clone(&self.compositor);
        tokio::task::spawn_blocking(move || -> Result<Painted> {
            let (_, bytes) = data_url::decode(&sent)?;
            let composited = compositor.compose(&bytes, &results)?;
            Ok(match kind {
                ElementKind::Canvas => Painted::Pixels(composited.image),
                ElementKind::Image | ElementKind::BackgroundElement => {
                    let png = encode_image(&composited.image, "image/png")?;
                    Painted::DataUrl(data_url::encode("image/png", &png))
                }
            })
        })
        .await
        .context("compositing task failed")?
    }

    fn swap_in(&self, id: ElementId, kind: ElementKind, sent: String, painted: Painted) -> Result<()> {
        self.host
            .apply(id, PageEdit::SetOriginalSrc(Some(sent.clone())))?;
        self.claims
            .record_original(id, OriginalRecord { kind, data: sent });
        match (kind, painted) {
            (ElementKind::Canvas, Painted::Pixels(pixels)) => {
                self.host.apply(id, PageEdit::PaintCanvas(pixels))?;
            }
            (ElementKind::Image, Painted::DataUrl(url)) => {
                self.host.apply(id, PageEdit::SetSrc(url))?;
                // A <picture> parent would keep showing its <source> variants.
                self.host.apply(id, PageEdit::RemovePictureSources)?;
            }
            (ElementKind::BackgroundElement, Painted::DataUrl(url)) => {
                self.host.apply(id, PageEdit::SetBackgroundImage(url))?;
            }
            (kind, _) => return Err(anyhow!("painted output does not fit a {:?}", kind)),
        }
        Ok(())
    }

    /// Puts every translated element back to what it showed before and
    /// removes all overlays.
    pub fn clear_translations(&self) -> Result<()> {
        let originals = self.claims.take_originals();
        info!(count = originals.len(), "clearing translations");
        for (id, original) in originals {
            if let Err(err) = self.restore(id, original) {
                warn!(element = %id, "failed to restore original image: {:#}", err);
            }
        }
        self.surface.unmount_all();
        Ok(())
    }

    fn restore(&self, id: ElementId, original: OriginalRecord) -> Result<()> {
        let edit = match original.kind {
            ElementKind::Canvas => {
                let (_, bytes) = data_url::decode(&original.data)?;
                let pixels = image::load_from_memory(&bytes)
                    .context("failed to decode original canvas image")?
                    .to_rgba8();
                PageEdit::PaintCanvas(pixels)
            }
            ElementKind::Image => PageEdit::SetSrc(original.data),
            ElementKind::BackgroundElement => PageEdit::SetBackgroundImage(original.data),
        };
        self.host.apply(id, edit)?;
        self.host.apply(id, PageEdit::SetOriginalSrc(None))
    }
}

/// One resize observation per inserted image. Aborting a task drops its
/// subscription.
#[derive(Default)]
struct ResizeWatches {
    tasks: HashMap<ElementId, JoinHandle<()>>,
}

impl ResizeWatches {
    fn is_watching(&self, id: ElementId) -> bool {
        self.tasks
            .get(&id)
            .is_some_and(|task| !task.is_finished())
    }

    fn insert(&mut self, id: ElementId, task: JoinHandle<()>) {
        if let Some(previous) = self.tasks.insert(id, task) {
            previous.abort();
        }
    }

    fn stop(&mut self, id: ElementId) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
        }
    }
}

impl Drop for ResizeWatches {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}

enum Painted {
    Pixels(image::RgbaImage),
    DataUrl(String),
}

impl Painted {
    /// What the element hashes to once this is swapped in.
    fn content_hash(&self) -> String {
        match self {
            Painted::Pixels(pixels) => hash_pixels(pixels.as_raw()),
            Painted::DataUrl(url) => fast_hash(url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::font::FontContext;
    use crate::settings::{MemoryConfigStore, Settings};
    use crate::test_util::FakePage;
    use futures_util::future::BoxFuture;
    use image::{Rgba, RgbaImage};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Responder = Box<dyn Fn(usize, &BackgroundMessage) -> Value + Send + Sync>;

    struct ScriptedBus {
        calls: AtomicUsize,
        respond: Responder,
    }

    impl ScriptedBus {
        fn new(respond: impl Fn(usize, &BackgroundMessage) -> Value + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                respond: Box::new(respond),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl MessageBus for ScriptedBus {
        fn post<'a>(&'a self, message: &'a BackgroundMessage) -> BoxFuture<'a, Result<Value>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = (self.respond)(call, message);
            Box::pin(async move { Ok(reply) })
        }
    }

    /// Echoes the sent image back with the given boxes.
    fn translated(message: &BackgroundMessage, translations: Value) -> Value {
        let BackgroundMessage::TranslateImage { image, .. } = message else {
            return Value::Null;
        };
        json!({
            "image": { "width": image.width, "height": image.height },
            "translations": translations,
            "base64Data": image.base64_data,
        })
    }

    fn one_box() -> Value {
        json!([{
            "originalLanguage": "ja",
            "translatedText": "Hello",
            "minX": 20, "minY": 20, "maxX": 120, "maxY": 80,
            "fontHeightPx": 20
        }])
    }

    fn watcher(page: &Arc<FakePage>, bus: Arc<ScriptedBus>, active: bool) -> ElementWatcher {
        let mut settings = Settings::default();
        if active {
            settings.active_urls = vec!["reader.example".to_string()];
        }
        ElementWatcher::new(
            page.clone(),
            page.clone(),
            bus,
            Arc::new(MemoryConfigStore::new(settings)),
            Arc::new(Compositor::new(FontContext::empty("CC Wild Words"))),
        )
    }

    fn page_image(shade: u8) -> RgbaImage {
        RgbaImage::from_pixel(300, 300, Rgba([shade, shade, shade, 255]))
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn inactive_hosts_are_left_alone() {
        let page = FakePage::new("reader.example");
        page.add_image(1, "https://cdn.example/1.jpg", 300, 300);
        let bus = ScriptedBus::new(|_, _| Value::Null);
        let watcher = watcher(&page, bus.clone(), false);
        assert!(watcher.on_page_inject().is_empty());
        assert!(!page.has_root());
        assert_eq!(bus.calls(), 0);
    }

    #[tokio::test]
    async fn images_are_translated_once() {
        let page = FakePage::new("reader.example");
        let id = page.add_image(1, "https://cdn.example/1.jpg", 300, 300);
        page.set_pixels(id, page_image(40));
        let bus = ScriptedBus::new(|_, message| translated(message, one_box()));
        let watcher = watcher(&page, bus.clone(), true);

        let handles = watcher.on_page_inject();
        assert_eq!(handles.len(), 1);
        for handle in handles {
            assert_eq!(handle.await.unwrap(), ElementOutcome::Translated);
        }
        assert!(page.has_root());

        let edits = page.edits_for(id);
        let PageEdit::SetOriginalSrc(Some(sent)) = &edits[0] else {
            panic!("expected original src first, got {:?}", edits);
        };
        assert!(sent.starts_with("data:image/png;base64,"));
        let PageEdit::SetSrc(new_src) = &edits[1] else {
            panic!("expected src swap, got {:?}", edits);
        };
        assert_ne!(new_src, sent);
        assert_eq!(edits[2], PageEdit::RemovePictureSources);

        // The src swap takes the overlay down and releases the claim.
        settle().await;
        assert!(!watcher.claims().is_claimed(id));
        assert!(watcher.claims().is_finished(&fast_hash(new_src)));

        for handle in watcher.on_page_inject() {
            assert_eq!(handle.await.unwrap(), ElementOutcome::AlreadyTranslated);
        }
        assert_eq!(bus.calls(), 1);
    }

    #[tokio::test]
    async fn claimed_elements_are_skipped() {
        let page = FakePage::new("reader.example");
        let id = page.add_image(1, "https://cdn.example/1.jpg", 300, 300);
        let bus = ScriptedBus::new(|_, _| Value::Null);
        let watcher = watcher(&page, bus, true);
        assert!(watcher.claims().claim(id));
        assert_eq!(watcher.translate_element(id).await, ElementOutcome::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_is_retried() {
        let page = FakePage::new("reader.example");
        let id = page.add_image(1, "https://cdn.example/1.jpg", 300, 300);
        page.set_pixels(id, page_image(90));
        let bus = ScriptedBus::new(|call, message| {
            if call < 2 {
                json!("FullQueue")
            } else {
                translated(message, one_box())
            }
        });
        let watcher = watcher(&page, bus.clone(), true);
        assert_eq!(watcher.translate_element(id).await, ElementOutcome::Translated);
        assert_eq!(bus.calls(), 3);
    }

    #[tokio::test]
    async fn fetch_errors_offer_the_unlocker() {
        let page = FakePage::new("reader.example");
        let id = page.add_image(1, "https://cdn.example/1.jpg", 300, 300);
        let bus = ScriptedBus::new(|_, message| {
            // Unreadable pixels are sent by url.
            let BackgroundMessage::TranslateImage { image, .. } = message else {
                return Value::Null;
            };
            assert_eq!(image.src.as_deref(), Some("https://cdn.example/1.jpg"));
            assert_eq!(image.base64_data, None);
            json!("FetchError")
        });
        let watcher = watcher(&page, bus, true);
        assert_eq!(watcher.translate_element(id).await, ElementOutcome::FetchError);

        let contents = page.overlay_contents();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].messages[0].text, FETCH_ERROR_MESSAGE);
        assert_eq!(contents[0].messages[0].actions, vec![OverlayAction::DownloadUnlocker]);
        assert!(!contents[0].spinner);
    }

    #[tokio::test]
    async fn site_access_errors_offer_settings() {
        let page = FakePage::new("reader.example");
        let id = page.add_background(1, "https://cdn.example/bg.jpg", 600, 900);
        let bus = ScriptedBus::new(|_, _| json!("SiteAccessError"));
        let watcher = watcher(&page, bus, true);
        assert_eq!(
            watcher.translate_element(id).await,
            ElementOutcome::SiteAccessError
        );
        let contents = page.overlay_contents();
        assert_eq!(contents[0].messages[0].actions, vec![OverlayAction::OpenSettings]);
    }

    #[tokio::test]
    async fn tainted_canvases_fail_without_a_request() {
        let page = FakePage::new("reader.example");
        let id = page.add_canvas(1, page_image(10));
        let bus = ScriptedBus::new(|_, _| Value::Null);
        let watcher = watcher(&page, bus.clone(), true);
        page.set_pixels_unavailable(id);
        assert_eq!(watcher.translate_element(id).await, ElementOutcome::FetchError);
        assert_eq!(bus.calls(), 0);
    }

    #[tokio::test]
    async fn out_of_quota_shows_upsell() {
        let page = FakePage::new("reader.example");
        let id = page.add_image(1, "https://cdn.example/1.jpg", 300, 300);
        page.set_pixels(id, page_image(40));
        let bus = ScriptedBus::new(|_, message| {
            translated(
                message,
                json!([{
                    "originalLanguage": "Unknown",
                    "translatedText": crate::models::OUT_OF_QUOTA_MESSAGE,
                    "minX": 0, "minY": 0, "maxX": 200, "maxY": 200
                }]),
            )
        });
        let watcher = watcher(&page, bus, true);
        assert_eq!(watcher.translate_element(id).await, ElementOutcome::OutOfQuota);
        let message = &page.overlay_contents()[0].messages[0];
        assert_eq!(message.text, OUT_OF_QUOTA_MESSAGE);
        assert_eq!(
            message.actions,
            vec![OverlayAction::Upgrade, OverlayAction::Login]
        );
        assert!(page.edits_for(id).is_empty());
    }

    #[tokio::test]
    async fn canvases_without_text_are_remembered() {
        let page = FakePage::new("reader.example");
        let id = page.add_canvas(1, page_image(70));
        let bus = ScriptedBus::new(|_, message| translated(message, json!([])));
        let watcher = watcher(&page, bus.clone(), true);
        assert_eq!(
            watcher.translate_element(id).await,
            ElementOutcome::NoTranslations
        );
        watcher.claims().unclaim(id);
        assert_eq!(
            watcher.translate_element(id).await,
            ElementOutcome::AlreadyTranslated
        );
        assert_eq!(bus.calls(), 1);
    }

    #[tokio::test]
    async fn canvas_redrawn_mid_request_is_invalidated() {
        let page = FakePage::new("reader.example");
        let id = page.add_canvas(1, page_image(70));
        let redraw = page.clone();
        let bus = ScriptedBus::new(move |_, message| {
            redraw.repaint(id, page_image(200));
            translated(message, one_box())
        });
        let watcher = watcher(&page, bus, true);
        assert_eq!(
            watcher.translate_element(id).await,
            ElementOutcome::Invalidated
        );
        assert!(!watcher.claims().is_claimed(id));
        assert!(page.edits_for(id).is_empty());
        assert!(page.overlay_contents().is_empty());
    }

    #[tokio::test]
    async fn translated_canvases_are_repainted() {
        let page = FakePage::new("reader.example");
        let id = page.add_canvas(1, page_image(70));
        let bus = ScriptedBus::new(|_, message| translated(message, one_box()));
        let watcher = watcher(&page, bus, true);
        assert_eq!(watcher.translate_element(id).await, ElementOutcome::Translated);

        let painted = page.pixels_of(id).unwrap();
        // Inside the label, the lettering mask is white.
        assert_eq!(painted.get_pixel(70, 50), &Rgba([255, 255, 255, 255]));
        assert_eq!(painted.get_pixel(250, 250), &Rgba([70, 70, 70, 255]));
        let hash = hash_pixels(painted.as_raw());
        assert!(watcher.claims().is_finished(&hash));
    }

    #[tokio::test]
    async fn clearing_restores_originals() {
        let page = FakePage::new("reader.example");
        let image = page.add_image(1, "https://cdn.example/1.jpg", 300, 300);
        page.set_pixels(image, page_image(40));
        let background = page.add_background(2, "https://cdn.example/bg.jpg", 300, 300);
        page.set_pixels(background, page_image(50));
        let bus = ScriptedBus::new(|_, message| translated(message, one_box()));
        let watcher = watcher(&page, bus, true);
        for handle in watcher.on_page_inject() {
            assert_eq!(handle.await.unwrap(), ElementOutcome::Translated);
        }
        let Some(sent) = page.original_src_of(image) else {
            panic!("original src was not recorded");
        };

        watcher.clear_translations().unwrap();
        assert_eq!(page.probe_of(image).src.as_deref(), Some(sent.as_str()));
        assert_eq!(page.original_src_of(image), None);
        assert!(
            page.probe_of(background)
                .style
                .inline_background_image
                .starts_with("url(\"data:image/png;base64,")
        );
        assert_eq!(page.unmount_all_calls(), 1);
        assert!(!page.has_root());
    }

    #[tokio::test]
    async fn inserted_images_are_picked_up() {
        let page = FakePage::new("reader.example");
        let bus = ScriptedBus::new(|_, message| translated(message, one_box()));
        let watcher = watcher(&page, bus.clone(), true);
        let running = tokio::spawn(watcher.clone().run());
        settle().await;

        let id = page.add_image(7, "https://cdn.example/7.jpg", 100, 100);
        page.set_pixels(id, page_image(30));
        page.announce_inserted(vec![id]);
        settle().await;
        // Too small until the lazy loader sizes it.
        assert_eq!(bus.calls(), 0);

        page.resize(id, 300, 300);
        for _ in 0..200 {
            if bus.calls() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(bus.calls(), 1);
        running.abort();
    }

    #[tokio::test]
    async fn resize_watches_follow_insertion_and_removal() {
        let page = FakePage::new("reader.example");
        let bus = ScriptedBus::new(|_, _| Value::Null);
        let watcher = watcher(&page, bus, true);
        let running = tokio::spawn(watcher.clone().run());
        settle().await;

        let id = page.add_image(7, "https://cdn.example/7.jpg", 100, 100);
        page.announce_inserted(vec![id]);
        settle().await;
        page.announce_inserted(vec![id]);
        settle().await;
        assert_eq!(page.observer_count(ObserveTarget::Element(id)), 1);

        page.detach(id);
        settle().await;
        assert_eq!(page.observer_count(ObserveTarget::Element(id)), 0);
        running.abort();
    }

    #[tokio::test]
    async fn translated_hash_is_recorded_before_the_swap() {
        let page = FakePage::new("reader.example");
        let image = page.add_image(1, "https://cdn.example/1.jpg", 300, 300);
        page.set_pixels(image, page_image(40));
        let canvas = page.add_canvas(2, page_image(70));
        let bus = ScriptedBus::new(|_, message| translated(message, one_box()));
        let watcher = watcher(&page, bus, true);

        let claims = Arc::clone(watcher.claims());
        let finished_at_swap = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = finished_at_swap.clone();
        page.on_edit(move |_, edit| {
            let hash = match edit {
                PageEdit::SetSrc(url) => fast_hash(url),
                PageEdit::PaintCanvas(pixels) => hash_pixels(pixels.as_raw()),
                _ => return,
            };
            record.lock().unwrap().push(claims.is_finished(&hash));
        });

        assert_eq!(watcher.translate_element(image).await, ElementOutcome::Translated);
        assert_eq!(watcher.translate_element(canvas).await, ElementOutcome::Translated);
        assert_eq!(*finished_at_swap.lock().unwrap(), vec![true, true]);
    }
}
