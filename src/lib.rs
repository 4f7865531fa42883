use anyhow::{Context, Result, anyhow, bail};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub mod background;
pub mod cache;
pub mod chrome;
pub mod client;
pub mod compositor;
pub mod data_url;
pub mod gate;
pub mod hash;
pub mod identity;
pub mod languages;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod overlay;
pub mod page;
pub mod panel;
pub mod server;
pub mod settings;
pub mod watcher;

#[cfg(test)]
mod test_util;

pub use background::Background;
pub use compositor::{Compositor, FontContext};
pub use languages::LanguageCode;
pub use messaging::ImageReply;
pub use models::{ImageDescriptor, TextBox, TranslationResults};

use client::resize::{MAX_UPLOAD_PX, calculate_resized_aspect_ratio, encode_for_upload};
use client::{FetchedImage, ImageSource};

/// A translated image file, ready to be written out.
pub struct TranslatedFile {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub results: TranslationResults,
}

/// Translates a local image file or an image URL and paints the result.
///
/// Goes through the same gate and cache as page requests, so a concurrent
/// request for the same image is reported as busy rather than sent twice.
pub async fn translate_file(
    background: &Background,
    images: &dyn ImageSource,
    compositor: Arc<Compositor>,
    input: &str,
    target: LanguageCode,
    model: Option<&str>,
    output_mime: &str,
) -> Result<TranslatedFile> {
    let fetched = load_input(images, input).await?;

    let upload = tokio::task::spawn_blocking(move || -> Result<_> {
        let decoded = image::load_from_memory(&fetched.bytes)
            .with_context(|| "input is not a supported image")?;
        let original = (decoded.width(), decoded.height());
        let resized =
            calculate_resized_aspect_ratio(original.0, original.1, MAX_UPLOAD_PX, MAX_UPLOAD_PX);
        Ok(encode_for_upload(&fetched, original, resized))
    })
    .await
    .context("upload encoding task failed")??;
    debug!("uploading {}x{} image", upload.width, upload.height);

    let descriptor = ImageDescriptor {
        src: None,
        base64_data: Some(upload.data_url.clone()),
        width: upload.width,
        height: upload.height,
    };
    let results = match background
        .translate_image(&descriptor, target, model, true)
        .await
    {
        ImageReply::Translated(results) => results,
        ImageReply::FullQueue => bail!("too many translations in flight, try again shortly"),
        ImageReply::FetchError => bail!("the translation service could not be reached"),
        ImageReply::SiteAccessError => bail!("the image host refused access"),
    };
    if results.is_out_of_quota() {
        bail!(models::OUT_OF_QUOTA_MESSAGE);
    }
    info!("{} text regions translated", results.translations.len());

    let painted_source = results
        .base64_data
        .clone()
        .unwrap_or_else(|| upload.data_url.clone());
    let mime = output_mime.to_string();
    let painted = results.clone();
    let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let (_, source) = data_url::decode(&painted_source)?;
        let composited = compositor.compose(&source, &painted)?;
        crate::compositor::encode_image(&composited.image, &mime)
    })
    .await
    .context("compositing task failed")??;

    Ok(TranslatedFile {
        bytes,
        mime: output_mime.to_string(),
        results,
    })
}

async fn load_input(images: &dyn ImageSource, input: &str) -> Result<FetchedImage> {
    let input = input.trim();
    if input.starts_with("http://") || input.starts_with("https://") || data_url::is_data_url(input)
    {
        return images
            .fetch(input)
            .await
            .map_err(|failure| anyhow!("failed to fetch {}: {}", input, failure));
    }
    let path = Path::new(input);
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read image: {}", path.display()))?;
    let mime = data_url::sniff_mime(&bytes, None);
    Ok(FetchedImage { bytes, mime })
}
