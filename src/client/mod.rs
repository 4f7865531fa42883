//! Fetch, downscale, encode and translate one image.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::TranslationCache;
use crate::identity::ContentIdentity;
use crate::languages::LanguageCode;
use crate::models::{ImageDescriptor, ImageSize, TranslationResults};
use crate::settings::ConfigStore;

pub mod api;
pub mod fetch;
pub mod fingerprint;
pub mod resize;

pub use api::{
    LoginStatus, RemoteApi, SignupStatus, TranslateApi, TranslateCall, TranslationModelData, User,
};
pub use fetch::{FetchFailure, FetchedImage, HttpImageSource, ImageSource};
pub use resize::{EncodedImage, MAX_UPLOAD_PX, calculate_resized_aspect_ratio};

#[derive(Debug, Clone, PartialEq)]
pub enum TranslateOutcome {
    Translated(TranslationResults),
    /// The image or the service could not be read.
    FetchError,
    /// The page's image host refused the request outright.
    SiteAccessError,
}

pub struct TranslationClient {
    api: Arc<dyn TranslateApi>,
    images: Arc<dyn ImageSource>,
    cache: Arc<TranslationCache>,
    config: Arc<dyn ConfigStore>,
}

impl TranslationClient {
    pub fn new(
        api: Arc<dyn TranslateApi>,
        images: Arc<dyn ImageSource>,
        cache: Arc<TranslationCache>,
        config: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            api,
            images,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub async fn translate(
        &self,
        image: &ImageDescriptor,
        target: LanguageCode,
        model: Option<&str>,
        include_raw_data: bool,
    ) -> TranslateOutcome {
        if let Err(err) = self.cache.clear_if_flagged(self.config.as_ref()) {
            warn!("failed to check cache clear flag: {:#}", err);
        }

        let encoded = match image.base64_data.as_deref().filter(|data| !data.is_empty()) {
            Some(data) => EncodedImage {
                data_url: data.to_string(),
                width: image.width,
                height: image.height,
            },
            None => {
                let Some(src) = image.src.as_deref().filter(|src| !src.is_empty()) else {
                    return TranslateOutcome::FetchError;
                };
                match self.fetch_with_scaling(src, image.width, image.height).await {
                    Ok(encoded) => encoded,
                    Err(outcome) => return outcome,
                }
            }
        };

        // Keyed on the uploaded bytes; the same page served from two CDNs
        // shares one entry.
        let identity = ContentIdentity::from_content(target, model, &encoded.data_url);
        let result = match self.cache.get(&identity) {
            Some(hit) => {
                debug!("translation cache hit for {}x{}", encoded.width, encoded.height);
                hit
            }
            None => {
                let call = TranslateCall {
                    target,
                    base64_image: &encoded.data_url,
                    model,
                };
                match self.api.translate_image(call).await {
                    Ok(result) => result,
                    Err(err) => {
                        warn!("translation request failed: {:#}", err);
                        return TranslateOutcome::FetchError;
                    }
                }
            }
        };

        if !result.is_error() {
            self.cache.put(identity, result.clone());
        }

        TranslateOutcome::Translated(TranslationResults {
            image: ImageSize {
                width: encoded.width,
                height: encoded.height,
            },
            translations: result.translations,
            base64_data: include_raw_data.then_some(encoded.data_url),
        })
    }

    async fn fetch_with_scaling(
        &self,
        src: &str,
        width: u32,
        height: u32,
    ) -> Result<EncodedImage, TranslateOutcome> {
        let resized = calculate_resized_aspect_ratio(width, height, MAX_UPLOAD_PX, MAX_UPLOAD_PX);
        let fetched = self.images.fetch(src).await.map_err(|failure| {
            debug!("{} ({})", failure, src);
            match failure {
                FetchFailure::Unreachable(_) => TranslateOutcome::SiteAccessError,
                FetchFailure::Status(_) => TranslateOutcome::FetchError,
            }
        })?;
        tokio::task::spawn_blocking(move || {
            resize::encode_for_upload(&fetched, (width, height), resized)
        })
        .await
        .map_err(|err| {
            warn!("image encoding task failed: {}", err);
            TranslateOutcome::FetchError
        })
    }
}
