use futures_util::future::BoxFuture;
use reqwest::header::{CONTENT_TYPE, REFERER};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::data_url;

/// Hosts that refuse hotlinked images without a matching Referer.
const REFERER_RULES: &[(&str, &str)] = &[
    ("pximg.net", "https://www.pixiv.net/"),
    ("i.hamreus.com", "https://www.manhuagui.com/"),
    ("hitomi.la", "https://hitomi.la/"),
    ("klimv1.xyz", "https://klmanga.com/"),
];

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The request never produced a response (blocked, refused, timed out).
    Unreachable(String),
    /// The server answered outside 200..400.
    Status(u16),
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Unreachable(reason) => write!(f, "image unreachable: {}", reason),
            FetchFailure::Status(status) => write!(f, "image fetch returned status {}", status),
        }
    }
}

impl std::error::Error for FetchFailure {}

pub trait ImageSource: Send + Sync {
    fn fetch<'a>(&'a self, src: &'a str) -> BoxFuture<'a, Result<FetchedImage, FetchFailure>>;
}

pub fn referer_for(src: &str) -> Option<&'static str> {
    let url = reqwest::Url::parse(src).ok()?;
    let host = url.host_str()?;
    REFERER_RULES
        .iter()
        .find(|(filter, _)| host.contains(filter))
        .map(|(_, referer)| *referer)
}

/// Fetches images over HTTP(S); data URLs are decoded in place.
#[derive(Clone, Default)]
pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_remote(&self, src: &str) -> Result<FetchedImage, FetchFailure> {
        let mut request = self.client.get(src).timeout(FETCH_TIMEOUT);
        if let Some(referer) = referer_for(src) {
            debug!("fetching {} with referer {}", src, referer);
            request = request.header(REFERER, referer);
        }
        let response = request
            .send()
            .await
            .map_err(|err| FetchFailure::Unreachable(err.to_string()))?;
        let status = response.status().as_u16();
        if !(200..400).contains(&status) {
            return Err(FetchFailure::Status(status));
        }
        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|err| FetchFailure::Unreachable(err.to_string()))?
            .to_vec();
        let mime = data_url::sniff_mime(&bytes, declared.as_deref());
        Ok(FetchedImage { bytes, mime })
    }
}

impl ImageSource for HttpImageSource {
    fn fetch<'a>(&'a self, src: &'a str) -> BoxFuture<'a, Result<FetchedImage, FetchFailure>> {
        Box::pin(async move {
            if data_url::is_data_url(src) {
                let (mime, bytes) = data_url::decode(src)
                    .map_err(|err| FetchFailure::Unreachable(format!("{:#}", err)))?;
                return Ok(FetchedImage { bytes, mime });
            }
            self.fetch_remote(src).await
        })
    }
}
