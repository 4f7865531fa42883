use anyhow::{Context, Result};
use image::imageops::FilterType;
use std::io::Cursor;
use tracing::{debug, warn};

use super::fetch::FetchedImage;
use crate::data_url;

/// Uploads larger than this on both axes are downscaled first.
pub const MAX_UPLOAD_PX: u32 = 1800;

/// Target size for an upload, preserving aspect ratio.
///
/// An image is left alone when either dimension is within its cap. Otherwise
/// the larger of the two candidate factors is applied, so the result can still
/// exceed one cap for extreme aspect ratios.
pub fn calculate_resized_aspect_ratio(
    width: u32,
    height: u32,
    width_max_px: u32,
    height_max_px: u32,
) -> (u32, u32) {
    if width <= width_max_px || height <= height_max_px {
        return (width, height);
    }
    let ratio = (height_max_px as f64 / height as f64).max(width_max_px as f64 / width as f64);
    (
        (width as f64 * ratio).round() as u32,
        (height as f64 * ratio).round() as u32,
    )
}

/// Upload-ready image: a data URL and the dimensions the service will see.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub data_url: String,
    pub width: u32,
    pub height: u32,
}

/// Encodes a fetched image for upload, downscaling when `resized` differs from
/// `original`. Payloads that cannot be decoded are forwarded untouched.
pub fn encode_for_upload(
    fetched: &FetchedImage,
    original: (u32, u32),
    resized: (u32, u32),
) -> EncodedImage {
    if resized != original {
        debug!(
            "resizing upload {}x{} -> {}x{}",
            original.0, original.1, resized.0, resized.1
        );
        match resize_png(&fetched.bytes, resized) {
            Ok(bytes) => {
                return EncodedImage {
                    data_url: data_url::encode("image/png", &bytes),
                    width: resized.0,
                    height: resized.1,
                };
            }
            Err(err) => warn!("sending image at original size: {:#}", err),
        }
    }
    EncodedImage {
        data_url: data_url::encode(&fetched.mime, &fetched.bytes),
        width: original.0,
        height: original.1,
    }
}

/// Encodes pixels read back from a page element, downscaled to `resized`.
pub fn encode_pixels(pixels: image::RgbaImage, resized: (u32, u32)) -> Result<EncodedImage> {
    let original = pixels.dimensions();
    let image = image::DynamicImage::ImageRgba8(pixels);
    let image = if resized != original {
        image.resize_exact(resized.0.max(1), resized.1.max(1), FilterType::Lanczos3)
    } else {
        image
    };
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .context("failed to encode element pixels")?;
    Ok(EncodedImage {
        data_url: data_url::encode("image/png", &out),
        width: image.width(),
        height: image.height(),
    })
}

fn resize_png(bytes: &[u8], (width, height): (u32, u32)) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes).context("failed to decode fetched image")?;
    let resized = decoded.resize_exact(width.max(1), height.max(1), FilterType::Lanczos3);
    let mut out = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .context("failed to encode resized image")?;
    Ok(out)
}
