use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

pub const OCTET_STREAM: &str = "application/octet-stream";

pub fn encode(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

pub fn is_data_url(value: &str) -> bool {
    value.trim_start().starts_with("data:")
}

/// Splits a base64 data URL into its mime type and decoded payload.
pub fn decode(value: &str) -> Result<(String, Vec<u8>)> {
    let rest = value
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("not a data URL"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("data URL has no payload"))?;
    let Some(mime) = header.strip_suffix(";base64") else {
        return Err(anyhow!("only base64 data URLs are supported"));
    };
    let mime = if mime.is_empty() { OCTET_STREAM } else { mime };
    let bytes = BASE64
        .decode(payload.trim())
        .context("invalid base64 payload in data URL")?;
    Ok((mime.to_string(), bytes))
}

/// Mime type sniffed from magic bytes, or the fallback when unknown.
pub fn sniff_mime(bytes: &[u8], fallback: Option<&str>) -> String {
    infer::get(bytes)
        .map(|kind| kind.mime_type().to_string())
        .or_else(|| {
            fallback
                .map(|mime| mime.split(';').next().unwrap_or("").trim().to_string())
                .filter(|mime| !mime.is_empty())
        })
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}
