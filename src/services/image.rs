use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine};
use std::path::Path;

use crate::models::ImagePayload;

/// MIME type from the file extension, `image/jpeg` when unknown.
pub fn mime_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => "image/jpeg",
    }
}

pub fn from_bytes(bytes: &[u8], mime_type: &str) -> ImagePayload {
    ImagePayload {
        mime_type: mime_type.to_string(),
        data: general_purpose::STANDARD.encode(bytes),
    }
}

/// Read an image file from disk and encode it for the API.
pub async fn load_image(path: &Path) -> Result<ImagePayload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read image {}", path.display()))?;

    if bytes.is_empty() {
        anyhow::bail!("image file is empty: {}", path.display());
    }

    let payload = from_bytes(&bytes, mime_type_for_path(path));

    log::debug!("📊 Image file size: {} bytes", bytes.len());
    log::debug!("🔄 Base64 encoded size: {} bytes", payload.data.len());

    Ok(payload)
}

/// Accept a `data:<mime>;base64,<payload>` URL, dropping the prefix.
pub fn from_data_url(url: &str) -> Result<ImagePayload> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| anyhow::anyhow!("not a data URL"))?;
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("data URL has no payload"))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow::anyhow!("data URL is not base64 encoded"))?;

    if !mime_type.starts_with("image/") {
        anyhow::bail!("unsupported media type: {}", mime_type);
    }
    general_purpose::STANDARD
        .decode(data)
        .context("data URL payload is not valid base64")?;

    Ok(ImagePayload {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    })
}
