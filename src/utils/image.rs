//! Image utility functions

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::DynamicImage;

/// Encode image to JPEG bytes
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_with_encoder(encoder)
        .context("JPEG encoding failed")?;
    Ok(buffer.into_inner())
}

/// Resize image maintaining aspect ratio
pub fn resize_with_aspect(image: &DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    image.resize(max_width, max_height, image::imageops::FilterType::Lanczos3)
}

/// Build a `data:` URI from encoded image bytes
pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Split a base64 `data:` URI into its mime type and decoded bytes
pub fn parse_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .context("image is not a data URI")?;
    let (header, payload) = rest
        .split_once(',')
        .context("data URI has no payload separator")?;
    let mime = header
        .strip_suffix(";base64")
        .context("data URI is not base64 encoded")?;
    let bytes = STANDARD
        .decode(payload.trim())
        .context("data URI payload is not valid base64")?;
    let mime = if mime.is_empty() { "application/octet-stream" } else { mime };
    Ok((mime.to_string(), bytes))
}
