//! Payload encoding: raster pages and raw image bytes → base64 [`ImagePayload`].
//!
//! Rasterised PDF pages are JPEG-encoded at the configured quality (80 by
//! default). Uploaded images are passed through untouched with their declared
//! media type.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Media type of every rasterised PDF page.
pub const PAGE_MIME_TYPE: &str = "image/jpeg";

/// One page or image, base64-encoded and tagged with its media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    pub mime_type: String,
    /// Standard (padded) base64 of the image bytes.
    pub data: String,
}

impl ImagePayload {
    /// Wrap raw image bytes, preserving their media type.
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        }
    }

    /// Decode the base64 data back to bytes.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.data)
    }

    /// Length of the base64 data in bytes.
    pub fn encoded_len(&self) -> usize {
        self.data.len()
    }
}

/// Ordered payloads for one request: files in selection order, pages in
/// page order within each file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadBatch(Vec<ImagePayload>);

impl PayloadBatch {
    pub fn new(payloads: Vec<ImagePayload>) -> Self {
        Self(payloads)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImagePayload> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ImagePayload] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<ImagePayload> {
        self.0
    }

    /// Total base64 bytes across all payloads.
    pub fn total_encoded_len(&self) -> usize {
        self.0.iter().map(ImagePayload::encoded_len).sum()
    }
}

impl<'a> IntoIterator for &'a PayloadBatch {
    type Item = &'a ImagePayload;
    type IntoIter = std::slice::Iter<'a, ImagePayload>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Encode a rasterised page as a base64 JPEG.
///
/// The page is flattened to RGB first; JPEG has no alpha channel.
pub fn encode_page(img: &DynamicImage, quality: u8) -> Result<ImagePayload, ImageError> {
    let rgb = img.to_rgb8();

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;

    let payload = ImagePayload::from_bytes(&buf, PAGE_MIME_TYPE);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        rgb.width(),
        rgb.height(),
        payload.encoded_len()
    );
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_page_as_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(24, 12, Rgba([255, 0, 0, 255])));
        let payload = encode_page(&img, 80).expect("encode should succeed");
        assert_eq!(payload.mime_type, "image/jpeg");

        let bytes = payload.decode().expect("valid base64");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "JPEG SOI marker");

        let back = image::load_from_memory(&bytes).expect("decodable JPEG");
        assert_eq!((back.width(), back.height()), (24, 12));
    }

    #[test]
    fn from_bytes_round_trips() {
        let raw = b"\x89PNG\r\n\x1a\nnot really a png";
        let payload = ImagePayload::from_bytes(raw, "image/png");
        assert_eq!(payload.mime_type, "image/png");
        assert_eq!(payload.decode().unwrap(), raw.to_vec());
    }

    #[test]
    fn payload_serialises_with_camel_case() {
        let payload = ImagePayload::from_bytes(b"abc", "image/webp");
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["mimeType"], "image/webp");
        assert_eq!(v["data"], "YWJj");
    }

    #[test]
    fn batch_totals() {
        let batch = PayloadBatch::new(vec![
            ImagePayload::from_bytes(b"abc", "image/png"),
            ImagePayload::from_bytes(b"abcdef", "image/png"),
        ]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.total_encoded_len(), 4 + 8);
        assert_eq!((&batch).into_iter().count(), 2);
    }
}
