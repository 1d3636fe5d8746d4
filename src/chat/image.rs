//! Image upload and description.
//!
//! Uploads are normalised to base64 JPEG (RGB, quality 95) before being sent
//! to the vision model. The last description is cached by the SHA-256 of the
//! uploaded bytes so re-submitting the same file does not call the model.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::RagError;
use crate::llm::ChatModel;

pub const JPEG_QUALITY: u8 = 95;

pub const DESCRIBE_INSTRUCTION: &str = "Please provide a detailed description of this image. \
Include all relevant details about what you see, including objects, people, text, colors, and \
any notable features.";

/// Decodes any supported image format and re-encodes it as base64 JPEG.
/// Transparency is dropped.
pub fn encode_jpeg_base64(bytes: &[u8]) -> Result<String> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| RagError::InvalidInput(format!("unreadable image: {}", e)))?;
    let rgb = decoded.to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&rgb)?;
    Ok(STANDARD.encode(jpeg))
}

pub fn image_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Outcome of [`ImageAnalysis::analyze`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageDescription {
    pub text: String,
    /// False when the cached description was reused.
    pub fresh: bool,
}

/// The most recent image description for a session.
#[derive(Debug, Default, Clone)]
pub struct ImageAnalysis {
    digest: Option<String>,
    description: Option<String>,
}

impl ImageAnalysis {
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Describes `bytes` with `model` unless they match the cached image.
    /// A failed call leaves the previous description in place.
    pub async fn analyze(&mut self, model: &dyn ChatModel, bytes: &[u8]) -> Result<ImageDescription> {
        let digest = image_digest(bytes);
        if let (Some(cached), Some(text)) = (&self.digest, &self.description) {
            if *cached == digest {
                tracing::debug!(digest = %digest, "reusing cached image description");
                return Ok(ImageDescription {
                    text: text.clone(),
                    fresh: false,
                });
            }
        }

        let jpeg = encode_jpeg_base64(bytes)?;
        let text = model
            .describe_image(&jpeg, DESCRIBE_INSTRUCTION)
            .await
            .map_err(|e| RagError::Invocation(format!("{:#}", e)))?;

        self.digest = Some(digest);
        self.description = Some(text.clone());
        Ok(ImageDescription { text, fresh: true })
    }

    pub fn clear(&mut self) {
        self.digest = None;
        self.description = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(4, 4, Rgba(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn png_with_alpha_becomes_jpeg() {
        let encoded = encode_jpeg_base64(&png_bytes([10, 200, 30, 128])).unwrap();
        let jpeg = STANDARD.decode(encoded).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn garbage_is_invalid_input() {
        let err = encode_jpeg_base64(b"not an image").unwrap_err();
        assert!(matches!(classify(&err), Some(RagError::InvalidInput(_))));
    }

    #[test]
    fn digest_distinguishes_bytes() {
        assert_eq!(image_digest(b"a"), image_digest(b"a"));
        assert_ne!(image_digest(b"a"), image_digest(b"b"));
    }
}
