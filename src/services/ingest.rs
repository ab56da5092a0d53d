use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use image::{DynamicImage, GenericImageView, ImageReader};
use std::io::Cursor;
use std::path::Path;

use crate::error::PipelineError;
use crate::models::Dimensions;

/// Standard alphabet, tolerant of the sloppy tails truncated encoders leave.
const TOLERANT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Strip a `data:image/...;base64,` header, drop transport line breaks and
/// pad with `=` up to a multiple of 4.
pub fn normalize_base64(input: &str) -> String {
    let mut data = input.trim();

    if data.starts_with("data:") {
        if let Some(idx) = data.find(";base64,") {
            log::debug!("✂️ Removing data URI prefix ({} chars)", idx + ";base64,".len());
            data = &data[idx + ";base64,".len()..];
        }
    }

    let mut normalized: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let remainder = normalized.len() % 4;
    if remainder != 0 {
        let missing = 4 - remainder;
        log::debug!("🧩 Adding {} padding characters", missing);
        normalized.extend(std::iter::repeat('=').take(missing));
    }

    normalized
}

pub fn decode_base64_image(input: &str) -> Result<Vec<u8>, PipelineError> {
    let normalized = normalize_base64(input);
    if normalized.is_empty() {
        return Err(PipelineError::InvalidInput("image payload is empty".to_string()));
    }

    let bytes = TOLERANT_STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| PipelineError::decode("image payload is not valid base64", e))?;

    log::debug!("📦 Decoded {} base64 chars into {} bytes", normalized.len(), bytes.len());
    Ok(bytes)
}

/// A loaded image together with the size it actually has.
#[derive(Debug)]
pub struct DecodedImage {
    pub image: DynamicImage,
    pub dimensions: Dimensions,
}

pub fn decode_image_bytes(bytes: &[u8]) -> Result<DecodedImage, image::ImageError> {
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;

    let (width, height) = image.dimensions();
    Ok(DecodedImage {
        image,
        dimensions: Dimensions { width, height },
    })
}

/// Load the staged image from disk. A size that differs from what the sender
/// declared is logged but accepted.
pub async fn load_image(
    path: &Path,
    declared: Option<Dimensions>,
) -> Result<DecodedImage, PipelineError> {
    let load_error = |source: Box<dyn std::error::Error + Send + Sync>| {
        PipelineError::decode(format!("failed to load image from {}", path.display()), source)
    };

    let bytes = tokio::fs::read(path).await.map_err(|e| load_error(e.into()))?;
    let decoded = decode_image_bytes(&bytes).map_err(|e| load_error(e.into()))?;

    match declared {
        Some(expected) if expected != decoded.dimensions => {
            log::warn!(
                "⚠️ Declared size {} does not match decoded size {}",
                expected,
                decoded.dimensions
            );
        }
        _ => {}
    }

    log::info!(
        "🖼️ Loaded image {} ({}, {:?})",
        path.display(),
        decoded.dimensions,
        decoded.image.color()
    );
    Ok(decoded)
}
