use crate::error::ApiError;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{RgbImage, codecs::jpeg::JpegEncoder};

const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Decode a base64 payload, with or without a `data:<mime>;base64,` prefix.
pub fn decode_image(payload: &str) -> Result<RgbImage, ApiError> {
    let encoded = match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    };

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiError::InvalidImage(e.to_string()))?;
    let image =
        image::load_from_memory(&bytes).map_err(|e| ApiError::InvalidImage(e.to_string()))?;

    Ok(image.to_rgb8())
}

/// Encode RGB pixels to JPEG bytes.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let _span = common::span_debug!("encode_jpeg");

    let mut jpeg = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode_image(image)?;
    Ok(jpeg)
}

/// `data:image/jpeg;base64,...` for the annotated frame.
pub fn encode_data_url(image: &RgbImage, quality: u8) -> anyhow::Result<String> {
    let jpeg = encode_jpeg(image, quality)?;
    Ok(format!("{JPEG_DATA_URL_PREFIX}{}", STANDARD.encode(jpeg)))
}
