use crate::UploadError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageEncoder;

/// Longest edge of a standardized photo.
pub const MAX_DIMENSION: u32 = 1080;
pub const JPEG_QUALITY: u8 = 70;

/// Decode any supported image, shrink it to fit a `MAX_DIMENSION` box
/// keeping the aspect ratio, and re-encode as JPEG. Small images are not
/// enlarged.
pub fn standardize(bytes: &[u8]) -> Result<Vec<u8>, UploadError> {
    let img = image::load_from_memory(bytes).map_err(|e| UploadError::ImageError(e.to_string()))?;
    let img = if img.width() > MAX_DIMENSION || img.height() > MAX_DIMENSION {
        img.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3)
    } else {
        img
    };
    // JPEG has no alpha channel
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .write_image(&rgb, rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| UploadError::ImageError(e.to_string()))?;
    Ok(out)
}
