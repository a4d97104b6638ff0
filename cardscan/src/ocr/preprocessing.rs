use std::path::Path;

use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::{gaussian_blur_f32, median_filter, sharpen3x3};
use tokio_util::sync::CancellationToken;

use crate::config::OcrConfig;
use crate::error::{CardscanError, Result};

/// Sigma roughly matching a 5x5 Gaussian kernel.
const BLUR_SIGMA: f32 = 1.1;

/// Size bounds applied before any filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLimits {
    pub min_dimension: u32,
    pub max_dimension: u32,
}

impl From<&OcrConfig> for ImageLimits {
    fn from(config: &OcrConfig) -> Self {
        Self {
            min_dimension: config.min_image_dimension,
            max_dimension: config.max_image_dimension,
        }
    }
}

/// Normalise image bytes for OCR
///
/// Applies the following transformations:
/// 1. Validates the minimum dimensions
/// 2. Resizes large images while maintaining aspect ratio
/// 3. Converts to grayscale
/// 4. Gaussian blur to suppress sensor noise
/// 5. Otsu binarisation
/// 6. 3x3 sharpen
/// 7. 3x3 median denoise
///
/// # Returns
/// PNG bytes of a single-channel, black-and-white image
pub fn preprocess_image(bytes: &[u8], limits: ImageLimits) -> Result<Vec<u8>> {
    let reader = ImageReader::new(std::io::Cursor::new(bytes));
    let reader = reader
        .with_guessed_format()
        .map_err(|e| CardscanError::Recognition(format!("Failed to read image: {e}")))?;

    let img = reader
        .decode()
        .map_err(|e| CardscanError::Recognition(format!("Failed to decode image: {e}")))?;

    let (width, height) = img.dimensions();
    if width < limits.min_dimension || height < limits.min_dimension {
        return Err(CardscanError::Recognition(format!(
            "Image too small: {}x{}, minimum {}x{}",
            width, height, limits.min_dimension, limits.min_dimension
        )));
    }

    let img = resize_if_needed(img, limits.max_dimension);

    let gray = img.to_luma8();
    let blurred = gaussian_blur_f32(&gray, BLUR_SIGMA);
    let binary = threshold(&blurred, otsu_level(&blurred), ThresholdType::Binary);
    let sharpened = sharpen3x3(&binary);
    let denoised = median_filter(&sharpened, 1, 1);

    let mut output = Vec::new();
    DynamicImage::ImageLuma8(denoised)
        .write_to(&mut std::io::Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| CardscanError::Recognition(format!("Failed to encode image: {e}")))?;

    Ok(output)
}

/// Read `input`, preprocess it and write the PNG result to `output`.
///
/// Nothing is written once `cancel` has fired, so an abandoned run cannot
/// recreate a file its caller already cleaned up.
pub fn preprocess_file(
    input: &Path,
    output: &Path,
    limits: ImageLimits,
    cancel: &CancellationToken,
) -> Result<()> {
    let bytes = std::fs::read(input)
        .map_err(|e| CardscanError::Recognition(format!("Cannot read image: {e}")))?;
    let processed = preprocess_image(&bytes, limits)?;

    if cancel.is_cancelled() {
        return Err(CardscanError::Recognition(
            "Preprocessing cancelled".to_string(),
        ));
    }
    std::fs::write(output, processed).map_err(|e| {
        CardscanError::Storage(format!("Failed to write preprocessed image: {e}"))
    })?;
    Ok(())
}

/// Resize image if it exceeds maximum dimension while maintaining aspect ratio
///
/// Uses Lanczos3 filter for high-quality downscaling
fn resize_if_needed(img: DynamicImage, max_dim: u32) -> DynamicImage {
    let (width, height) = img.dimensions();

    if width <= max_dim && height <= max_dim {
        return img;
    }

    let ratio = if width > height {
        max_dim as f32 / width as f32
    } else {
        max_dim as f32 / height as f32
    };

    let new_width = ((width as f32 * ratio) as u32).max(1);
    let new_height = ((height as f32 * ratio) as u32).max(1);

    img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3)
}
