//! OCR (Optical Character Recognition) Module
//!
//! Everything behind the [`Recognizer`] seam: given a file on disk and a
//! language code, produce the text in that image or a failure reason.
//!
//! # Architecture
//!
//! - `Recognizer` trait defines the single `recognize` capability
//! - `PipelineRecognizer` preprocesses to `<stem>_preprocessed.png`, then
//!   shells out to the `tesseract` CLI
//! - `TesseractRecognizer` calls Tesseract in-process via leptess, no
//!   preprocessing
//! - `UnavailableRecognizer` stands in when the configured backend could
//!   not be initialised, so the server still starts
//!
//! # Configuration
//!
//! Backend selection and tool locations come from `OcrConfig` (see `config.rs`):
//! - `backend`: `pipeline` or `tesseract`
//! - `tesseract_bin` / `tessdata_dir`: engine location
//! - `preprocess_command`: optional external preprocessor
//! - `timeout_secs`: bound on every external invocation
//!
//! # Usage
//!
//! ```rust,ignore
//! let recognizer = build_recognizer(&config.ocr, "eng");
//! let text = recognizer.recognize(&path, "eng").await?;
//! ```

mod pipeline;
mod preprocessing;
mod tesseract;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{OcrBackendKind, OcrConfig};
use crate::error::{CardscanError, Result};

pub use pipeline::PipelineRecognizer;
pub use preprocessing::{preprocess_file, preprocess_image, ImageLimits};
pub use tesseract::TesseractRecognizer;

/// Turns an image file into text.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, path: &Path, language: &str) -> Result<String>;

    /// Short backend label for logs and the health endpoint.
    fn name(&self) -> &str {
        "custom"
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Backend that failed to initialise. Every call reports why.
pub struct UnavailableRecognizer {
    name: String,
    reason: String,
}

impl UnavailableRecognizer {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Recognizer for UnavailableRecognizer {
    async fn recognize(&self, _path: &Path, _language: &str) -> Result<String> {
        Err(CardscanError::RecognitionUnavailable(self.reason.clone()))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Select and initialise the configured backend.
///
/// `warm_language` is used to probe the direct binding so a missing
/// traineddata file shows up at startup rather than on the first upload.
pub fn build_recognizer(config: &OcrConfig, warm_language: &str) -> Arc<dyn Recognizer> {
    let name = config.backend.to_string();

    match config.backend {
        OcrBackendKind::Pipeline => match PipelineRecognizer::new(config) {
            Ok(recognizer) => {
                info!(
                    tesseract = %config.tesseract_bin,
                    external_preprocess = config.preprocess_command.is_some(),
                    "Pipeline OCR backend initialized"
                );
                Arc::new(recognizer)
            }
            Err(e) => {
                // The detail names server paths; clients only get the summary.
                warn!("Pipeline OCR backend unavailable: {}", e);
                Arc::new(UnavailableRecognizer::new(
                    name,
                    "Pipeline OCR backend unavailable",
                ))
            }
        },
        OcrBackendKind::Tesseract => match TesseractRecognizer::new(config, warm_language) {
            Ok(recognizer) => {
                info!(language = %warm_language, "Tesseract OCR initialized");
                Arc::new(recognizer)
            }
            Err(e) => {
                warn!("Tesseract not available: {}", e);
                Arc::new(UnavailableRecognizer::new(name, "Tesseract not available"))
            }
        },
    }
}

/// Reject language codes that could smuggle extra arguments into the engine.
///
/// Tesseract codes look like `eng`, `chi_sim` or `eng+deu`.
pub fn validate_language(language: &str) -> Result<()> {
    let valid = !language.is_empty()
        && language
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+');

    if valid {
        Ok(())
    } else {
        Err(CardscanError::Recognition(format!(
            "Unsupported language code '{language}'"
        )))
    }
}

/// `<dir>/<stem>_preprocessed.png` next to the input.
pub fn preprocessed_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let file_name = format!("{stem}_preprocessed.png");

    match input.parent() {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    }
}
