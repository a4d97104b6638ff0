//! Wire types for the OCR endpoint.
//!
//! Two success shapes exist. A request that used the singular `image` /
//! `file` field gets [`SingleOcrResponse`]; a request that used `files`
//! gets an array of [`BatchOcrEntry`]. Setting
//! `CARDSCAN_RESPONSE_SHAPE=array` makes every success an array.

use serde::{Deserialize, Serialize};

/// `{"content", "filename", "format"}` for a single upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SingleOcrResponse {
    /// Recognised text.
    pub content: String,
    /// Filename as sent by the client.
    pub filename: String,
    /// Output format hint echoed back (default `md`).
    pub format: String,
}

/// One element of the multi-file response array.
///
/// Exactly one of `text` and `error` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchOcrEntry {
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Only produced under tolerant aggregation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub format: String,
}

impl BatchOcrEntry {
    pub fn success(file_name: String, text: String, format: &str) -> Self {
        Self {
            file_name,
            text: Some(text),
            error: None,
            format: format.to_string(),
        }
    }

    pub fn failure(file_name: String, error: String, format: &str) -> Self {
        Self {
            file_name,
            text: None,
            error: Some(error),
            format: format.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(untagged)]
pub enum OcrResponseBody {
    Single(SingleOcrResponse),
    Batch(Vec<BatchOcrEntry>),
}

/// Error body for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// `multipart/form-data` body accepted by `POST /api/ocr`. Documentation only.
#[derive(Debug, utoipa::ToSchema)]
#[allow(dead_code)]
pub struct OcrUploadForm {
    /// Single image. Takes precedence over `files`.
    #[schema(value_type = Option<String>, format = Binary)]
    pub image: Option<Vec<u8>>,
    /// One or more images (binary parts).
    #[schema(value_type = Option<Vec<String>>)]
    pub files: Option<Vec<Vec<u8>>>,
    /// Tesseract language code, e.g. `eng` or `eng+deu`. Default `eng`.
    pub language: Option<String>,
    /// Output format hint echoed in the response. Default `md`.
    pub format: Option<String>,
}
