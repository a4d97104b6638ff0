//! `POST /api/ocr`: multipart image upload in, recognised text out.

use axum::extract::multipart::Field;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::dto::{
    BatchOcrEntry, ErrorResponse, OcrResponseBody, OcrUploadForm, SingleOcrResponse,
};
use crate::api::extractors::AppMultipart;
use crate::api::AppState;
use crate::config::{AggregationPolicy, ResponseShape};
use crate::error::{CardscanError, Result};
use crate::upload::{process_batch, FileFailure, FileOutcome, RequestWorkspace, TempArtifact};

/// Which kind of form field carried the files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadMode {
    /// `image` or `file`: one file, single-object response.
    Single,
    /// `files` or `files[]`: any number, array response.
    Multiple,
}

enum FormField {
    File(UploadMode),
    Language,
    Format,
    Other,
}

impl FormField {
    fn classify(name: &str) -> Self {
        match name {
            "image" | "file" => Self::File(UploadMode::Single),
            "files" | "files[]" => Self::File(UploadMode::Multiple),
            "language" => Self::Language,
            "format" => Self::Format,
            _ => Self::Other,
        }
    }
}

#[derive(Default)]
struct ParsedUpload {
    singles: Vec<TempArtifact>,
    multiples: Vec<TempArtifact>,
    language: Option<String>,
    format: Option<String>,
}

async fn read_text(field: Field<'_>, name: &str) -> Result<Option<String>> {
    let value = field
        .text()
        .await
        .map_err(|e| CardscanError::Validation(format!("Error parsing form: invalid {name}: {e}")))?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}

/// Drain the form, streaming every file part into `workspace`.
async fn parse_upload(
    multipart: &mut axum::extract::Multipart,
    workspace: &RequestWorkspace,
) -> Result<ParsedUpload> {
    let mut parsed = ParsedUpload::default();
    let mut index = 0;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(CardscanError::Validation(format!(
                    "Error parsing form: {}",
                    e.body_text()
                )))
            }
        };

        let name = field.name().unwrap_or("").to_string();
        match FormField::classify(&name) {
            FormField::File(mode) => {
                // A part without a filename is a plain value, not a file.
                let Some(filename) = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|f| !f.is_empty())
                else {
                    debug!(field = %name, "Ignoring file field without a filename");
                    continue;
                };

                let artifact = workspace.persist(index, &filename, field).await?;
                debug!(
                    field = %name,
                    filename = %artifact.filename,
                    size = artifact.size,
                    "Stored upload"
                );
                index += 1;

                match mode {
                    UploadMode::Single => parsed.singles.push(artifact),
                    UploadMode::Multiple => parsed.multiples.push(artifact),
                }
            }
            FormField::Language => parsed.language = read_text(field, "language").await?,
            FormField::Format => parsed.format = read_text(field, "format").await?,
            FormField::Other => {}
        }
    }

    Ok(parsed)
}

/// Rebuild a per-file error as a client-facing one, keeping its status.
fn client_error(failure: &FileFailure, workspace: &RequestWorkspace) -> CardscanError {
    let message = format!(
        "OCR failed for {}: {}",
        failure.filename,
        workspace.scrub(&failure.error.client_message())
    );

    match failure.error {
        CardscanError::RecognitionUnavailable(_) => CardscanError::RecognitionUnavailable(message),
        CardscanError::Storage(_) | CardscanError::Io(_) => CardscanError::Storage(message),
        CardscanError::Internal(_) => CardscanError::Internal(message),
        _ => CardscanError::Recognition(message),
    }
}

fn batch_entry(outcome: FileOutcome, format: &str, workspace: &RequestWorkspace) -> BatchOcrEntry {
    match outcome.result {
        Ok(text) => BatchOcrEntry::success(outcome.filename, text, format),
        Err(e) => BatchOcrEntry::failure(
            outcome.filename,
            workspace.scrub(&e.client_message()),
            format,
        ),
    }
}

/// `POST /api/ocr`
///
/// Accepts one file under `image`/`file` or several under `files`, plus
/// optional `language` and `format` fields. Each file is written to a
/// request-scoped temp directory and run through the recognition backend.
#[utoipa::path(
    post,
    path = "/api/ocr",
    tag = "ocr",
    request_body(content = OcrUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Recognised text", body = OcrResponseBody),
        (status = 400, description = "Malformed form or no file", body = ErrorResponse),
        (status = 405, description = "Method other than POST", body = ErrorResponse),
        (status = 500, description = "Storage or recognition failure", body = ErrorResponse),
        (status = 503, description = "Recognition backend not installed", body = ErrorResponse),
    )
)]
#[tracing::instrument(skip_all, fields(request_id = tracing::field::Empty))]
pub async fn ocr_upload(
    State(state): State<AppState>,
    AppMultipart(mut multipart): AppMultipart,
) -> Result<Json<OcrResponseBody>> {
    let request_id = Uuid::new_v4();
    tracing::Span::current().record("request_id", tracing::field::display(request_id));

    let upload_config = &state.config.upload;
    let workspace = RequestWorkspace::create(&upload_config.temp_root, request_id)?;
    let parsed = parse_upload(&mut multipart, &workspace).await?;

    let language = parsed
        .language
        .unwrap_or_else(|| upload_config.default_language.clone());
    let format = parsed
        .format
        .unwrap_or_else(|| upload_config.default_format.clone());

    let (mode, artifacts) = if !parsed.singles.is_empty() {
        let mut singles = parsed.singles;
        if singles.len() > 1 {
            debug!("Ignoring {} extra single-field uploads", singles.len() - 1);
        }
        singles.truncate(1);
        (UploadMode::Single, singles)
    } else if !parsed.multiples.is_empty() {
        (UploadMode::Multiple, parsed.multiples)
    } else {
        return Err(CardscanError::Validation(
            "No image file provided (expected 'image' or 'files' field)".to_string(),
        ));
    };

    // A lone file has no siblings to tolerate failures for.
    let policy = match mode {
        UploadMode::Single => AggregationPolicy::FailFast,
        UploadMode::Multiple => upload_config.aggregation,
    };

    info!(
        files = artifacts.len(),
        language = %language,
        backend = state.recognizer.name(),
        "Processing OCR upload"
    );

    let outcomes = match process_batch(
        state.recognizer.as_ref(),
        &artifacts,
        &language,
        policy,
        upload_config.max_concurrency,
    )
    .await
    {
        Ok(outcomes) => outcomes,
        Err(failure) => {
            warn!(
                filename = %failure.filename,
                error = %failure.error,
                "OCR failed, aborting request"
            );
            return Err(client_error(&failure, &workspace));
        }
    };

    for outcome in &outcomes {
        match &outcome.result {
            Ok(text) => debug!(filename = %outcome.filename, chars = text.len(), "OCR succeeded"),
            Err(e) => warn!(filename = %outcome.filename, error = %e, "OCR failed for file"),
        }
    }

    let body = match (mode, upload_config.response_shape) {
        (UploadMode::Single, ResponseShape::Compat) => {
            let outcome = outcomes.into_iter().next().ok_or_else(|| {
                CardscanError::Internal("No OCR result for uploaded file".to_string())
            })?;
            let content = outcome
                .result
                .map_err(|e| CardscanError::Recognition(workspace.scrub(&e.client_message())))?;
            OcrResponseBody::Single(SingleOcrResponse {
                content,
                filename: outcome.filename,
                format,
            })
        }
        _ => OcrResponseBody::Batch(
            outcomes
                .into_iter()
                .map(|outcome| batch_entry(outcome, &format, &workspace))
                .collect(),
        ),
    };

    info!("OCR upload complete");
    Ok(Json(body))
}

/// Fallback for every method other than POST on the OCR route.
pub async fn method_not_allowed() -> impl IntoResponse {
    ([(header::ALLOW, "POST")], CardscanError::MethodNotAllowed)
}
