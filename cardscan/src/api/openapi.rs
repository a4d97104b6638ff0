use axum::Json;
use utoipa::OpenApi;
use utoipa_redoc::{Redoc, Servable};

use super::dto;
use super::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cardscan API",
        version = "0.1.0",
        description = "Upload scanned images, get their text back.",
    ),
    paths(
        handlers::health::health_check,
        handlers::ocr::ocr_upload,
    ),
    components(schemas(
        dto::SingleOcrResponse,
        dto::BatchOcrEntry,
        dto::OcrResponseBody,
        dto::ErrorResponse,
        dto::OcrUploadForm,
        handlers::health::HealthData,
    )),
    tags(
        (name = "health", description = "Health check"),
        (name = "ocr", description = "Image upload and text recognition"),
    ),
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn redoc_router<S: Clone + Send + Sync + 'static>() -> axum::Router<S> {
    Redoc::with_url("/api/docs", ApiDoc::openapi()).into()
}
