// Shared helpers for the HTTP integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};

use cardscan::api::{create_router, AppState};
use cardscan::config::{
    AggregationPolicy, Config, OcrConfig, ResponseShape, ServerConfig, UploadConfig,
};
use cardscan::error::{CardscanError, Result};
use cardscan::ocr::Recognizer;

pub const BOUNDARY: &str = "cardscan-test-boundary";

static INIT: Once = Once::new();

/// Initialize tracing subscriber once for tests
pub fn init_test_logger() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Recognizer driven by the uploaded bytes themselves.
///
/// - `fail` fails with a reason that mentions the file's full path
/// - an empty file fails the way an undecodable image does
/// - `unavailable` reports the backend as missing
/// - `slow:<ms>:<text>` sleeps, then returns `<text>`
/// - anything else is returned as the recognised text
#[derive(Default)]
pub struct ScriptedRecognizer {
    pub calls: AtomicUsize,
    pub seen: std::sync::Mutex<Vec<(PathBuf, String)>>,
}

impl ScriptedRecognizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, path: &Path, language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((path.to_path_buf(), language.to_string()));

        let content = tokio::fs::read_to_string(path).await?;
        match content.as_str() {
            "" => Err(CardscanError::Recognition(
                "Preprocessing error: Failed to decode image: empty input".to_string(),
            )),
            "fail" => Err(CardscanError::Recognition(format!(
                "Tesseract error: exit status: 1\nError opening data file {}",
                path.display()
            ))),
            "unavailable" => Err(CardscanError::RecognitionUnavailable(
                "Tesseract not available".to_string(),
            )),
            other => match other.strip_prefix("slow:") {
                Some(rest) => {
                    let (ms, text) = rest.split_once(':').unwrap_or((rest, ""));
                    tokio::time::sleep(Duration::from_millis(ms.parse().unwrap())).await;
                    Ok(text.to_string())
                }
                None => Ok(other.trim().to_string()),
            },
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn test_config(temp_root: &Path) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["http://localhost:3000".to_string()],
            max_upload_bytes: 32 << 20,
        },
        upload: UploadConfig {
            temp_root: temp_root.to_path_buf(),
            aggregation: AggregationPolicy::FailFast,
            response_shape: ResponseShape::Compat,
            max_concurrency: 4,
            ..UploadConfig::default()
        },
        ocr: OcrConfig::default(),
    }
}

pub fn app_with(config: Config, recognizer: Arc<dyn Recognizer>) -> axum::Router {
    init_test_logger();
    create_router(AppState::new(config, recognizer))
}

/// One part of a hand-built multipart body.
pub enum Part<'a> {
    File {
        field: &'a str,
        filename: &'a str,
        data: &'a [u8],
    },
    Text {
        field: &'a str,
        value: &'a str,
    },
}

pub fn file<'a>(field: &'a str, filename: &'a str, data: &'a [u8]) -> Part<'a> {
    Part::File {
        field,
        filename,
        data,
    }
}

pub fn text<'a>(field: &'a str, value: &'a str) -> Part<'a> {
    Part::Text { field, value }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File {
                field,
                filename,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text { field, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload_request(parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/ocr")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Entries left under `root`, e.g. request workspaces that were not cleaned up.
pub fn leftover_entries(root: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(root)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}
