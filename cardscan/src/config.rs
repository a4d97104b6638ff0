use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

fn parse_env_or<T: FromStr>(var: &str, default: T) -> T
where
    T::Err: fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: FromStr>(var: &str) -> Option<T>
where
    T::Err: fmt::Display,
{
    match env::var(var) {
        Ok(val) if val.trim().is_empty() => None,
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Parse `CARDSCAN_CORS_ORIGINS`.
/// Format: comma-separated origins, e.g. `http://localhost:3000,https://cards.example.com`
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// What happens to a batch when one file fails recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Abort the whole request with the first failure (in input order).
    FailFast,
    /// Record a per-file error entry and keep going.
    Tolerant,
}

impl FromStr for AggregationPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fail_fast" | "failfast" => Ok(Self::FailFast),
            "tolerant" => Ok(Self::Tolerant),
            other => Err(format!("expected 'fail_fast' or 'tolerant', got '{other}'")),
        }
    }
}

/// Wire shape of successful OCR responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// Single object for the `image`/`file` field, array for `files`.
    Compat,
    /// Always an array, even for a single upload.
    Array,
}

impl FromStr for ResponseShape {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "compat" => Ok(Self::Compat),
            "array" => Ok(Self::Array),
            other => Err(format!("expected 'compat' or 'array', got '{other}'")),
        }
    }
}

/// Which recognition backend sits behind the `Recognizer` seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackendKind {
    /// Preprocess step followed by the `tesseract` CLI.
    Pipeline,
    /// In-process Tesseract through leptess, no preprocessing.
    Tesseract,
}

impl FromStr for OcrBackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pipeline" => Ok(Self::Pipeline),
            "tesseract" | "local/tesseract" | "direct" => Ok(Self::Tesseract),
            other => Err(format!("expected 'pipeline' or 'tesseract', got '{other}'")),
        }
    }
}

impl fmt::Display for OcrBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::Tesseract => write!(f, "tesseract"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub ocr: OcrConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub temp_root: PathBuf,
    pub aggregation: AggregationPolicy,
    pub response_shape: ResponseShape,
    pub max_concurrency: usize,
    pub default_language: String,
    pub default_format: String,
    pub stale_after_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    pub backend: OcrBackendKind,
    pub tesseract_bin: String,
    pub tessdata_dir: Option<String>,
    /// Argv of an external preprocessor; the input path is appended.
    /// `None` selects the built-in preprocessing.
    pub preprocess_command: Option<Vec<String>>,
    pub timeout_secs: u64,
    pub max_image_dimension: u32,
    pub min_image_dimension: u32,
    /// Upper bound on leptess engines kept loaded, one per language set.
    pub engine_cache_size: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            backend: OcrBackendKind::Pipeline,
            tesseract_bin: "tesseract".to_string(),
            tessdata_dir: None,
            preprocess_command: None,
            timeout_secs: 60,
            max_image_dimension: 4096,
            min_image_dimension: 16,
            engine_cache_size: 4,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_root: env::temp_dir(),
            aggregation: AggregationPolicy::FailFast,
            response_shape: ResponseShape::Compat,
            max_concurrency: 4,
            default_language: "eng".to_string(),
            default_format: "md".to_string(),
            stale_after_secs: 3600,
            sweep_interval_secs: 600,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("CARDSCAN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env_or("CARDSCAN_PORT", 8080),
                cors_origins: parse_origins(
                    &env::var("CARDSCAN_CORS_ORIGINS")
                        .unwrap_or_else(|_| "http://localhost:3000".to_string()),
                ),
                max_upload_bytes: parse_env_or("CARDSCAN_MAX_UPLOAD_BYTES", 32 << 20),
            },
            upload: UploadConfig {
                temp_root: env::var("CARDSCAN_TEMP_DIR")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(env::temp_dir),
                aggregation: parse_env_or("CARDSCAN_AGGREGATION", AggregationPolicy::FailFast),
                response_shape: parse_env_or("CARDSCAN_RESPONSE_SHAPE", ResponseShape::Compat),
                max_concurrency: parse_env_or("CARDSCAN_MAX_CONCURRENCY", 4usize).max(1),
                default_language: env::var("CARDSCAN_DEFAULT_LANGUAGE")
                    .unwrap_or_else(|_| "eng".to_string()),
                default_format: env::var("CARDSCAN_DEFAULT_FORMAT")
                    .unwrap_or_else(|_| "md".to_string()),
                stale_after_secs: parse_env_or("CARDSCAN_STALE_WORKSPACE_SECS", 3600),
                sweep_interval_secs: parse_env_or("CARDSCAN_SWEEP_INTERVAL_SECS", 600),
            },
            ocr: OcrConfig {
                backend: parse_env_or("OCR_BACKEND", OcrBackendKind::Pipeline),
                tesseract_bin: env::var("OCR_TESSERACT_BIN")
                    .unwrap_or_else(|_| "tesseract".to_string()),
                tessdata_dir: parse_env_opt("OCR_TESSDATA_DIR"),
                preprocess_command: env::var("OCR_PREPROCESS_COMMAND").ok().and_then(|raw| {
                    let argv: Vec<String> = raw.split_whitespace().map(String::from).collect();
                    (!argv.is_empty()).then_some(argv)
                }),
                timeout_secs: parse_env_or("OCR_TIMEOUT", 60),
                max_image_dimension: parse_env_or("OCR_MAX_DIMENSION", 4096),
                min_image_dimension: parse_env_or("OCR_MIN_DIMENSION", 16),
                engine_cache_size: parse_env_or("OCR_ENGINE_CACHE_SIZE", 4usize).max(1),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}
