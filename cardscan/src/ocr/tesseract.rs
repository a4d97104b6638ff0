use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use leptess::LepTess;
use lru::LruCache;
use tracing::debug;

use crate::config::OcrConfig;
use crate::error::{CardscanError, Result};

use super::{validate_language, Recognizer};

type Shared<T> = Arc<Mutex<T>>;

/// Collapse equivalent language sets onto one key: `eng+eng+deu` and
/// `eng+deu` both become `eng+deu`. Order is kept since Tesseract treats
/// the first language as primary.
pub(crate) fn canonical_language(language: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in language.split('+').filter(|p| !p.is_empty()) {
        if !parts.contains(&part) {
            parts.push(part);
        }
    }
    parts.join("+")
}

/// LRU of loaded engines keyed by canonical language set.
///
/// Evicted engines still in use stay alive until their last `Arc` drops.
struct EngineCache<T> {
    entries: Mutex<LruCache<String, Shared<T>>>,
}

impl<T> EngineCache<T> {
    fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Blocking when `load` is: the lock is held while loading so one
    /// language is never loaded twice.
    fn get_or_load(&self, language: &str, load: impl FnOnce(&str) -> Result<T>) -> Result<Shared<T>> {
        let key = canonical_language(language);
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CardscanError::Internal("Tesseract engine cache poisoned".into()))?;

        if let Some(engine) = entries.get(&key) {
            return Ok(Arc::clone(engine));
        }

        let engine = Arc::new(Mutex::new(load(&key)?));
        if let Some((evicted, _)) = entries.push(key, Arc::clone(&engine)) {
            debug!(language = %evicted, "Evicted Tesseract engine");
        }
        Ok(engine)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// In-process Tesseract via leptess, one engine per language set.
#[derive(Clone)]
pub struct TesseractRecognizer {
    engines: Arc<EngineCache<LepTess>>,
    tessdata_dir: Option<String>,
    timeout: Duration,
}

fn create_tesseract(tessdata_dir: Option<&str>, language: &str) -> Result<LepTess> {
    LepTess::new(tessdata_dir, language).map_err(|e| {
        CardscanError::Recognition(format!("Unsupported language '{language}': {e}"))
    })
}

impl TesseractRecognizer {
    /// Initialises an engine for `warm_language` up front.
    pub fn new(config: &OcrConfig, warm_language: &str) -> Result<Self> {
        let recognizer = Self {
            engines: Arc::new(EngineCache::new(config.engine_cache_size)),
            tessdata_dir: config.tessdata_dir.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        };
        recognizer.engine_for(warm_language)?;
        Ok(recognizer)
    }

    /// Blocking: may load traineddata from disk.
    fn engine_for(&self, language: &str) -> Result<Shared<LepTess>> {
        self.engines.get_or_load(language, |key| {
            debug!(language = key, "Loading Tesseract engine");
            create_tesseract(self.tessdata_dir.as_deref(), key)
        })
    }
}

#[async_trait]
impl Recognizer for TesseractRecognizer {
    async fn recognize(&self, path: &Path, language: &str) -> Result<String> {
        validate_language(language)?;

        let this = self.clone();
        let path = path.to_path_buf();
        let language = language.to_string();

        let task = tokio::task::spawn_blocking(move || {
            let engine = this.engine_for(&language)?;
            let mut lt = engine
                .lock()
                .map_err(|_| CardscanError::Internal("Tesseract engine poisoned".into()))?;
            lt.set_image(&path)
                .map_err(|e| CardscanError::Recognition(format!("Failed to set image: {e}")))?;
            lt.get_utf8_text()
                .map_err(|e| CardscanError::Recognition(format!("Failed to extract text: {e}")))
        });

        let text = match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => {
                joined.map_err(|e| CardscanError::Internal(format!("OCR task panicked: {e}")))??
            }
            Err(_) => {
                return Err(CardscanError::Recognition(format!(
                    "OCR operation timed out after {} seconds",
                    self.timeout.as_secs()
                )))
            }
        };

        Ok(text.trim().to_string())
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}
