use std::sync::Arc;

use crate::config::Config;
use crate::ocr::Recognizer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Backend chosen at startup; the handlers only see the trait.
    pub recognizer: Arc<dyn Recognizer>,
}

impl AppState {
    pub fn new(config: Config, recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            config: Arc::new(config),
            recognizer,
        }
    }
}
