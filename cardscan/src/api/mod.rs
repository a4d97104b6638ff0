mod dto;
mod extractors;
mod handlers;
mod openapi;
mod routes;
mod state;

pub use dto::{BatchOcrEntry, ErrorResponse, OcrResponseBody, SingleOcrResponse};
pub use openapi::ApiDoc;
pub use routes::create_router;
pub use state::AppState;
