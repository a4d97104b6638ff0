//! Cardscan: an HTTP service that turns uploaded images into text.

pub mod api;
pub mod config;
pub mod error;
pub mod ocr;
pub mod upload;
