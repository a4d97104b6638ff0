use axum::extract::multipart::MultipartRejection;
use axum::extract::{FromRequest, Multipart, Request};

use crate::error::CardscanError;

/// `Multipart` whose rejection renders as the JSON `{"error": ...}` body.
pub struct AppMultipart(pub Multipart);

impl<S> FromRequest<S> for AppMultipart
where
    S: Send + Sync,
{
    type Rejection = CardscanError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Multipart::from_request(req, state)
            .await
            .map(AppMultipart)
            .map_err(CardscanError::from)
    }
}

impl From<MultipartRejection> for CardscanError {
    fn from(rejection: MultipartRejection) -> Self {
        map_multipart_rejection(rejection)
    }
}

fn map_multipart_rejection(rejection: MultipartRejection) -> CardscanError {
    match rejection {
        MultipartRejection::InvalidBoundary(_) => CardscanError::Validation(
            "Error parsing form: expected `Content-Type: multipart/form-data` with a boundary"
                .to_string(),
        ),
        _ => CardscanError::Validation(format!("Error parsing form: {}", rejection.body_text())),
    }
}
