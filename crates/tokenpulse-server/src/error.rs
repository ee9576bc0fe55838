use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokenpulse_core::PulseError;

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(PulseError::InvalidConfig(msg.into()).into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<PulseError>() {
            Some(PulseError::TokenNotFound(_)) => StatusCode::NOT_FOUND,
            Some(
                PulseError::InvalidIdentifier(_)
                | PulseError::InvalidConfig(_)
                | PulseError::NotInitialized,
            ) => StatusCode::BAD_REQUEST,
            Some(_) | None => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
