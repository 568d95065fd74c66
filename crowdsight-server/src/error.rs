// Server error type and its HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use crowdsight_core::Error as CoreError;
use crowdsight_eye::VisionError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Maximum viewers ({0}) reached")]
    ViewerLimit(usize),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::ViewerLimit(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Vision(VisionError::Transport(_)) | ServerError::Vision(VisionError::InvalidResponse(_)) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Every failure leaves as `{ "success": false, "error": ... }`
impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::Vision(VisionError::Transport("timed out".to_string())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServerError::Vision(VisionError::Extraction("bad file".to_string())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ServerError::BadRequest("empty".to_string()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ServerError::ViewerLimit(3).status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_transparent_display() {
        let err = ServerError::from(VisionError::Reassembly("encoder crashed".to_string()));
        assert_eq!(err.to_string(), "Video reassembly failed: encoder crashed");
    }
}
