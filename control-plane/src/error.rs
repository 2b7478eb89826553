use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use intercept_common::ModificationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("invalid action: {0}")]
    InvalidAction(#[from] ModificationError),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("repeater request failed: {0}")]
    Repeater(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("logging error: {0}")]
    Logging(String),

    #[error("embedded proxy error: {0}")]
    Proxy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlPlaneError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ControlPlaneError::InvalidAction(_) | ControlPlaneError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ControlPlaneError::Repeater(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlPlaneError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
