use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use orchard_db::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Every failure a handler can return. The JSON body is always
/// `{ "error": <message>, "code": <CODE> }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    BadRequest { code: &'static str, message: String },

    #[error("{message}")]
    Unauthorized { code: &'static str, message: String },

    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error("Invalid file type: {0}")]
    UnsupportedMediaType(String),

    #[error("Upload exceeds the size limit")]
    PayloadTooLarge,

    #[error("Database error: {0}")]
    Store(StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest { code, message: message.into() }
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::Unauthorized { code, message: message.into() }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict { code, message: message.into() }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::BadRequest { code, .. } => (StatusCode::BAD_REQUEST, *code),
            Self::Unauthorized { code, .. } => (StatusCode::UNAUTHORIZED, *code),
            Self::Conflict { code, .. } => (StatusCode::CONFLICT, *code),
            Self::UnsupportedMediaType(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "INVALID_FILE_TYPE")
            }
            Self::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            Self::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ISSUE"),
            Self::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "UNKNOWN_ERROR"),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::AlreadyExists { .. } => Self::conflict("ALREADY_EXISTS", err.to_string()),
            StoreError::FileMissing(_) => Self::conflict("FILE_MISSING", err.to_string()),
            other => Self::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": code,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_becomes_404() {
        let err: ApiError = StoreError::NotFound { entity: "tree", id: 3 }.into();
        assert_eq!(err.status_and_code(), (StatusCode::NOT_FOUND, "NOT_FOUND"));
        assert_eq!(err.to_string(), "tree not found: 3");
    }

    #[test]
    fn missing_file_is_a_conflict() {
        let err: ApiError = StoreError::FileMissing("uploads/x.jpg".into()).into();
        assert_eq!(err.status_and_code(), (StatusCode::CONFLICT, "FILE_MISSING"));
    }

    #[test]
    fn store_unavailable_is_500() {
        let err: ApiError = StoreError::Unavailable("down".into()).into();
        assert_eq!(
            err.status_and_code(),
            (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ISSUE")
        );
    }
}
