//! API error envelope, OpenAI shaped: `{"error": {"message", "type", "code"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use choraleia::CoreError;

pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_request_error",
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            kind: "not_found_error",
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::CONFLICT,
            kind: "conflict_error",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "server_error",
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("api error: {}", self.message);
        }
        let body = serde_json::json!({
            "error": {
                "message": self.message,
                "type": self.kind,
                "code": self.status.as_u16(),
            }
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match &e {
            CoreError::UserInput(m) => ApiError::bad_request(m.clone()),
            CoreError::NotFound(m) => ApiError::not_found(m.clone()),
            CoreError::Conflict(m) => ApiError::conflict(m.clone()),
            CoreError::Store(choraleia_store::StoreError::NotFound(m)) => {
                ApiError::not_found(m.clone())
            }
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl From<choraleia_store::StoreError> for ApiError {
    fn from(e: choraleia_store::StoreError) -> Self {
        match &e {
            choraleia_store::StoreError::NotFound(m) => ApiError::not_found(m.clone()),
            choraleia_store::StoreError::Conflict(m) => ApiError::conflict(m.clone()),
            choraleia_store::StoreError::Storage(m) => ApiError::internal(m.clone()),
        }
    }
}

impl From<remote_fs::FsError> for ApiError {
    fn from(e: remote_fs::FsError) -> Self {
        use remote_fs::FsError;
        match &e {
            FsError::NotFound(m) => ApiError::not_found(m.clone()),
            FsError::NotADirectory(m) | FsError::InvalidEndpoint(m) => {
                ApiError::bad_request(m.clone())
            }
            FsError::AlreadyExists(m) => ApiError::conflict(m.clone()),
            FsError::AccessDenied(m) => ApiError {
                status: StatusCode::FORBIDDEN,
                kind: "forbidden_error",
                message: m.clone(),
            },
            _ => ApiError::internal(e.to_string()),
        }
    }
}
