//! HTTP-facing error type.
//!
//! JSON endpoints answer `{"success": false, "error": "..."}` so browser
//! code can show the message directly.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Login required")]
    LoginRequired,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::LoginRequired => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Store(e) => match e {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::Unauthorized(_) => StatusCode::FORBIDDEN,
                StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
                StoreError::Conflict(_) => StatusCode::CONFLICT,
                StoreError::Database(_)
                | StoreError::Http(_)
                | StoreError::Remote(_)
                | StoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Message safe to show a user; backend details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Store(StoreError::Unauthorized(msg)) => format!("Unauthorized: {}", msg),
            AppError::Store(StoreError::NotFound(_)) => "Not found".to_string(),
            AppError::Store(StoreError::Invalid(msg)) => msg.clone(),
            AppError::Store(StoreError::Conflict(_)) => {
                "Too many simultaneous updates, please retry".to_string()
            }
            AppError::Store(_) => "Storage error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (
            status,
            Json(json!({"success": false, "error": self.public_message()})),
        )
            .into_response()
    }
}

/// `Json` extractor whose rejections (bad syntax, wrong types, missing
/// content type) answer in the same JSON error shape as handler errors.
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::LoginRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::from(StoreError::Unauthorized("x".into())).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(StoreError::Remote("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_public_message_hides_backend_detail() {
        let err = AppError::from(StoreError::Remote("secret token rejected".into()));
        assert_eq!(err.public_message(), "Storage error");
        let err = AppError::from(StoreError::Unauthorized("You can only delete your own notes.".into()));
        assert_eq!(
            err.public_message(),
            "Unauthorized: You can only delete your own notes."
        );
    }
}
