//! API error mapping
//!
//! Every failure leaves the service as `{"error": "<message>"}`. Store and
//! internal details are logged, never returned.

use crate::admin::audit::FeedbackError;
use crate::auth::AccountError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// 500 with a fixed public message; `source` is logged only
    Internal {
        message: &'static str,
        source: anyhow::Error,
    },
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    /// `map_err` adapter: `.map_err(ApiError::internal("failed to submit"))`
    pub fn internal<E>(message: &'static str) -> impl FnOnce(E) -> ApiError
    where
        E: Into<anyhow::Error>,
    {
        move |e| ApiError::Internal {
            message,
            source: e.into(),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::NotFound => ApiError::NotFound("user not found".to_string()),
            AccountError::UsernameTaken
            | AccountError::Banned
            | AccountError::InvalidCredentials => ApiError::BadRequest(err.to_string()),
            AccountError::Internal(source) => ApiError::Internal {
                message: "internal server error",
                source,
            },
        }
    }
}

impl From<FeedbackError> for ApiError {
    fn from(err: FeedbackError) -> Self {
        match err {
            FeedbackError::NotFound => ApiError::NotFound(err.to_string()),
            FeedbackError::AlreadyResolved => ApiError::BadRequest(err.to_string()),
            FeedbackError::Internal(source) => ApiError::Internal {
                message: "failed to resolve feedback",
                source,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Internal { message, source } => {
                tracing::error!("{}: {:#}", message, source);
                (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
