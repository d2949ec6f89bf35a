//! Authentication API Endpoints
//! Mission: Provide captcha, registration and login endpoints

use crate::auth::{
    captcha::CaptchaStore,
    jwt::JwtHandler,
    models::{AuthRequest, CaptchaResponse, LoginResponse},
    user_store::{AccountError, UserStore},
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const MIN_USERNAME_CHARS: usize = 3;
pub const MIN_PASSWORD_CHARS: usize = 6;
pub const CREDENTIALS_HINT: &str = "username min 3 chars, password min 6 chars";

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub captcha: Arc<CaptchaStore>,
    pub jwt_handler: Arc<JwtHandler>,
}

impl AuthState {
    pub fn new(
        user_store: Arc<UserStore>,
        captcha: Arc<CaptchaStore>,
        jwt_handler: Arc<JwtHandler>,
    ) -> Self {
        Self {
            user_store,
            captcha,
            jwt_handler,
        }
    }
}

/// Username (after trimming) and password length rules shared with admin user creation
pub fn validate_credentials(username: &str, password: &str) -> Result<(), AuthApiError> {
    if username.chars().count() < MIN_USERNAME_CHARS
        || password.chars().count() < MIN_PASSWORD_CHARS
    {
        return Err(AuthApiError::WeakCredentials);
    }
    Ok(())
}

async fn check_captcha(state: &AuthState, req: &AuthRequest) -> Result<(), AuthApiError> {
    let ok = state
        .captcha
        .verify(req.captcha_id.trim(), req.captcha_code.trim())
        .await
        .map_err(|e| {
            error!("Captcha verification failed: {:#}", e);
            AuthApiError::CaptchaUnavailable
        })?;
    if !ok {
        return Err(AuthApiError::InvalidCaptcha);
    }
    Ok(())
}

async fn consume_captcha(state: &AuthState, id: &str) {
    if let Err(e) = state.captcha.consume(id.trim()).await {
        warn!("Failed to consume captcha {}: {:#}", id, e);
    }
}

/// Captcha endpoint - GET /api/v1/auth/captcha
pub async fn captcha(
    State(state): State<AuthState>,
) -> Result<Json<CaptchaResponse>, AuthApiError> {
    let (captcha_id, code) = state.captcha.create().await.map_err(|e| {
        error!("Failed to create captcha: {:#}", e);
        AuthApiError::InternalError("failed to create captcha")
    })?;
    Ok(Json(CaptchaResponse { captcha_id, code }))
}

/// Register endpoint - POST /api/v1/auth/register
pub async fn register(
    State(state): State<AuthState>,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthApiError> {
    let Json(payload) = payload.map_err(|_| AuthApiError::InvalidRequest)?;
    let username = payload.username.trim();
    validate_credentials(username, &payload.password)?;
    check_captcha(&state, &payload).await?;

    let user = state
        .user_store
        .register(username, &payload.password)
        .await
        .map_err(AuthApiError::from)?;
    consume_captcha(&state, &payload.captcha_id).await;

    info!("✅ Registered: {}", user.username);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": user.id.to_string(), "username": user.username })),
    ))
}

/// Login endpoint - POST /api/v1/auth/login
pub async fn login(
    State(state): State<AuthState>,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AuthApiError> {
    let Json(payload) = payload.map_err(|_| AuthApiError::InvalidRequest)?;
    let username = payload.username.trim();
    info!("🔐 Login attempt: {}", username);
    check_captcha(&state, &payload).await?;

    let user = state
        .user_store
        .authenticate(username, &payload.password)
        .await
        .map_err(|e| {
            warn!("❌ Failed login attempt: {} ({})", username, e);
            AuthApiError::from(e)
        })?;

    let token = state.jwt_handler.generate_token(&user).map_err(|e| {
        error!("Failed to sign token: {:#}", e);
        AuthApiError::InternalError("internal server error")
    })?;
    consume_captcha(&state, &payload.captcha_id).await;

    info!("✅ Login successful: {} (admin: {})", user.username, user.is_admin);
    Ok(Json(LoginResponse {
        token,
        username: user.username,
        id: user.id.to_string(),
        is_admin: user.is_admin,
    }))
}

/// Auth API errors
#[derive(Debug)]
pub enum AuthApiError {
    InvalidRequest,
    WeakCredentials,
    InvalidCaptcha,
    CaptchaUnavailable,
    InvalidCredentials,
    AccountBanned,
    UserNotFound,
    UserAlreadyExists,
    InternalError(&'static str),
}

impl From<AccountError> for AuthApiError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::UsernameTaken => AuthApiError::UserAlreadyExists,
            AccountError::NotFound => AuthApiError::UserNotFound,
            AccountError::Banned => AuthApiError::AccountBanned,
            AccountError::InvalidCredentials => AuthApiError::InvalidCredentials,
            AccountError::Internal(e) => {
                error!("Account store failure: {:#}", e);
                AuthApiError::InternalError("internal server error")
            }
        }
    }
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidRequest => (StatusCode::BAD_REQUEST, "invalid request"),
            AuthApiError::WeakCredentials => (StatusCode::BAD_REQUEST, CREDENTIALS_HINT),
            AuthApiError::InvalidCaptcha => (StatusCode::BAD_REQUEST, "invalid captcha"),
            AuthApiError::CaptchaUnavailable => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "captcha verification failed",
            ),
            AuthApiError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid credentials"),
            AuthApiError::AccountBanned => (StatusCode::FORBIDDEN, "account banned"),
            AuthApiError::UserNotFound => (StatusCode::NOT_FOUND, "user not found"),
            AuthApiError::UserAlreadyExists => {
                (StatusCode::BAD_REQUEST, "username already exists")
            }
            AuthApiError::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_credentials() {
        assert!(validate_credentials("abc", "123456").is_ok());
        assert!(validate_credentials("ab", "123456").is_err());
        assert!(validate_credentials("abc", "12345").is_err());
        // character count, not bytes
        assert!(validate_credentials("灵宝", "123456").is_err());
        assert!(validate_credentials("灵宝阁", "123456").is_ok());
    }

    #[test]
    fn test_auth_api_error_responses() {
        assert_eq!(
            AuthApiError::InvalidCredentials.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthApiError::InvalidCaptcha.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthApiError::AccountBanned.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AuthApiError::UserNotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AuthApiError::InternalError("boom").into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_account_error_mapping() {
        assert!(matches!(
            AuthApiError::from(AccountError::UsernameTaken),
            AuthApiError::UserAlreadyExists
        ));
        assert!(matches!(
            AuthApiError::from(AccountError::Internal(anyhow::anyhow!("redis down"))),
            AuthApiError::InternalError(_)
        ));
    }
}
