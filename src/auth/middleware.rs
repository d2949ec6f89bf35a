//! Authentication Middleware
//! Mission: Protect API endpoints with JWT validation

use crate::auth::{api::AuthState, jwt::JwtHandler, models::Claims, user_store::AccountError};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, warn};

/// Bearer token from the Authorization header, if any
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s).trim())
        .filter(|t| !t.is_empty())
}

/// Auth middleware that validates JWT tokens and rejects banned accounts
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer_token(req.headers()).ok_or(AuthError::MissingToken)?;

    let claims = auth
        .jwt_handler
        .validate_token(token)
        .map_err(|_| AuthError::InvalidToken)?;

    // A lookup failure does not block the request; the token is still valid
    match auth.user_store.is_banned(&claims.username).await {
        Ok(true) => {
            warn!("🚫 Banned account rejected: {}", claims.username);
            return Err(AuthError::Banned);
        }
        Ok(false) => {}
        Err(AccountError::NotFound) => debug!("Token for unknown user {}", claims.username),
        Err(e) => warn!("Ban check failed for {}: {}", claims.username, e),
    }

    // Add claims to request extensions so handlers can access them
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Admin gate, layered inside [`auth_middleware`]
pub async fn admin_middleware(req: Request, next: Next) -> Result<Response, AuthError> {
    let claims = extract_claims(&req).ok_or(AuthError::AccessDenied)?;
    if !claims.admin {
        return Err(AuthError::AdminRequired);
    }
    Ok(next.run(req).await)
}

/// Identity from an optional bearer token; invalid tokens count as anonymous
pub fn optional_claims(headers: &HeaderMap, jwt_handler: &JwtHandler) -> Option<Claims> {
    let token = bearer_token(headers)?;
    jwt_handler.validate_token(token).ok()
}

/// Extract claims from request (use after auth middleware)
pub fn extract_claims(req: &Request) -> Option<&Claims> {
    req.extensions().get::<Claims>()
}

/// Auth error types
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    Banned,
    AccessDenied,
    AdminRequired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => {
                (StatusCode::UNAUTHORIZED, "missing authorization header")
            }
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid token"),
            AuthError::Banned => (StatusCode::FORBIDDEN, "account banned"),
            AuthError::AccessDenied => (StatusCode::FORBIDDEN, "access denied"),
            AuthError::AdminRequired => (StatusCode::FORBIDDEN, "admin required"),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
