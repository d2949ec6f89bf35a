//! Admin API Endpoints
//! Mission: User moderation, feed corrections and feedback triage
//!
//! All routes sit behind `auth_middleware` + `admin_middleware`; every
//! mutation leaves an entry in the admin log.

use crate::admin::models::{
    AdminLogEntry, AdminLogKind, FeedbackMessage, ResolveAction, ResolveFeedbackRequest,
};
use crate::api::{error::ApiError, AppState};
use crate::auth::{
    api::{validate_credentials, CREDENTIALS_HINT},
    models::{Claims, UserResponse},
};
use crate::feed::{FeedError, RemovalCounts};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

const FEEDBACK_PAGE: usize = 200;
const LOGS_PAGE: usize = 200;

fn actor(claims: &Claims) -> String {
    match claims.username.trim() {
        "" => "system".to_string(),
        name => name.to_string(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    #[serde(default)]
    pub banned: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackQuery {
    pub include_resolved: Option<String>,
}

/// Lenient boolean query flag; anything unrecognized keeps the default
fn parse_flag(raw: Option<&str>, default: bool) -> bool {
    match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1" | "yes" | "on") => true,
        Some("false" | "0" | "no" | "off") => false,
        _ => default,
    }
}

/// GET /api/v1/admin/users
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = state
        .auth
        .user_store
        .list_users()
        .await
        .map_err(ApiError::internal("failed to list users"))?;
    Ok(Json(users.iter().map(UserResponse::from_user).collect()))
}

/// POST /api/v1/admin/users
pub async fn create_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let Json(payload) = payload.map_err(|_| ApiError::bad_request("invalid request"))?;
    let username = payload.username.trim();
    validate_credentials(username, &payload.password)
        .map_err(|_| ApiError::bad_request(CREDENTIALS_HINT))?;

    let user = state
        .auth
        .user_store
        .create_user(username, &payload.password, payload.is_admin)
        .await?;

    state
        .admin
        .record(
            AdminLogEntry::new(AdminLogKind::UserCreated, "admin created user")
                .actor(actor(&claims))
                .meta("username", username)
                .meta("isAdmin", payload.is_admin),
        )
        .await;

    Ok((StatusCode::CREATED, Json(UserResponse::from_user(&user))))
}

/// PATCH /api/v1/admin/users/:username/ban
pub async fn set_user_ban(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(username): Path<String>,
    payload: Result<Json<BanRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::bad_request("missing username"));
    }
    let Json(payload) = payload.map_err(|_| ApiError::bad_request("invalid request"))?;

    let user = state
        .auth
        .user_store
        .set_banned(username, payload.banned)
        .await?;

    state
        .admin
        .record(
            AdminLogEntry::new(AdminLogKind::UserBanChanged, "admin changed user ban state")
                .actor(actor(&claims))
                .meta("username", username)
                .meta("banned", payload.banned),
        )
        .await;

    Ok(Json(UserResponse::from_user(&user)))
}

/// DELETE /api/v1/admin/users/:username
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(username): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::bad_request("missing username"));
    }

    state
        .auth
        .user_store
        .delete_user(username)
        .await
        .map_err(ApiError::internal("failed to delete user"))?;

    state
        .admin
        .record(
            AdminLogEntry::new(AdminLogKind::UserDeleted, "admin deleted user")
                .actor(actor(&claims))
                .meta("username", username),
        )
        .await;

    Ok(Json(json!({ "status": "ok" })))
}

/// Run `DeleteByCode`; on failure, audit what was already removed before surfacing 500
async fn delete_code(
    state: &AppState,
    code: &str,
    actor: &str,
) -> Result<RemovalCounts, ApiError> {
    match state.feed.delete_by_code(code).await {
        Ok(removed) => Ok(removed),
        Err(e) => {
            let removed = e.removed();
            error!(
                code,
                removed_time = removed.time,
                removed_price = removed.price,
                "delete by code failed: {}",
                e
            );
            if removed.total() > 0 {
                state
                    .admin
                    .record(
                        AdminLogEntry::new(
                            AdminLogKind::PriceDeleted,
                            "partial delete of code from market feed",
                        )
                        .actor(actor)
                        .meta("code", code)
                        .meta("removedTime", removed.time)
                        .meta("removedPrice", removed.price)
                        .meta("partial", true),
                    )
                    .await;
            }
            Err(ApiError::internal::<FeedError>("failed to delete code")(e))
        }
    }
}

/// DELETE /api/v1/admin/prices/:code
pub async fn delete_prices_by_code(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        return Err(ApiError::bad_request("missing code"));
    }
    let actor = actor(&claims);

    let removed = delete_code(&state, &code, &actor).await?;

    state
        .admin
        .record(
            AdminLogEntry::new(AdminLogKind::PriceDeleted, "admin deleted code from market feed")
                .actor(&actor)
                .meta("code", &code)
                .meta("removedTime", removed.time)
                .meta("removedPrice", removed.price),
        )
        .await;

    info!("🧹 {} removed code {} ({} time / {} price)", actor, code, removed.time, removed.price);
    Ok(Json(json!({
        "status": "ok",
        "removed_time": removed.time,
        "removed_price": removed.price,
    })))
}

/// GET /api/v1/admin/feedback?includeResolved=
pub async fn list_feedback(
    State(state): State<AppState>,
    Query(params): Query<FeedbackQuery>,
) -> Result<Json<Vec<FeedbackMessage>>, ApiError> {
    let include_resolved = parse_flag(params.include_resolved.as_deref(), true);
    let feedback = state
        .admin
        .list_feedback(FEEDBACK_PAGE, include_resolved)
        .await
        .map_err(ApiError::internal("failed to list feedback"))?;
    Ok(Json(feedback))
}

/// POST /api/v1/admin/feedback/:id/resolve
pub async fn resolve_feedback(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    payload: Result<Json<ResolveFeedbackRequest>, JsonRejection>,
) -> Result<Json<FeedbackMessage>, ApiError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::bad_request("missing feedback id"));
    }
    let Json(payload) = payload.map_err(|_| ApiError::bad_request("invalid request"))?;
    let action =
        ResolveAction::parse(&payload.action).ok_or_else(|| ApiError::bad_request("invalid action"))?;

    let feedback = state
        .admin
        .get_feedback(id)
        .await
        .map_err(ApiError::internal("failed to load feedback"))?
        .ok_or_else(|| ApiError::NotFound("feedback not found".to_string()))?;
    if feedback.resolved {
        return Err(ApiError::bad_request("feedback already resolved"));
    }

    let resolver = actor(&claims);
    let removed = match action {
        ResolveAction::Delete => {
            delete_code(&state, &feedback.code.to_uppercase(), &resolver).await?
        }
        ResolveAction::Keep => RemovalCounts::default(),
    };

    let resolved = state
        .admin
        .resolve_feedback(id, &resolver, action, removed)
        .await?;
    Ok(Json(resolved))
}

/// GET /api/v1/admin/logs
pub async fn list_logs(
    State(state): State<AppState>,
) -> Result<Json<Vec<AdminLogEntry>>, ApiError> {
    let logs = state
        .admin
        .list_logs(LOGS_PAGE)
        .await
        .map_err(ApiError::internal("failed to list logs"))?;
    Ok(Json(logs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(None, true));
        assert!(!parse_flag(Some("false"), true));
        assert!(!parse_flag(Some("0"), true));
        assert!(parse_flag(Some("TRUE"), false));
        assert!(parse_flag(Some("maybe"), true));
    }

    #[test]
    fn test_actor_falls_back_to_system() {
        let mut claims = Claims {
            sub: "id".to_string(),
            username: "  root ".to_string(),
            admin: true,
            exp: 0,
        };
        assert_eq!(actor(&claims), "root");
        claims.username = "   ".to_string();
        assert_eq!(actor(&claims), "system");
    }
}
