//! Public feed endpoints: read the feed, submit a price, report a code

use crate::admin::models::{FeedbackMessage, FeedbackRequest};
use crate::api::{error::ApiError, AppState};
use crate::auth::middleware::optional_claims;
use crate::feed::{code, PriceRecord, SortKey};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Records returned per feed read
pub const FEED_LIMIT: usize = 50;
/// Feedback reason cap, in bytes
pub const MAX_REASON_BYTES: usize = 300;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub sort: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub server: Option<String>,
}

/// GET /api/v1/feed?sort=time|price
pub async fn get_feed(
    State(state): State<AppState>,
    Query(params): Query<FeedQuery>,
) -> Result<Json<Vec<PriceRecord>>, ApiError> {
    let sort = SortKey::parse(params.sort.as_deref());
    let mut page = state
        .feed
        .query_top(sort, FEED_LIMIT)
        .await
        .map_err(ApiError::internal("failed to fetch feed"))?;

    let records: Vec<PriceRecord> = page.by_ref().collect();
    if page.skipped() > 0 {
        debug!(sort = sort.as_str(), skipped = page.skipped(), "feed read dropped corrupt members");
    }
    Ok(Json(records))
}

/// POST /api/v1/submit
pub async fn submit_price(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(req) = payload.map_err(|_| ApiError::bad_request("invalid request"))?;

    let normalized = code::normalize(&req.code);
    if normalized.is_empty() || !req.price.is_finite() || req.price <= 0.0 {
        return Err(ApiError::bad_request("invalid data"));
    }
    code::validate(&normalized).map_err(|e| {
        debug!("Rejected code {:?}: {}", req.code, e);
        ApiError::bad_request("invalid code format")
    })?;

    state
        .feed
        .add_record(&normalized, req.price, req.server.as_deref())
        .await
        .map_err(ApiError::internal("failed to submit"))?;

    Ok((StatusCode::CREATED, Json(json!({ "status": "ok" }))))
}

/// POST /api/v1/feedback (login optional; anonymous reports come from `guest`)
pub async fn submit_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FeedbackMessage>), ApiError> {
    let Json(req) = payload.map_err(|_| ApiError::bad_request("invalid request"))?;

    let code = code::normalize(&req.code);
    let reason = req.reason.trim();
    if code.is_empty() || reason.is_empty() {
        return Err(ApiError::bad_request("invalid feedback data"));
    }
    if reason.len() > MAX_REASON_BYTES {
        return Err(ApiError::bad_request("reason too long"));
    }

    let reporter = optional_claims(&headers, &state.auth.jwt_handler)
        .map(|claims| claims.username.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "guest".to_string());

    let feedback = state
        .admin
        .add_feedback(&code, reason, &reporter)
        .await
        .map_err(ApiError::internal("failed to submit feedback"))?;

    info!("📝 Feedback {} on {} from {}", feedback.id, feedback.code, reporter);
    Ok((StatusCode::CREATED, Json(feedback)))
}
