//! End-to-end tests for the HTTP surface
//!
//! Every test builds the full router over an in-memory store and drives it
//! with `oneshot`, so nothing here needs Redis or a bound socket.

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use market_feed_backend::{
    admin::AdminStore,
    api::{create_router, AppState, RouterConfig},
    auth::{AuthState, CaptchaStore, JwtHandler, UserStore},
    feed::{FeedStore, WritePolicy, TIME_INDEX_KEY},
    middleware::RateLimitConfig,
    store::{KvStore, MemoryKvStore},
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    store: Arc<MemoryKvStore>,
    state: AppState,
}

fn relaxed_limits() -> RouterConfig {
    RouterConfig {
        rate_limit: RateLimitConfig {
            max_requests: 10_000,
            window: Duration::from_secs(30),
        },
        request_timeout: Duration::from_secs(5),
    }
}

fn build_app(config: RouterConfig) -> TestApp {
    let store = Arc::new(MemoryKvStore::new());
    let kv: Arc<dyn KvStore> = store.clone();

    let feed = FeedStore::new(kv.clone(), WritePolicy::default());
    let user_store = Arc::new(UserStore::new(kv.clone()).with_hash_cost(4));
    let captcha = Arc::new(CaptchaStore::new(kv.clone()));
    let jwt = Arc::new(JwtHandler::new("integration-test-secret".to_string()));
    let auth = AuthState::new(user_store, captcha, jwt);
    let admin = Arc::new(AdminStore::new(kv));

    let state = AppState::new(feed, auth, admin);
    let (router, _limiter) = create_router(state.clone(), config);
    TestApp {
        router,
        store,
        state,
    }
}

fn request(method: Method, uri: &str, body: Option<Value>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).unwrap()
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn submit(app: &TestApp, code: &str, price: f64) -> StatusCode {
    send(
        app,
        request(
            Method::POST,
            "/api/v1/submit",
            Some(json!({ "code": code, "price": price })),
            None,
        ),
    )
    .await
    .0
}

async fn feed(app: &TestApp, sort: &str) -> Vec<Value> {
    let (status, body) = send(
        app,
        request(Method::GET, &format!("/api/v1/feed?sort={sort}"), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body.as_array().cloned().unwrap()
}

async fn captcha(app: &TestApp) -> (String, String) {
    let (status, body) = send(app, request(Method::GET, "/api/v1/auth/captcha", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    (
        body["captchaId"].as_str().unwrap().to_string(),
        body["code"].as_str().unwrap().to_string(),
    )
}

async fn auth_call(app: &TestApp, path: &str, username: &str, password: &str) -> (StatusCode, Value) {
    let (captcha_id, code) = captcha(app).await;
    send(
        app,
        request(
            Method::POST,
            path,
            Some(json!({
                "username": username,
                "password": password,
                "captchaId": captcha_id,
                "captchaCode": code.to_lowercase(),
            })),
            None,
        ),
    )
    .await
}

async fn login_token(app: &TestApp, username: &str, password: &str) -> String {
    let (status, body) = auth_call(app, "/api/v1/auth/login", username, password).await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["token"].as_str().unwrap().to_string()
}

async fn admin_token(app: &TestApp) -> String {
    app.state
        .auth
        .user_store
        .create_user("root", "rootpass", true)
        .await
        .unwrap();
    login_token(app, "root", "rootpass").await
}

#[tokio::test]
async fn test_health_reports_version() {
    let app = build_app(relaxed_limits());
    let (status, body) = send(&app, request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_submit_then_read_feed() {
    let app = build_app(relaxed_limits());

    assert_eq!(submit(&app, " ab c ", 100.0).await, StatusCode::CREATED);
    assert_eq!(submit(&app, "def", 250.5).await, StatusCode::CREATED);

    let by_price = feed(&app, "price").await;
    assert_eq!(by_price.len(), 2);
    assert_eq!(by_price[0]["code"], "DEF");
    assert_eq!(by_price[0]["price"], 250.5);
    assert_eq!(by_price[1]["code"], "ABC");
    assert!(by_price[1]["ts"].as_i64().unwrap() > 0);
    assert!(by_price[1].get("server").is_none());

    // Unknown sort keys fall back to time order
    assert_eq!(feed(&app, "bogus").await.len(), 2);
}

#[tokio::test]
async fn test_submit_rejects_bad_input() {
    let app = build_app(relaxed_limits());

    assert_eq!(submit(&app, "ABC", 0.0).await, StatusCode::BAD_REQUEST);
    assert_eq!(submit(&app, "ABC", -3.0).await, StatusCode::BAD_REQUEST);
    assert_eq!(submit(&app, "   ", 10.0).await, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/submit",
            Some(json!({ "code": "A-B-C", "price": 10.0 })),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid code format");

    let malformed = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/submit")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&app, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(feed(&app, "time").await.is_empty());
}

#[tokio::test]
async fn test_feed_read_failure_is_500() {
    let app = build_app(relaxed_limits());
    app.store.fail_key(TIME_INDEX_KEY);

    let (status, body) = send(&app, request(Method::GET, "/api/v1/feed", None, None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "failed to fetch feed");
}

#[tokio::test]
async fn test_register_and_login_flow() {
    let app = build_app(relaxed_limits());

    let (status, body) = auth_call(&app, "/api/v1/auth/register", " alice ", "secret1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["username"], "alice");

    let (status, body) = auth_call(&app, "/api/v1/auth/register", "alice", "secret2").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "username already exists");

    let (status, _) = auth_call(&app, "/api/v1/auth/register", "al", "secret1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = auth_call(&app, "/api/v1/auth/login", "alice", "secret1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["isAdmin"], false);
    assert!(!body["token"].as_str().unwrap().is_empty());

    let (status, body) = auth_call(&app, "/api/v1/auth/login", "alice", "wrongpw").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid credentials");
}

#[tokio::test]
async fn test_captcha_is_single_use() {
    let app = build_app(relaxed_limits());
    app.state
        .auth
        .user_store
        .create_user("bob", "hunter22", false)
        .await
        .unwrap();

    let (captcha_id, code) = captcha(&app).await;
    let body = json!({
        "username": "bob",
        "password": "hunter22",
        "captchaId": captcha_id,
        "captchaCode": code,
    });

    let (status, _) = send(&app, request(Method::POST, "/api/v1/auth/login", Some(body.clone()), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, reply) = send(&app, request(Method::POST, "/api/v1/auth/login", Some(body), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["error"], "invalid captcha");
}

#[tokio::test]
async fn test_admin_routes_require_admin_token() {
    let app = build_app(relaxed_limits());

    let (status, _) = send(&app, request(Method::GET, "/api/v1/admin/users", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        request(Method::GET, "/api/v1/admin/users", None, Some("not-a-jwt")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    app.state
        .auth
        .user_store
        .create_user("carol", "carolpw", false)
        .await
        .unwrap();
    let token = login_token(&app, "carol", "carolpw").await;
    let (status, _) = send(&app, request(Method::GET, "/api/v1/admin/users", None, Some(&token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = admin_token(&app).await;
    let (status, body) = send(&app, request(Method::GET, "/api/v1/admin/users", None, Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["carol", "root"]);
    assert!(body[0].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_admin_user_management_and_ban() {
    let app = build_app(relaxed_limits());
    let admin = admin_token(&app).await;

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/admin/users",
            Some(json!({ "username": "dave", "password": "davepass" })),
            Some(&admin),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["isAdmin"], false);

    let dave = login_token(&app, "dave", "davepass").await;

    let (status, body) = send(
        &app,
        request(
            Method::PATCH,
            "/api/v1/admin/users/dave/ban",
            Some(json!({ "banned": true })),
            Some(&admin),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["banned"], true);

    // Banned accounts can no longer log in, and old tokens stop working
    let (status, body) = auth_call(&app, "/api/v1/auth/login", "dave", "davepass").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "account banned");
    let (status, _) = send(&app, request(Method::GET, "/api/v1/admin/users", None, Some(&dave))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        request(
            Method::PATCH,
            "/api/v1/admin/users/nobody/ban",
            Some(json!({ "banned": true })),
            Some(&admin),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, request(Method::DELETE, "/api/v1/admin/users/dave", None, Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = auth_call(&app, "/api/v1/auth/login", "dave", "davepass").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, logs) = send(&app, request(Method::GET, "/api/v1/admin/logs", None, Some(&admin))).await;
    let kinds: Vec<&str> = logs
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["user_deleted", "user_ban_changed", "user_created"]);
    assert_eq!(logs[0]["actor"], "root");
}

#[tokio::test]
async fn test_admin_deletes_prices_by_code() {
    let app = build_app(relaxed_limits());
    let admin = admin_token(&app).await;

    submit(&app, "ABC", 10.0).await;
    submit(&app, "abc", 20.0).await;
    submit(&app, "XYZ", 30.0).await;

    let (status, body) = send(
        &app,
        request(Method::DELETE, "/api/v1/admin/prices/abc", None, Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed_time"], 2);
    assert_eq!(body["removed_price"], 2);

    let remaining = feed(&app, "price").await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["code"], "XYZ");

    let (_, logs) = send(&app, request(Method::GET, "/api/v1/admin/logs", None, Some(&admin))).await;
    let entry = logs
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["type"] == "price_deleted")
        .cloned()
        .unwrap();
    assert_eq!(entry["metadata"]["code"], "ABC");
    assert_eq!(entry["metadata"]["removedTime"], "2");
}

#[tokio::test]
async fn test_feedback_report_and_resolve() {
    let app = build_app(relaxed_limits());
    let admin = admin_token(&app).await;

    submit(&app, "XYZ", 999.0).await;
    submit(&app, "KEEP", 5.0).await;

    let (status, report) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/feedback",
            Some(json!({ "code": " xyz ", "reason": "obviously fake" })),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(report["code"], "XYZ");
    assert_eq!(report["reporter"], "guest");
    assert_eq!(report["resolved"], false);
    let id = report["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/feedback",
            Some(json!({ "code": "KEEP", "reason": "x".repeat(301) })),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, list) = send(&app, request(Method::GET, "/api/v1/admin/feedback", None, Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let resolve_uri = format!("/api/v1/admin/feedback/{id}/resolve");
    let (status, _) = send(
        &app,
        request(Method::POST, &resolve_uri, Some(json!({ "action": "burn" })), Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, resolved) = send(
        &app,
        request(Method::POST, &resolve_uri, Some(json!({ "action": "delete" })), Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["resolved"], true);
    assert_eq!(resolved["resolvedBy"], "root");
    assert_eq!(resolved["action"], "delete");
    assert_eq!(resolved["removedTime"], 1);
    assert_eq!(resolved["removedPrice"], 1);

    let remaining = feed(&app, "time").await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["code"], "KEEP");

    let (status, body) = send(
        &app,
        request(Method::POST, &resolve_uri, Some(json!({ "action": "keep" })), Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "feedback already resolved");

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/admin/feedback/missing/resolve",
            Some(json!({ "action": "keep" })),
            Some(&admin),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, open) = send(
        &app,
        request(
            Method::GET,
            "/api/v1/admin/feedback?includeResolved=false",
            None,
            Some(&admin),
        ),
    )
    .await;
    assert!(open.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_feedback_reporter_from_token() {
    let app = build_app(relaxed_limits());
    app.state
        .auth
        .user_store
        .create_user("erin", "erinpass", false)
        .await
        .unwrap();
    let token = login_token(&app, "erin", "erinpass").await;

    let (status, report) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/feedback",
            Some(json!({ "code": "QQQ", "reason": "stale" })),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(report["reporter"], "erin");
}

#[tokio::test]
async fn test_rate_limit_per_forwarded_client() {
    let app = build_app(RouterConfig::default());

    let post_from = |ip: &str| {
        Request::builder()
            .method(Method::POST)
            .uri("/api/v1/submit")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", ip)
            .body(Body::from(json!({ "code": "RATE", "price": 1.5 }).to_string()))
            .unwrap()
    };

    for _ in 0..10 {
        let (status, _) = send(&app, post_from("203.0.113.7")).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let response = app.router.clone().oneshot(post_from("203.0.113.7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    // Other clients are unaffected
    let (status, _) = send(&app, post_from("198.51.100.1")).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_feed_reads_are_not_rate_limited() {
    let app = build_app(RouterConfig::default());

    for _ in 0..25 {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/v1/feed")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
    }
}
