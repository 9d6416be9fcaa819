use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use handoff_authority::routes::router;
use handoff_authority::state::AppState;
use handoff_authority::store::InMemoryTokenStore;
use handoff_core::{ContinuationBase, ManualClock, TokenLedger};
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn app(clock: &ManualClock) -> Router {
    let store = Arc::new(InMemoryTokenStore::new(
        TokenLedger::default(),
        Arc::new(clock.clone()),
    ));
    router(AppState::new(
        store,
        ContinuationBase::parse("https://visa.example.com").unwrap(),
    ))
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn generate(app: &Router, replace: bool) -> (StatusCode, Value) {
    call(
        app,
        post(
            "/api/qr/generate",
            json!({"visaId": "A1", "page": "visa-pg-1", "replace": replace}),
        ),
    )
    .await
}

#[tokio::test]
async fn generate_returns_continuation_link() {
    let clock = ManualClock::default();
    let app = app(&clock);

    let (status, body) = generate(&app, false).await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap();
    assert_eq!(token.len(), 43);
    assert_eq!(
        body["qrUrl"],
        format!("https://visa.example.com/visa-pg-1/A1?token={token}")
    );
    assert_eq!(body["visaId"], "A1");
    assert_eq!(body["page"], "visa-pg-1");

    let (status, active) = call(&app, get("/api/qr/active/A1/visa-pg-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["valid"], true);
    assert_eq!(active["status"], "active");
    assert_eq!(active["token"], token);
}

#[tokio::test]
async fn second_generate_conflicts_unless_replacing() {
    let clock = ManualClock::default();
    let app = app(&clock);

    let (_, first) = generate(&app, false).await;
    let (status, body) = generate(&app, false).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!({"error": "active_token_exists"}));

    let (status, second) = generate(&app, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(first["token"], second["token"]);

    let uri = format!(
        "/api/qr/status/{}?visaId=A1&page=visa-pg-1",
        first["token"].as_str().unwrap()
    );
    let (_, report) = call(&app, get(&uri)).await;
    assert_eq!(report["status"], "expired");
    assert_eq!(report["valid"], false);
}

#[tokio::test]
async fn redeem_is_single_use_and_blocks_generation() {
    let clock = ManualClock::default();
    let app = app(&clock);
    let (_, issued) = generate(&app, false).await;
    let redeem = json!({"token": issued["token"], "visaId": "A1", "page": "visa-pg-1"});

    let (status, body) = call(&app, post("/api/qr/redeem", redeem.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["visaId"], "A1");
    assert!(body["redeemedAt"].is_string());

    let (status, body) = call(&app, post("/api/qr/redeem", redeem)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_used");

    let (_, eligibility) = call(&app, get("/api/qr/can-generate/A1/visa-pg-1")).await;
    assert_eq!(eligibility, json!({"canGenerate": false}));
    let (status, body) = generate(&app, false).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "already_used");

    // Other steps of the same application are unaffected.
    let (_, eligibility) = call(&app, get("/api/qr/can-generate/A1/visa-pg-2")).await;
    assert_eq!(eligibility, json!({"canGenerate": true}));

    let (status, _) = call(&app, post("/api/qr/reset/A1/visa-pg-1", Value::Null)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = generate(&app, false).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn expired_token_is_gone() {
    let clock = ManualClock::default();
    let app = app(&clock);
    let (_, issued) = generate(&app, false).await;

    clock.advance(time::Duration::minutes(6));
    let (_, active) = call(&app, get("/api/qr/active/A1/visa-pg-1")).await;
    assert_eq!(active["valid"], false);
    assert_eq!(active["status"], "none");
    assert!(active.get("token").is_none());

    let redeem = json!({"token": issued["token"], "visaId": "A1", "page": "visa-pg-1"});
    let (status, body) = call(&app, post("/api/qr/redeem", redeem)).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"], "expired");
}

#[tokio::test]
async fn token_from_another_step_is_not_found() {
    let clock = ManualClock::default();
    let app = app(&clock);
    let (_, issued) = generate(&app, false).await;
    let token = issued["token"].as_str().unwrap();

    let uri = format!("/api/qr/status/{token}?visaId=A1&page=visa-pg-2");
    let (status, body) = call(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "token_not_found");

    let redeem = json!({"token": token, "visaId": "A1", "page": "visa-pg-2"});
    let (status, _) = call(&app, post("/api/qr/redeem", redeem)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, get("/api/qr/status/unknown?visaId=A1&page=visa-pg-1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn image_is_served_only_for_active_token() {
    let clock = ManualClock::default();
    let app = app(&clock);
    let (_, issued) = generate(&app, false).await;
    let token = issued["token"].as_str().unwrap();
    let uri = format!("/api/qr/image/{token}?visaId=A1&page=visa-pg-1");

    let res = app.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "image/svg+xml");
    let svg = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8(svg.to_vec()).unwrap().contains("<svg"));

    let (status, body) = call(
        &app,
        get(&format!("/api/qr/image/{token}?visaId=A1&page=visa-pg-2")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "token_not_found");

    let (status, _) = call(&app, get(&format!("/api/qr/image/{token}"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let redeem = json!({"token": token, "visaId": "A1", "page": "visa-pg-1"});
    call(&app, post("/api/qr/redeem", redeem)).await;
    let (status, body) = call(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "token_not_found");
}

#[tokio::test]
async fn malformed_identifiers_are_rejected() {
    let clock = ManualClock::default();
    let app = app(&clock);
    let (status, body) = call(&app, get("/api/qr/can-generate/A%201/visa-pg-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_identifier");
}

#[tokio::test]
async fn health_and_metrics_are_served() {
    let clock = ManualClock::default();
    let app = app(&clock);
    let (status, body) = call(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    generate(&app, false).await;
    let res = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let text = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains("handoff_tokens_issued_total"));
}
