mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use common::{FakeScanner, FixedProber, ScanBehavior};
use portwatch_rs::commands::Dispatcher;
use portwatch_rs::config::{AdminList, Settings};
use portwatch_rs::monitor::{Monitor, SessionRegistry};
use portwatch_rs::notify::Outbox;
use portwatch_rs::server::{router, AppState};
use portwatch_rs::types::{ProbeOutcome, SessionKey};
use tower::ServiceExt;

fn state() -> AppState {
    let settings = Arc::new(Settings::default());
    let prober = FixedProber::new(ProbeOutcome::Refused, Duration::ZERO);
    let outbox = Outbox::new();
    let monitor = Monitor::new(
        SessionRegistry::new(),
        prober.clone(),
        FakeScanner::new(ScanBehavior::Fail),
        Arc::new(outbox.clone()),
        settings.clone(),
    );
    let dispatcher = Dispatcher::new(
        settings,
        Arc::new(AdminList::new([1])),
        prober,
        monitor,
        Arc::new(outbox.clone()),
    );
    AppState {
        dispatcher,
        outbox,
        api_token: Arc::from("secret"),
        environment: Arc::from("test"),
    }
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn ping_and_status() {
    let app = router(state());
    let resp = app
        .clone()
        .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "ok");

    let resp = app
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["environment"], "test");
    assert_eq!(body["active_monitors"], 0);
}

#[tokio::test]
async fn command_requires_token() {
    let app = router(state());
    let req = Request::post("/api/command")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"command":"/stop","args":[],"caller_id":1,"session_key":"chat"}"#,
        ))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn command_is_accepted_and_reply_lands_in_outbox() {
    let st = state();
    let outbox = st.outbox.clone();
    let app = router(st);
    let req = Request::post("/api/command")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::from(
            r#"{"command":"/stop","args":[],"caller_id":1,"session_key":"chat"}"#,
        ))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let key = SessionKey::new("chat");
    let mut texts = Vec::new();
    for _ in 0..50 {
        texts = outbox.texts(&key).await;
        if !texts.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("Nothing to stop"));

    let req = Request::get("/api/sessions/chat/messages")
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    // Read replies are not kept around.
    let req = Request::get("/api/sessions/chat/messages")
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.oneshot(req).await.unwrap()).await;
    assert!(body.as_array().unwrap().is_empty());
    assert_eq!(outbox.session_count().await, 0);
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let app = router(state());
    let req = Request::get("/api/sessions/chat/messages")
        .header(header::AUTHORIZATION, "Bearer secreT")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
