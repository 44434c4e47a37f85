use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    commands::{CommandRequest, Dispatcher},
    notify::Outbox,
    types::SessionKey,
};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub outbox: Outbox,
    pub api_token: Arc<str>,
    pub environment: Arc<str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
    pub bot: &'static str,
    pub environment: String,
    pub active_monitors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Accepted {
    pub accepted: bool,
    pub session_key: SessionKey,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/command", post(post_command))
        .route("/sessions/{key}/messages", get(get_messages))
        .with_state(state.clone());

    Router::new()
        .route("/", get(home))
        .route("/ping", get(ping))
        .route("/status", get(get_status))
        .with_state(state)
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "HTTP surface listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn home() -> &'static str {
    "Port probe service is running"
}

async fn ping() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "portwatch"}))
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let active_monitors = app.dispatcher.monitor().registry().active_count().await;
    let out = StatusBody {
        status: "active",
        bot: "running",
        environment: app.environment.to_string(),
        active_monitors,
    };
    (StatusCode::OK, Json(out))
}

fn authorized(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|t| constant_time_eq(t.trim().as_bytes(), token.as_bytes()))
}

/// Byte comparison whose running time does not depend on where the inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn post_command(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CommandRequest>,
) -> impl IntoResponse {
    if !authorized(&headers, &app.api_token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let session_key = req.session_key.clone();
    // Bursts run for up to several minutes; replies land in the outbox.
    let dispatcher = app.dispatcher.clone();
    tokio::spawn(async move {
        dispatcher.dispatch(req).await;
    });
    (
        StatusCode::ACCEPTED,
        Json(Accepted {
            accepted: true,
            session_key,
        }),
    )
        .into_response()
}

async fn get_messages(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> impl IntoResponse {
    if !authorized(&headers, &app.api_token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    // Delivered replies are dropped so the outbox only holds unread ones.
    let msgs = app.outbox.take(&SessionKey::new(key)).await;
    (StatusCode::OK, Json(msgs)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn token_comparison() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(!constant_time_eq(b"", b"secret"));
    }

    #[test]
    fn bearer_header_is_required() {
        let mut headers = HeaderMap::new();
        assert!(!authorized(&headers, "secret"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(authorized(&headers, "secret"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic secret"));
        assert!(!authorized(&headers, "secret"));
    }
}
