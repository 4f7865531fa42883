use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::models::{ErrorResponse, HealthResponse};
use super::state::ServerState;
use crate::background::Background;
use crate::messaging::Envelope;

pub fn router(background: Arc<Background>) -> Router {
    let state = Arc::new(ServerState { background });
    Router::new()
        .route("/health", get(health))
        .route("/message", post(message))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

pub async fn run_server(background: Arc<Background>, addr: String) -> Result<()> {
    let app = router(background);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| "failed to bind server address")?;
    info!("background listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        in_flight: state.background.gate().in_flight(),
        cached: state.background.cache().len(),
    })
}

async fn message(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<Envelope>, JsonRejection>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    let Json(envelope) = payload.map_err(|rejection| {
        debug!("rejected message body: {}", rejection.body_text());
        (
            rejection.status(),
            Json(ErrorResponse {
                error: rejection.body_text(),
            }),
        )
    })?;
    let reply = state
        .background
        .handle(envelope.message, &envelope.sender)
        .await;
    Ok(Json(reply.unwrap_or(Value::Null)))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}
