use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::{debug, warn};

use crate::{
    signaling::ConnectInfo,
    storage::Delivery,
    RelayState,
};

/// GET /health
pub async fn health_check() -> &'static str {
    "ok"
}

/// POST /push/:key - hand a payload to whoever is pulling `key`.
pub async fn push(
    State(state): State<RelayState>,
    Path(key): Path<String>,
    body: Bytes,
) -> StatusCode {
    let info = match serde_json::from_slice::<ConnectInfo>(&body) {
        Ok(info) => info,
        Err(err) => {
            warn!(key = %key, error = %err, "push body decode failed");
            return StatusCode::BAD_REQUEST;
        }
    };
    let source = info.source.clone();
    match state.store.push(&key, info) {
        Delivery::Accepted => debug!(key = %key, source = %source, "payload accepted"),
        Delivery::Dropped => debug!(key = %key, source = %source, "mailbox full; payload dropped"),
    }
    StatusCode::OK
}

/// GET /pull/:key - long-poll for the next payload pushed to `key`.
pub async fn pull(State(state): State<RelayState>, Path(key): Path<String>) -> Response {
    match state.store.pull(&key, state.pull_timeout).await {
        Some(info) => {
            debug!(key = %key, source = %info.source, "payload delivered");
            (StatusCode::OK, Json(info)).into_response()
        }
        None => StatusCode::REQUEST_TIMEOUT.into_response(),
    }
}
