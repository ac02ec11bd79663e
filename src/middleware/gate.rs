//! Connection gate middleware for the media-stream WebSocket endpoint.
//!
//! Applies [`ConnectionGate::validate_connection`] to WebSocket upgrade
//! requests before they reach the handler:
//! - disallowed or missing user agent: 403 Forbidden
//! - rate limit exceeded for the source address: 429 Too Many Requests
//!
//! Non-upgrade requests pass through untouched.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use sonic_bridge::middleware::connection_gate_middleware;
//!
//! let app = Router::new()
//!     .route("/media-stream", get(media_stream_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_gate_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::security::{REASON_INVALID_USER_AGENT, REASON_RATE_LIMITED};
use crate::state::AppState;

/// Middleware that vets WebSocket upgrade requests against the connection
/// gate. The source address comes from `ConnectInfo`, so the router must be
/// served with `into_make_service_with_connect_info::<SocketAddr>()`.
pub async fn connection_gate_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // Only gate WebSocket upgrade requests
    let is_ws_upgrade = request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    let verdict = state
        .gate
        .validate_connection(Some(addr.ip()), user_agent);
    if verdict.is_valid {
        return next.run(request).await;
    }

    match verdict.reason.as_deref() {
        Some(REASON_RATE_LIMITED) => {
            tracing::warn!(ip = %addr.ip(), "Rejecting upgrade: rate limit exceeded");
            (StatusCode::TOO_MANY_REQUESTS, REASON_RATE_LIMITED).into_response()
        }
        _ => {
            tracing::warn!(ip = %addr.ip(), "Rejecting upgrade: user agent not allowed");
            (StatusCode::FORBIDDEN, REASON_INVALID_USER_AGENT).into_response()
        }
    }
}
