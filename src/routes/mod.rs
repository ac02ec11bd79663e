//! Router construction.

use axum::{Router, middleware, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// API router: health check and anything else served over plain HTTP.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::health_check))
        .layer(TraceLayer::new_for_http())
}

/// Media-stream router: the telephony WebSocket endpoint behind the
/// connection gate.
///
/// # Endpoint
///
/// `GET /media-stream` - WebSocket upgrade for a Twilio Media Streams call
pub fn create_media_stream_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/media-stream", get(handlers::media_stream_handler))
        .layer(middleware::from_fn_with_state(
            state,
            crate::middleware::connection_gate_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}
