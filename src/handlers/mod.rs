//! HTTP and WebSocket request handlers.
//!
//! - `telephony` - Twilio Media Streams WebSocket bridge
//! - [`health_check`] - service health endpoint

pub mod telephony;

pub use telephony::media_stream_handler;

use axum::Json;
use serde_json::{Value, json};

/// Health check endpoint.
///
/// Returns a JSON status document for load balancers and monitors.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "sonic-bridge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
