//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::ServerConfig;
use crate::core::audio::FramingConfig;
use crate::core::inference::{LoopbackClient, SharedInferenceClient};
use crate::security::ConnectionGate;

/// State shared by all handlers and middleware.
///
/// Holds the loaded configuration, the process-wide connection gate, and the
/// inference client every call session talks to.
pub struct AppState {
    pub config: ServerConfig,
    pub gate: Arc<ConnectionGate>,
    pub inference: SharedInferenceClient,
}

impl AppState {
    /// Build application state and start the gate's eviction sweeper.
    ///
    /// Wires the loopback inference client; use
    /// [`with_inference`](Self::with_inference) to plug in a real provider
    /// client.
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_inference(config, Arc::new(LoopbackClient::new())).await
    }

    pub async fn with_inference(
        config: ServerConfig,
        inference: SharedInferenceClient,
    ) -> Arc<Self> {
        let gate = Arc::new(ConnectionGate::new(
            config.rate_limit_max_connections,
            config.rate_limit_window(),
        ));
        gate.spawn_sweeper();

        info!(
            rate_limit = config.rate_limit_max_connections,
            window_ms = config.rate_limit_window_ms,
            "Application state initialized"
        );

        Arc::new(Self {
            config,
            gate,
            inference,
        })
    }

    /// Framing configuration for new call sessions, derived from the loaded
    /// server configuration.
    pub fn framing_config(&self) -> FramingConfig {
        FramingConfig {
            frame_size: self.config.frame_size,
            interval: Duration::from_millis(self.config.frame_interval_ms),
            max_buffer_ms: self.config.max_buffer_ms,
        }
    }
}
