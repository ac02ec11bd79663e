//! Inference client interface for bidirectional model streaming.
//!
//! The bridge never speaks the model provider's wire protocol itself; it
//! drives a client implementing [`InferenceClient`]. The client multiplexes
//! many call sessions over one provider connection pool, so every operation
//! is keyed by session id.
//!
//! # Audio Format
//!
//! Inbound telephony audio is narrowband 8 kHz, one byte per sample; the
//! client is responsible for any transcoding the provider requires.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

mod config;
mod loopback;

pub use config::{AudioOutputConfig, TextContentConfig, DEFAULT_SYSTEM_PROMPT};
pub use loopback::LoopbackClient;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while driving the inference stream.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// No stream session exists for the given session id
    #[error("No inference session for id: {0}")]
    SessionNotFound(String),

    /// The provider-side stream has been closed
    #[error("Inference stream closed: {0}")]
    StreamClosed(String),

    /// Provider-specific error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// Result type for inference operations.
pub type InferenceResult<T> = Result<T, InferenceError>;

// =============================================================================
// Event Handlers
// =============================================================================

/// Callback type for inference events (audio output, transcripts,
/// interruption signals). The payload is the provider event body as JSON.
pub type EventHandler =
    Arc<dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Well-known event names emitted by inference clients.
pub mod events {
    /// Synthesized audio chunk; payload carries base64 `audioContent`.
    pub const AUDIO_OUTPUT: &str = "audioOutput";
    /// Text produced by the model; payload carries `content`.
    pub const TEXT_OUTPUT: &str = "textOutput";
    /// The user barged in over model output.
    pub const INTERRUPTION: &str = "interruption";
    /// The model finished the current content block.
    pub const CONTENT_END: &str = "contentEnd";
}

// =============================================================================
// Client Trait
// =============================================================================

/// Client interface to a bidirectional model-inference stream.
///
/// All methods are keyed by session id. Setup calls establish the prompt and
/// audio configuration for a session, `stream_audio_chunk` feeds caller
/// audio, and the turn-control calls signal content/prompt/session
/// boundaries and interruption state to the provider.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Whether a stream session exists and is accepting input.
    fn is_session_active(&self, session_id: &str) -> bool;

    /// Stream one chunk of caller audio into the session.
    async fn stream_audio_chunk(&self, session_id: &str, audio: Bytes) -> InferenceResult<()>;

    /// Open the prompt for the session.
    async fn setup_prompt_start_event(&self, session_id: &str) -> InferenceResult<()>;

    /// Send the system prompt for the session.
    async fn setup_system_prompt_event(
        &self,
        session_id: &str,
        text_config: TextContentConfig,
        prompt: String,
    ) -> InferenceResult<()>;

    /// Open the audio content block for the session.
    async fn setup_start_audio_event(
        &self,
        session_id: &str,
        audio_config: AudioOutputConfig,
    ) -> InferenceResult<()>;

    /// Close the current content block.
    async fn send_content_end(&self, session_id: &str) -> InferenceResult<()>;

    /// Close the current prompt.
    async fn send_prompt_end(&self, session_id: &str) -> InferenceResult<()>;

    /// End the provider-side session.
    async fn send_session_end(&self, session_id: &str) -> InferenceResult<()>;

    /// Release all client-side state for the session.
    async fn remove_stream_session(&self, session_id: &str) -> InferenceResult<()>;

    /// Signal that the user interrupted model output (barge-in).
    async fn handle_user_interruption(&self, session_id: &str) -> InferenceResult<()>;

    /// Inform the provider whether the user is currently speaking.
    async fn set_user_speaking_state(
        &self,
        session_id: &str,
        speaking: bool,
    ) -> InferenceResult<()>;

    /// Enable low-latency interruption handling for the session.
    async fn enable_realtime_interruption(&self, session_id: &str) -> InferenceResult<()>;

    /// Register a handler for a named event, scoped to the session.
    /// Multiple handlers may be registered for the same event.
    fn register_event_handler(&self, session_id: &str, event: &str, handler: EventHandler);
}

/// Shared handle to an inference client.
pub type SharedInferenceClient = Arc<dyn InferenceClient>;

impl fmt::Debug for dyn InferenceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InferenceClient")
    }
}
