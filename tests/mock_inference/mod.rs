//! Shared recording inference client for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use sonic_bridge::core::inference::{
    AudioOutputConfig, EventHandler, InferenceClient, InferenceError, InferenceResult,
    TextContentConfig,
};

/// Inference client that records every call for later assertion and lets
/// tests fire events into registered handlers.
#[derive(Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<String>>,
    audio: Mutex<Vec<Bytes>>,
    handlers: Mutex<HashMap<(String, String), Vec<EventHandler>>>,
    pub fail_all: bool,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Default::default()
        }
    }

    /// Ordered log of operations, as "op:session_id" entries.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        let prefix = format!("{op}:");
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    /// All audio streamed in, concatenated.
    pub fn streamed_audio(&self) -> Vec<u8> {
        self.audio.lock().iter().flat_map(|b| b.to_vec()).collect()
    }

    /// Fire an event into every handler registered for it.
    pub async fn emit(&self, session_id: &str, event: &str, payload: serde_json::Value) {
        let handlers = self
            .handlers
            .lock()
            .get(&(session_id.to_string(), event.to_string()))
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(payload.clone()).await;
        }
    }

    pub fn handler_count(&self, session_id: &str, event: &str) -> usize {
        self.handlers
            .lock()
            .get(&(session_id.to_string(), event.to_string()))
            .map(|h| h.len())
            .unwrap_or(0)
    }

    fn record(&self, op: &str, session_id: &str) -> InferenceResult<()> {
        self.calls.lock().push(format!("{op}:{session_id}"));
        if self.fail_all {
            Err(InferenceError::Provider("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl InferenceClient for RecordingClient {
    fn is_session_active(&self, _session_id: &str) -> bool {
        true
    }

    async fn stream_audio_chunk(&self, session_id: &str, audio: Bytes) -> InferenceResult<()> {
        self.audio.lock().push(audio);
        self.record("stream_audio_chunk", session_id)
    }

    async fn setup_prompt_start_event(&self, session_id: &str) -> InferenceResult<()> {
        self.record("setup_prompt_start_event", session_id)
    }

    async fn setup_system_prompt_event(
        &self,
        session_id: &str,
        _text_config: TextContentConfig,
        _prompt: String,
    ) -> InferenceResult<()> {
        self.record("setup_system_prompt_event", session_id)
    }

    async fn setup_start_audio_event(
        &self,
        session_id: &str,
        _audio_config: AudioOutputConfig,
    ) -> InferenceResult<()> {
        self.record("setup_start_audio_event", session_id)
    }

    async fn send_content_end(&self, session_id: &str) -> InferenceResult<()> {
        self.record("send_content_end", session_id)
    }

    async fn send_prompt_end(&self, session_id: &str) -> InferenceResult<()> {
        self.record("send_prompt_end", session_id)
    }

    async fn send_session_end(&self, session_id: &str) -> InferenceResult<()> {
        self.record("send_session_end", session_id)
    }

    async fn remove_stream_session(&self, session_id: &str) -> InferenceResult<()> {
        self.record("remove_stream_session", session_id)
    }

    async fn handle_user_interruption(&self, session_id: &str) -> InferenceResult<()> {
        self.record("handle_user_interruption", session_id)
    }

    async fn set_user_speaking_state(
        &self,
        session_id: &str,
        speaking: bool,
    ) -> InferenceResult<()> {
        self.record(
            if speaking {
                "set_user_speaking_true"
            } else {
                "set_user_speaking_false"
            },
            session_id,
        )
    }

    async fn enable_realtime_interruption(&self, session_id: &str) -> InferenceResult<()> {
        self.record("enable_realtime_interruption", session_id)
    }

    fn register_event_handler(&self, session_id: &str, event: &str, handler: EventHandler) {
        self.handlers
            .lock()
            .entry((session_id.to_string(), event.to_string()))
            .or_default()
            .push(handler);
    }
}

/// Shared handle used by most tests.
pub fn shared() -> Arc<RecordingClient> {
    Arc::new(RecordingClient::new())
}
