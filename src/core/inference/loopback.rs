//! In-process loopback inference client.
//!
//! Replays caller audio back as synthesized output at the end of each turn.
//! Used for local runs and demos where no model provider is configured, and
//! exercises the full session / event / framing path end to end.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::json;
use tracing::debug;

use super::{
    AudioOutputConfig, EventHandler, InferenceClient, InferenceError, InferenceResult,
    TextContentConfig, events,
};

/// Replay chunk size: 200 ms of 8 kHz single-byte samples.
const REPLAY_CHUNK_BYTES: usize = 1600;

#[derive(Default)]
struct LoopbackSession {
    active: bool,
    pending: Vec<u8>,
    speaking: bool,
    realtime: bool,
    handlers: HashMap<String, Vec<EventHandler>>,
}

/// Loopback provider: every session's input audio becomes its output audio.
#[derive(Default)]
pub struct LoopbackClient {
    sessions: DashMap<String, LoopbackSession>,
}

impl LoopbackClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_session(&self, session_id: &str) {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| LoopbackSession {
                active: true,
                ..Default::default()
            });
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut LoopbackSession) -> T,
    ) -> InferenceResult<T> {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) => Ok(f(&mut entry)),
            None => Err(InferenceError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Collect handlers for one event without holding the map lock across
    /// handler invocation.
    fn handlers_for(&self, session_id: &str, event: &str) -> Vec<EventHandler> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.handlers.get(event).cloned())
            .unwrap_or_default()
    }

    async fn emit(&self, session_id: &str, event: &str, payload: serde_json::Value) {
        for handler in self.handlers_for(session_id, event) {
            handler(payload.clone()).await;
        }
    }
}

#[async_trait]
impl InferenceClient for LoopbackClient {
    fn is_session_active(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.active)
            .unwrap_or(false)
    }

    async fn stream_audio_chunk(&self, session_id: &str, audio: Bytes) -> InferenceResult<()> {
        self.ensure_session(session_id);
        self.with_session(session_id, |s| s.pending.extend_from_slice(&audio))
    }

    async fn setup_prompt_start_event(&self, session_id: &str) -> InferenceResult<()> {
        self.ensure_session(session_id);
        Ok(())
    }

    async fn setup_system_prompt_event(
        &self,
        session_id: &str,
        _text_config: TextContentConfig,
        prompt: String,
    ) -> InferenceResult<()> {
        self.ensure_session(session_id);
        debug!(session_id = %session_id, prompt_len = prompt.len(), "Loopback system prompt set");
        Ok(())
    }

    async fn setup_start_audio_event(
        &self,
        session_id: &str,
        _audio_config: AudioOutputConfig,
    ) -> InferenceResult<()> {
        self.ensure_session(session_id);
        Ok(())
    }

    async fn send_content_end(&self, session_id: &str) -> InferenceResult<()> {
        let audio = self.with_session(session_id, |s| std::mem::take(&mut s.pending))?;

        for chunk in audio.chunks(REPLAY_CHUNK_BYTES) {
            self.emit(
                session_id,
                events::AUDIO_OUTPUT,
                json!({ "audioContent": BASE64.encode(chunk) }),
            )
            .await;
        }
        self.emit(session_id, events::CONTENT_END, json!({})).await;
        Ok(())
    }

    async fn send_prompt_end(&self, session_id: &str) -> InferenceResult<()> {
        self.with_session(session_id, |_| ())
    }

    async fn send_session_end(&self, session_id: &str) -> InferenceResult<()> {
        self.with_session(session_id, |s| s.active = false)
    }

    async fn remove_stream_session(&self, session_id: &str) -> InferenceResult<()> {
        self.sessions.remove(session_id);
        Ok(())
    }

    async fn handle_user_interruption(&self, session_id: &str) -> InferenceResult<()> {
        self.with_session(session_id, |s| s.pending.clear())?;
        self.emit(session_id, events::INTERRUPTION, json!({})).await;
        Ok(())
    }

    async fn set_user_speaking_state(
        &self,
        session_id: &str,
        speaking: bool,
    ) -> InferenceResult<()> {
        self.with_session(session_id, |s| s.speaking = speaking)
    }

    async fn enable_realtime_interruption(&self, session_id: &str) -> InferenceResult<()> {
        self.with_session(session_id, |s| s.realtime = true)
    }

    fn register_event_handler(&self, session_id: &str, event: &str, handler: EventHandler) {
        self.ensure_session(session_id);
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session
                .handlers
                .entry(event.to_string())
                .or_default()
                .push(handler);
        }
    }
}
