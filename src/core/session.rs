//! Per-call session state.
//!
//! A [`CallSession`] is the single façade a telephony connection uses to
//! talk to the inference client. It owns the bounded outbound audio queue,
//! gates every operation on session activity, and guarantees idempotent
//! teardown: once closed, nothing further reaches the inference client.
//!
//! All control-plane forwarding is best-effort. A failed call to the
//! inference client is logged and absorbed; it never corrupts session
//! lifecycle state and never propagates to the caller as an error.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::inference::{
    AudioOutputConfig, DEFAULT_SYSTEM_PROMPT, EventHandler, InferenceResult,
    SharedInferenceClient, TextContentConfig,
};

/// Default capacity of the outbound audio queue, in chunks. Large enough to
/// absorb bursty model output; overflow drops the oldest chunks.
pub const DEFAULT_OUTPUT_QUEUE_CAPACITY: usize = 256;

/// Per-call state holder mediating between the telephony transport and the
/// inference client.
///
/// State machine: `Active -> (close) -> Closed`, with no way back. Every
/// mutating operation other than `close` checks activity first and silently
/// declines once closed.
pub struct CallSession {
    session_id: String,
    client: SharedInferenceClient,
    active: AtomicBool,
    output_queue: Mutex<VecDeque<Bytes>>,
    queue_capacity: usize,
}

impl CallSession {
    /// Create a session bound to `session_id`. Does not contact the
    /// inference client.
    pub fn new(session_id: impl Into<String>, client: SharedInferenceClient) -> Self {
        Self::with_queue_capacity(session_id, client, DEFAULT_OUTPUT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(
        session_id: impl Into<String>,
        client: SharedInferenceClient,
        queue_capacity: usize,
    ) -> Self {
        let session_id = session_id.into();
        debug!(session_id = %session_id, "Call session created");
        Self {
            session_id,
            client,
            active: AtomicBool::new(true),
            output_queue: Mutex::new(VecDeque::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Setup
    // -------------------------------------------------------------------------

    /// Open the prompt for this session.
    pub async fn setup_prompt_start(&self) -> InferenceResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.client.setup_prompt_start_event(&self.session_id).await
    }

    /// Send the system prompt, substituting documented defaults for omitted
    /// arguments.
    pub async fn setup_system_prompt(
        &self,
        text_config: Option<TextContentConfig>,
        prompt: Option<String>,
    ) -> InferenceResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.client
            .setup_system_prompt_event(
                &self.session_id,
                text_config.unwrap_or_default(),
                prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            )
            .await
    }

    /// Open the audio content block, substituting the default narrowband
    /// configuration when none is given.
    pub async fn setup_start_audio(
        &self,
        audio_config: Option<AudioOutputConfig>,
    ) -> InferenceResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.client
            .setup_start_audio_event(&self.session_id, audio_config.unwrap_or_default())
            .await
    }

    // -------------------------------------------------------------------------
    // Inbound audio (data plane)
    // -------------------------------------------------------------------------

    /// Forward one chunk of caller audio to the inference client.
    ///
    /// Failures are swallowed per chunk: audio loss on one chunk must not
    /// abort the stream.
    pub async fn stream_audio(&self, data: Bytes) {
        self.forward_audio(data).await;
    }

    /// Same contract as [`stream_audio`](Self::stream_audio); named entry
    /// point for the low-latency path.
    pub async fn stream_audio_realtime(&self, data: Bytes) {
        self.forward_audio(data).await;
    }

    async fn forward_audio(&self, data: Bytes) {
        if !self.is_active() {
            return;
        }
        if let Err(e) = self.client.stream_audio_chunk(&self.session_id, data).await {
            debug!(session_id = %self.session_id, error = %e, "Dropped audio chunk");
        }
    }

    // -------------------------------------------------------------------------
    // Outbound audio queue
    // -------------------------------------------------------------------------

    /// Queue one chunk of model audio for outbound delivery.
    ///
    /// The queue is bounded; when full, the oldest chunks are dropped to
    /// admit new data. Never blocks.
    pub fn buffer_audio_output(&self, data: Bytes) {
        if !self.is_active() {
            return;
        }
        let mut queue = self.output_queue.lock();
        while queue.len() >= self.queue_capacity {
            queue.pop_front();
        }
        queue.push_back(data);
    }

    /// Dequeue the next outbound chunk in FIFO order; `None` once drained.
    pub fn get_next_audio_output(&self) -> Option<Bytes> {
        self.output_queue.lock().pop_front()
    }

    pub fn clear_output_buffer(&self) {
        self.output_queue.lock().clear();
    }

    pub fn output_buffer_size(&self) -> usize {
        self.output_queue.lock().len()
    }

    // -------------------------------------------------------------------------
    // Turn and session control (best-effort)
    // -------------------------------------------------------------------------

    /// Close the current content block.
    pub async fn end_audio_content(&self) {
        if !self.is_active() {
            return;
        }
        self.log_best_effort(
            "send_content_end",
            self.client.send_content_end(&self.session_id).await,
        );
    }

    /// Close the current prompt.
    pub async fn end_prompt(&self) {
        if !self.is_active() {
            return;
        }
        self.log_best_effort(
            "send_prompt_end",
            self.client.send_prompt_end(&self.session_id).await,
        );
    }

    /// End the user's turn: content end followed by prompt end.
    pub async fn end_user_turn(&self) {
        if !self.is_active() {
            return;
        }
        self.log_best_effort(
            "send_content_end",
            self.client.send_content_end(&self.session_id).await,
        );
        self.log_best_effort(
            "send_prompt_end",
            self.client.send_prompt_end(&self.session_id).await,
        );
    }

    /// Signal barge-in to the inference client.
    pub async fn interrupt_model(&self) {
        if !self.is_active() {
            return;
        }
        self.log_best_effort(
            "handle_user_interruption",
            self.client.handle_user_interruption(&self.session_id).await,
        );
    }

    pub async fn set_user_speaking(&self, speaking: bool) {
        if !self.is_active() {
            return;
        }
        self.log_best_effort(
            "set_user_speaking_state",
            self.client
                .set_user_speaking_state(&self.session_id, speaking)
                .await,
        );
    }

    pub async fn enable_realtime_mode(&self) {
        if !self.is_active() {
            return;
        }
        self.log_best_effort(
            "enable_realtime_interruption",
            self.client
                .enable_realtime_interruption(&self.session_id)
                .await,
        );
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Register an event handler with the inference client, keyed by this
    /// session. Returns `&Self` so registrations can be chained.
    pub fn on_event(&self, event: &str, handler: EventHandler) -> &Self {
        self.client
            .register_event_handler(&self.session_id, event, handler);
        self
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Close the session.
    ///
    /// Idempotent: the first call marks the session inactive, clears the
    /// outbound queue, and ends/removes the provider-side stream exactly
    /// once. Later calls are silent no-ops. Client failures are absorbed.
    pub async fn close(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        self.output_queue.lock().clear();

        self.log_best_effort(
            "send_session_end",
            self.client.send_session_end(&self.session_id).await,
        );
        self.log_best_effort(
            "remove_stream_session",
            self.client.remove_stream_session(&self.session_id).await,
        );

        info!(session_id = %self.session_id, "Call session closed");
    }

    fn log_best_effort(&self, op: &str, result: InferenceResult<()>) {
        if let Err(e) = result {
            warn!(session_id = %self.session_id, operation = op, error = %e,
                "Inference control call failed (ignored)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inference::{InferenceClient, InferenceError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    /// Counts every inference-client call; optionally fails them all.
    #[derive(Default)]
    struct CountingClient {
        calls: Mutex<HashMap<&'static str, usize>>,
        audio_chunks: AtomicUsize,
        fail_all: bool,
    }

    impl CountingClient {
        fn failing() -> Self {
            Self {
                fail_all: true,
                ..Default::default()
            }
        }

        fn record(&self, op: &'static str) -> InferenceResult<()> {
            *self.calls.lock().entry(op).or_insert(0) += 1;
            if self.fail_all {
                Err(InferenceError::Provider("injected failure".to_string()))
            } else {
                Ok(())
            }
        }

        fn count(&self, op: &str) -> usize {
            self.calls.lock().get(op).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl InferenceClient for CountingClient {
        fn is_session_active(&self, _session_id: &str) -> bool {
            true
        }

        async fn stream_audio_chunk(&self, _id: &str, _audio: Bytes) -> InferenceResult<()> {
            self.audio_chunks.fetch_add(1, Ordering::SeqCst);
            self.record("stream_audio_chunk")
        }

        async fn setup_prompt_start_event(&self, _id: &str) -> InferenceResult<()> {
            self.record("setup_prompt_start_event")
        }

        async fn setup_system_prompt_event(
            &self,
            _id: &str,
            _text_config: TextContentConfig,
            _prompt: String,
        ) -> InferenceResult<()> {
            self.record("setup_system_prompt_event")
        }

        async fn setup_start_audio_event(
            &self,
            _id: &str,
            _audio_config: AudioOutputConfig,
        ) -> InferenceResult<()> {
            self.record("setup_start_audio_event")
        }

        async fn send_content_end(&self, _id: &str) -> InferenceResult<()> {
            self.record("send_content_end")
        }

        async fn send_prompt_end(&self, _id: &str) -> InferenceResult<()> {
            self.record("send_prompt_end")
        }

        async fn send_session_end(&self, _id: &str) -> InferenceResult<()> {
            self.record("send_session_end")
        }

        async fn remove_stream_session(&self, _id: &str) -> InferenceResult<()> {
            self.record("remove_stream_session")
        }

        async fn handle_user_interruption(&self, _id: &str) -> InferenceResult<()> {
            self.record("handle_user_interruption")
        }

        async fn set_user_speaking_state(&self, _id: &str, _speaking: bool) -> InferenceResult<()> {
            self.record("set_user_speaking_state")
        }

        async fn enable_realtime_interruption(&self, _id: &str) -> InferenceResult<()> {
            self.record("enable_realtime_interruption")
        }

        fn register_event_handler(&self, _id: &str, event: &str, _handler: EventHandler) {
            *self
                .calls
                .lock()
                .entry(match event {
                    "audioOutput" => "register_audioOutput",
                    _ => "register_other",
                })
                .or_insert(0) += 1;
        }
    }

    fn session_with(client: Arc<CountingClient>) -> CallSession {
        CallSession::new("test-session", client)
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let client = Arc::new(CountingClient::default());
        let session = session_with(client.clone());

        session.close().await;
        session.close().await;
        session.close().await;

        assert_eq!(client.count("send_session_end"), 1);
        assert_eq!(client.count("remove_stream_session"), 1);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_close_swallows_client_errors() {
        let client = Arc::new(CountingClient::failing());
        let session = session_with(client.clone());

        // Must not panic or error even though every client call fails
        session.close().await;
        session.close().await;

        assert_eq!(client.count("send_session_end"), 1);
        assert_eq!(client.count("remove_stream_session"), 1);
    }

    #[tokio::test]
    async fn test_operations_are_noops_after_close() {
        let client = Arc::new(CountingClient::default());
        let session = session_with(client.clone());
        session.close().await;

        session.stream_audio(Bytes::from_static(&[1, 2])).await;
        session
            .stream_audio_realtime(Bytes::from_static(&[3, 4]))
            .await;
        session.buffer_audio_output(Bytes::from_static(&[5]));
        session.end_user_turn().await;
        session.interrupt_model().await;
        session.set_user_speaking(true).await;
        session.enable_realtime_mode().await;
        session.setup_prompt_start().await.unwrap();

        assert_eq!(client.audio_chunks.load(Ordering::SeqCst), 0);
        assert_eq!(client.count("send_content_end"), 0);
        assert_eq!(client.count("send_prompt_end"), 0);
        assert_eq!(client.count("handle_user_interruption"), 0);
        assert_eq!(client.count("set_user_speaking_state"), 0);
        assert_eq!(client.count("enable_realtime_interruption"), 0);
        assert_eq!(client.count("setup_prompt_start_event"), 0);
        assert_eq!(session.output_buffer_size(), 0);
    }

    #[tokio::test]
    async fn test_output_queue_is_bounded_drop_oldest() {
        let client = Arc::new(CountingClient::default());
        let session = CallSession::with_queue_capacity("s", client, 8);

        for i in 0..1000u16 {
            session.buffer_audio_output(Bytes::from(i.to_be_bytes().to_vec()));
        }

        let size = session.output_buffer_size();
        assert!(size > 0 && size < 1000);
        assert_eq!(size, 8);

        // Oldest entries were dropped; the survivors drain in FIFO order
        let mut drained = Vec::new();
        while let Some(chunk) = session.get_next_audio_output() {
            drained.push(u16::from_be_bytes([chunk[0], chunk[1]]));
        }
        assert_eq!(drained, (992..1000).collect::<Vec<u16>>());
        assert!(session.get_next_audio_output().is_none());
    }

    #[tokio::test]
    async fn test_stream_audio_swallows_chunk_failures() {
        let client = Arc::new(CountingClient::failing());
        let session = session_with(client.clone());

        // Each chunk fails at the client but the stream continues
        for _ in 0..3 {
            session.stream_audio(Bytes::from_static(&[0; 160])).await;
        }
        assert_eq!(client.audio_chunks.load(Ordering::SeqCst), 3);
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn test_end_user_turn_sends_both_ends() {
        let client = Arc::new(CountingClient::default());
        let session = session_with(client.clone());

        session.end_user_turn().await;
        assert_eq!(client.count("send_content_end"), 1);
        assert_eq!(client.count("send_prompt_end"), 1);
    }

    #[tokio::test]
    async fn test_setup_defaults_substituted() {
        let client = Arc::new(CountingClient::default());
        let session = session_with(client.clone());

        session.setup_prompt_start().await.unwrap();
        session.setup_system_prompt(None, None).await.unwrap();
        session.setup_start_audio(None).await.unwrap();

        assert_eq!(client.count("setup_prompt_start_event"), 1);
        assert_eq!(client.count("setup_system_prompt_event"), 1);
        assert_eq!(client.count("setup_start_audio_event"), 1);
    }

    #[tokio::test]
    async fn test_on_event_supports_chaining() {
        let client = Arc::new(CountingClient::default());
        let session = session_with(client.clone());

        session
            .on_event("audioOutput", Arc::new(|_| Box::pin(async {})))
            .on_event("textOutput", Arc::new(|_| Box::pin(async {})));

        assert_eq!(client.count("register_audioOutput"), 1);
        assert_eq!(client.count("register_other"), 1);
    }

    #[tokio::test]
    async fn test_clear_output_buffer() {
        let client = Arc::new(CountingClient::default());
        let session = session_with(client);

        session.buffer_audio_output(Bytes::from_static(&[1]));
        session.buffer_audio_output(Bytes::from_static(&[2]));
        assert_eq!(session.output_buffer_size(), 2);

        session.clear_output_buffer();
        assert_eq!(session.output_buffer_size(), 0);
        assert!(session.get_next_audio_output().is_none());
    }
}
