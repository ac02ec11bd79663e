//! Timed audio framing for the outbound telephony stream.
//!
//! The inference side produces audio in arbitrarily-sized bursts; the
//! telephony side expects fixed-size frames at a fixed cadence. The
//! [`AudioFrameBuffer`] sits between the two: it accumulates raw bytes,
//! emits full frames from a timer task it owns, and zero-pads the final
//! partial frame on flush before signaling end-of-output with a mark.
//!
//! Buffering is bounded by a configured maximum duration at the narrowband
//! rate (8 kHz, one byte per sample); under sustained overflow the oldest
//! bytes are dropped first and the accumulator never exceeds the cap.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Narrowband telephony input rate: 8 kHz, one byte per sample.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Framing configuration for one outbound audio stream.
#[derive(Debug, Clone)]
pub struct FramingConfig {
    /// Bytes per outbound frame (sample count, not milliseconds)
    pub frame_size: usize,
    /// Emission cadence
    pub interval: Duration,
    /// Maximum buffered duration in milliseconds; `None` disables the cap
    pub max_buffer_ms: Option<u64>,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            frame_size: 160,
            interval: Duration::from_millis(20),
            max_buffer_ms: Some(5000),
        }
    }
}

impl FramingConfig {
    /// Byte cap derived from the configured maximum buffered duration.
    pub fn max_buffer_bytes(&self) -> Option<usize> {
        self.max_buffer_ms
            .map(|ms| (TELEPHONY_SAMPLE_RATE as u64 * ms / 1000) as usize)
    }
}

/// Outbound transport bound to one frame buffer.
///
/// Both calls return `false` when the transport is gone, which stops the
/// emission task.
#[async_trait]
pub trait FrameSink: Send + Sync + 'static {
    /// Send one media frame with its sequence number and base64 payload.
    async fn send_media(&self, sequence_number: u64, payload: String) -> bool;

    /// Send a named mark signaling a playback milestone.
    async fn send_mark(&self, name: String) -> bool;
}

struct BufferShared {
    pending: Mutex<VecDeque<u8>>,
    /// Next sequence number to assign; starts at 1, per buffer instance.
    sequence: AtomicU64,
    frame_size: usize,
    max_buffer_bytes: Option<usize>,
}

impl BufferShared {
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Remove one full frame from the front, if available.
    fn take_frame(&self) -> Option<Vec<u8>> {
        let mut pending = self.pending.lock();
        if pending.len() >= self.frame_size {
            Some(pending.drain(..self.frame_size).collect())
        } else {
            None
        }
    }
}

/// Converts an arbitrarily-chunked byte stream into fixed-size frames
/// emitted at a fixed cadence over a [`FrameSink`].
///
/// Each buffer owns its own timer task; dropping the buffer (or calling
/// [`shutdown`](Self::shutdown)) stops it. Must be created inside a tokio
/// runtime.
pub struct AudioFrameBuffer {
    shared: Arc<BufferShared>,
    sink: Arc<dyn FrameSink>,
    emitter: Mutex<Option<JoinHandle<()>>>,
}

impl AudioFrameBuffer {
    pub fn new(config: FramingConfig, sink: Arc<dyn FrameSink>) -> Self {
        let shared = Arc::new(BufferShared {
            pending: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(1),
            frame_size: config.frame_size,
            max_buffer_bytes: config.max_buffer_bytes(),
        });

        let emitter = tokio::spawn(emit_loop(shared.clone(), sink.clone(), config.interval));

        Self {
            shared,
            sink,
            emitter: Mutex::new(Some(emitter)),
        }
    }

    /// Append raw audio bytes to the accumulator.
    ///
    /// When the cap is configured, the oldest bytes are trimmed so the
    /// accumulator settles at or below it; a single chunk larger than the
    /// cap is itself trimmed to the cap. Never blocks on the emitter.
    pub fn add_audio(&self, bytes: &[u8]) {
        let mut pending = self.shared.pending.lock();
        pending.extend(bytes.iter().copied());

        if let Some(cap) = self.shared.max_buffer_bytes
            && pending.len() > cap
        {
            let excess = pending.len() - cap;
            pending.drain(..excess);
            trace!(
                dropped = excess,
                cap, "Outbound audio buffer overflow, dropped oldest bytes"
            );
        }
    }

    /// Bytes currently waiting to be framed.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Drain everything left in the accumulator and signal end-of-output.
    ///
    /// Remaining full frames are sent first; a trailing partial frame is
    /// zero-padded on the right to `frame_size` and sent as the final media
    /// frame. The mark frame is always sent last, after any media. Both
    /// sends are issued before this call returns.
    pub async fn flush(&self) {
        let remainder: Vec<u8> = {
            let mut pending = self.shared.pending.lock();
            pending.drain(..).collect()
        };

        if !remainder.is_empty() {
            for chunk in remainder.chunks(self.shared.frame_size) {
                let mut frame = chunk.to_vec();
                frame.resize(self.shared.frame_size, 0);
                let seq = self.shared.next_sequence();
                if !self.sink.send_media(seq, BASE64.encode(&frame)).await {
                    debug!("Frame sink closed during flush");
                    return;
                }
            }
        }

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        self.sink.send_mark(format!("bedrock_out_{millis}")).await;
    }

    /// Stop the emission task. Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if let Some(handle) = self.emitter.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for AudioFrameBuffer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn emit_loop(shared: Arc<BufferShared>, sink: Arc<dyn FrameSink>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        while let Some(frame) = shared.take_frame() {
            let seq = shared.next_sequence();
            if !sink.send_media(seq, BASE64.encode(&frame)).await {
                debug!("Frame sink closed, stopping emission");
                return;
            }
        }
    }
}
