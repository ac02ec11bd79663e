//! Default prompt and content configuration for inference sessions.
//!
//! These are the values substituted by the session's setup calls when the
//! caller does not supply its own configuration.

use serde::{Deserialize, Serialize};

/// System prompt used when no prompt is configured for a call.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant on a phone call. \
     Keep your answers short and conversational, and never mention that you are an AI model.";

/// Configuration for a text content block in the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextContentConfig {
    /// MIME type of the text content
    pub media_type: String,
}

impl Default for TextContentConfig {
    fn default() -> Self {
        Self {
            media_type: "text/plain".to_string(),
        }
    }
}

/// Configuration for the audio content block opened at call start.
///
/// Defaults describe the narrowband telephony stream: 8 kHz mono, one byte
/// per sample, base64-framed over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputConfig {
    /// MIME type of the audio content
    pub media_type: String,
    /// Sample rate in Hz
    pub sample_rate_hertz: u32,
    /// Bits per sample
    pub sample_size_bits: u32,
    /// Number of channels
    pub channel_count: u32,
    /// Wire encoding of the audio payload
    pub encoding: String,
    /// Content classification expected by the provider
    pub audio_type: String,
    /// Voice used for synthesized output
    pub voice_id: String,
}

impl Default for AudioOutputConfig {
    fn default() -> Self {
        Self {
            media_type: "audio/lpcm".to_string(),
            sample_rate_hertz: 8000,
            sample_size_bits: 8,
            channel_count: 1,
            encoding: "base64".to_string(),
            audio_type: "SPEECH".to_string(),
            voice_id: "matthew".to_string(),
        }
    }
}
