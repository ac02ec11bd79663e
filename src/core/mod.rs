pub mod audio;
pub mod inference;
pub mod session;

// Re-export commonly used types for convenience
pub use audio::{AudioFrameBuffer, FrameSink, FramingConfig, TELEPHONY_SAMPLE_RATE};
pub use inference::{
    AudioOutputConfig, EventHandler, InferenceClient, InferenceError, InferenceResult,
    LoopbackClient, TextContentConfig,
};
pub use session::CallSession;
