pub mod config;
pub mod core;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use crate::core::audio::{AudioFrameBuffer, FrameSink, FramingConfig};
pub use crate::core::inference::{InferenceClient, InferenceError, InferenceResult};
pub use crate::core::session::CallSession;
pub use security::ConnectionGate;
pub use state::AppState;
