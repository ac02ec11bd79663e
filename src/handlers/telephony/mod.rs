//! Twilio Media Streams WebSocket transport.

mod handler;
pub mod messages;

pub use handler::media_stream_handler;
pub use messages::{MessageRoute, TelephonyMessage};
