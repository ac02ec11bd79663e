//! HTTP middleware.
//!
//! - `gate` - connection gate enforcement for WebSocket upgrades

pub mod gate;

pub use gate::connection_gate_middleware;
