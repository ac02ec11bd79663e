//! Connection admission and message validation for the telephony edge.
//!
//! The [`ConnectionGate`] is constructed once per process, stored in
//! [`AppState`](crate::state::AppState), and consulted from two places:
//! the HTTP middleware (before the WebSocket upgrade) and the per-connection
//! bridge loop (for every inbound frame). It enforces three policies:
//!
//! 1. User-agent allow-listing: only Twilio media-stream clients connect.
//! 2. Per-source rate limiting: a fixed window of accepted connections.
//! 3. Call-session registry: `start` frames must reference a registered
//!    CallSid once their payload is present.
//!
//! Every check returns a structured verdict. Validation never returns an
//! error and never panics; malformed input is an invalid verdict, not a
//! fault.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Twilio CallSid: `CA` (or another two-letter prefix) followed by 32
/// alphanumerics.
static CALL_SID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2}[0-9a-zA-Z]{32}$").expect("valid CallSid regex"));

/// User-agent prefixes accepted at the edge.
const ALLOWED_USER_AGENT_PREFIXES: &[&str] = &[
    "TwilioMediaStreams/",
    "Twilio/",
    "TwilioProxy/",
    "Twilio.TmeWs/",
];

pub const REASON_INVALID_USER_AGENT: &str = "Invalid or missing User-Agent header";
pub const REASON_RATE_LIMITED: &str = "Rate limit exceeded";
pub const REASON_INVALID_CALL_SID: &str = "Invalid CallSid format in start message";
pub const REASON_UNKNOWN_CALL_SID: &str = "No active call session found for CallSid";
pub const REASON_UNPARSEABLE_MESSAGE: &str = "Error parsing WebSocket message";

/// Verdict for a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionValidation {
    pub is_valid: bool,
    pub reason: Option<String>,
}

impl ConnectionValidation {
    fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    fn invalid(reason: &str) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Verdict for an inbound WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageValidation {
    pub is_valid: bool,
    pub reason: Option<String>,
    /// CallSid extracted from a well-formed `start` payload.
    pub call_sid: Option<String>,
}

impl MessageValidation {
    fn valid(call_sid: Option<String>) -> Self {
        Self {
            is_valid: true,
            reason: None,
            call_sid,
        }
    }

    fn invalid(reason: &str) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.to_string()),
            call_sid: None,
        }
    }
}

/// Snapshot of the gate's internal counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityStats {
    pub active_sessions: usize,
    pub rate_limit_entries: usize,
    pub active_connections: usize,
}

struct RateWindow {
    count: u32,
    window_start: Instant,
}

/// Connection admission gate. See the module docs for the policies applied.
pub struct ConnectionGate {
    max_connections_per_window: u32,
    window: Duration,
    rate_windows: Arc<DashMap<IpAddr, RateWindow>>,
    active_sessions: DashSet<String>,
    active_connections: AtomicUsize,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionGate {
    /// Gate with the given fixed-window rate limit. The eviction sweeper is
    /// not started; call [`spawn_sweeper`](Self::spawn_sweeper) from an async
    /// context.
    pub fn new(max_connections_per_window: u32, window: Duration) -> Self {
        Self {
            max_connections_per_window,
            window,
            rate_windows: Arc::new(DashMap::new()),
            active_sessions: DashSet::new(),
            active_connections: AtomicUsize::new(0),
            sweeper: Mutex::new(None),
        }
    }

    /// Validate one connection attempt. Order matters: the user-agent check
    /// runs first, so disallowed clients never consume rate-limit budget.
    pub fn validate_connection(
        &self,
        source: Option<IpAddr>,
        user_agent: Option<&str>,
    ) -> ConnectionValidation {
        let ua = user_agent.unwrap_or("");
        if !ALLOWED_USER_AGENT_PREFIXES
            .iter()
            .any(|prefix| ua.starts_with(prefix))
        {
            warn!(user_agent = %ua, source = ?source, "Rejected connection: user agent not allowed");
            return ConnectionValidation::invalid(REASON_INVALID_USER_AGENT);
        }

        if let Some(ip) = source
            && !self.admit_source(ip)
        {
            return ConnectionValidation::invalid(REASON_RATE_LIMITED);
        }

        info!(source = ?source, user_agent = %ua, "Connection validated");
        ConnectionValidation::valid()
    }

    /// Fixed-window counter per source. Returns false once the window's
    /// budget is exhausted.
    fn admit_source(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut entry = self.rate_windows.entry(ip).or_insert_with(|| RateWindow {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= self.max_connections_per_window {
            warn!(
                ip = %ip,
                attempts = entry.count,
                window_secs = self.window.as_secs(),
                "Rejected connection: rate limit exceeded"
            );
            return false;
        }

        entry.count += 1;
        true
    }

    /// Validate one parsed inbound frame.
    ///
    /// Only `start` frames carry admission-relevant data; anything else is
    /// passed through. Malformed or missing input yields an invalid verdict,
    /// never a panic.
    pub fn validate_ws_message(&self, message: Option<&serde_json::Value>) -> MessageValidation {
        let Some(message) = message else {
            warn!("Rejected frame: no message payload");
            return MessageValidation::invalid(REASON_UNPARSEABLE_MESSAGE);
        };
        if message.is_null() || !message.is_object() {
            warn!("Rejected frame: payload is not a JSON object");
            return MessageValidation::invalid(REASON_UNPARSEABLE_MESSAGE);
        }

        if message.get("event").and_then(|e| e.as_str()) != Some("start") {
            return MessageValidation::valid(None);
        }

        // A start frame with no start payload yet: CallSid validation is
        // deferred until the payload arrives.
        let Some(start) = message.get("start") else {
            return MessageValidation::valid(None);
        };

        let call_sid = start.get("callSid").and_then(|c| c.as_str());
        match call_sid {
            Some(sid) if CALL_SID_PATTERN.is_match(sid) => {
                if self.active_sessions.contains(sid) {
                    debug!(call_sid = %sid, "Start frame validated");
                    MessageValidation::valid(Some(sid.to_string()))
                } else {
                    warn!(call_sid = %sid, "Rejected start frame: CallSid not registered");
                    MessageValidation::invalid(REASON_UNKNOWN_CALL_SID)
                }
            }
            _ => {
                warn!(call_sid = ?call_sid, "Rejected start frame: malformed CallSid");
                MessageValidation::invalid(REASON_INVALID_CALL_SID)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Call-session registry
    // -------------------------------------------------------------------------

    pub fn add_active_session(&self, call_sid: impl Into<String>) {
        let call_sid = call_sid.into();
        debug!(call_sid = %call_sid, "Registered active call session");
        self.active_sessions.insert(call_sid);
    }

    pub fn remove_active_session(&self, call_sid: &str) {
        if self.active_sessions.remove(call_sid).is_some() {
            debug!(call_sid = %call_sid, "Deregistered call session");
        }
    }

    pub fn is_session_active(&self, call_sid: &str) -> bool {
        self.active_sessions.contains(call_sid)
    }

    // -------------------------------------------------------------------------
    // Connection accounting
    // -------------------------------------------------------------------------

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn connection_closed(&self) {
        // Saturating: a close without a matching open must not wrap
        let _ = self
            .active_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn security_stats(&self) -> SecurityStats {
        SecurityStats {
            active_sessions: self.active_sessions.len(),
            rate_limit_entries: self.rate_windows.len(),
            active_connections: self.active_connections.load(Ordering::SeqCst),
        }
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Reset all rate-limit windows. The session registry and connection
    /// counter are untouched.
    pub fn clear_rate_limiting(&self) {
        self.rate_windows.clear();
        info!("Rate limiting state cleared");
    }

    /// Start the background task evicting expired rate windows. Idempotent:
    /// a second call replaces the previous sweeper. Stopped by `cleanup` and
    /// on drop.
    pub fn spawn_sweeper(&self) {
        let windows = self.rate_windows.clone();
        let window = self.window;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                windows.retain(|_, w| now.duration_since(w.window_start) < window);
            }
        });
        if let Some(old) = self.sweeper.lock().replace(handle) {
            old.abort();
        }
    }

    /// Tear down all gate state and stop the sweeper.
    pub fn cleanup(&self) {
        self.rate_windows.clear();
        self.active_sessions.clear();
        self.active_connections.store(0, Ordering::SeqCst);
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        info!("Connection gate cleaned up");
    }
}

impl Drop for ConnectionGate {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}
