//! Telephony media-stream WebSocket handler.
//!
//! This module bridges a single Twilio Media Streams connection to an
//! inference session: inbound media frames are decoded and streamed to the
//! model, model audio is framed back out at telephony cadence, and the
//! `start` / `stop` lifecycle drives session setup and teardown.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use crate::core::audio::{AudioFrameBuffer, FrameSink};
use crate::core::inference::events;
use crate::core::session::CallSession;
use crate::state::AppState;

use super::messages::{
    MessageRoute, OutboundMediaFrame, OutboundMarkFrame, TelephonyMessage,
};

/// Optimized channel buffer size for audio workloads
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// How often the output pump drains the session queue into the frame buffer
const OUTPUT_PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// How often we check if the connection is stale
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum idle time before closing the connection
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Media-stream WebSocket handler.
///
/// The connection gate middleware has already vetted the user agent and
/// rate limit by the time this runs; per-frame validation happens inside
/// the socket loop.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("Media stream WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_media_socket(socket, state))
}

/// One active call bound to this connection.
struct ActiveCall {
    session: Arc<CallSession>,
    buffer: Arc<AudioFrameBuffer>,
    call_sid: Option<String>,
    pump: tokio::task::JoinHandle<()>,
}

/// [`FrameSink`] writing media and mark frames through the connection's
/// sender channel.
struct ChannelSink {
    tx: mpsc::Sender<MessageRoute>,
}

#[async_trait::async_trait]
impl FrameSink for ChannelSink {
    async fn send_media(&self, sequence_number: u64, payload: String) -> bool {
        let frame = OutboundMediaFrame::new(sequence_number, payload);
        match serde_json::to_string(&frame) {
            Ok(json) => self
                .tx
                .send(MessageRoute::Outgoing(Message::Text(json.into())))
                .await
                .is_ok(),
            Err(e) => {
                error!("Failed to serialize media frame: {}", e);
                false
            }
        }
    }

    async fn send_mark(&self, name: String) -> bool {
        let frame = OutboundMarkFrame::new(name);
        match serde_json::to_string(&frame) {
            Ok(json) => self
                .tx
                .send(MessageRoute::Outgoing(Message::Text(json.into())))
                .await
                .is_ok(),
            Err(e) => {
                error!("Failed to serialize mark frame: {}", e);
                false
            }
        }
    }
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Media stream WebSocket connection established");
    state.gate.connection_opened();

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let result = match route {
                MessageRoute::Outgoing(message) => sender.send(message).await,
                MessageRoute::Close => {
                    info!("Closing media stream WebSocket connection");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let mut call: Option<ActiveCall> = None;
    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = std::time::Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        let continue_processing =
                            process_message(msg, &mut call, &message_tx, &state).await;
                        if !continue_processing {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Media stream WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("Media stream WebSocket connection closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    warn!(
                        "Media stream connection idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    break;
                }
                debug!("Media stream connection idle check - still active");
            }
        }
    }

    // Teardown also covers sockets that die without a stop frame
    if let Some(call) = call.take() {
        teardown_call(call, &state).await;
    }

    sender_task.abort();
    state.gate.connection_closed();
    info!("Media stream WebSocket connection terminated");
}

/// Process one inbound WebSocket message. Returns false to end the loop.
async fn process_message(
    msg: Message,
    call: &mut Option<ActiveCall>,
    message_tx: &mpsc::Sender<MessageRoute>,
    state: &Arc<AppState>,
) -> bool {
    let text = match msg {
        Message::Text(text) => text,
        Message::Binary(_) => {
            debug!("Ignoring unexpected binary frame");
            return true;
        }
        Message::Ping(_) | Message::Pong(_) => return true,
        Message::Close(_) => {
            info!("Media stream close frame received");
            return false;
        }
    };

    let value: Option<serde_json::Value> = serde_json::from_str(&text).ok();
    let verdict = state.gate.validate_ws_message(value.as_ref());
    if !verdict.is_valid {
        let is_start = value
            .as_ref()
            .and_then(|v| v.get("event"))
            .and_then(|e| e.as_str())
            == Some("start");
        warn!(reason = ?verdict.reason, "Dropping invalid inbound frame");
        if is_start {
            // A bad start frame means the call can never be established
            let _ = message_tx.send(MessageRoute::Close).await;
            return false;
        }
        return true;
    }

    let parsed: TelephonyMessage = match serde_json::from_value(value.unwrap_or_default()) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Ignoring unrecognized telephony event: {}", e);
            return true;
        }
    };

    match parsed {
        TelephonyMessage::Connected { protocol, version } => {
            debug!(protocol = ?protocol, version = ?version, "Telephony handshake received");
            true
        }
        TelephonyMessage::Start {
            stream_sid, start, ..
        } => {
            handle_start(stream_sid, start, verdict.call_sid, call, message_tx, state).await;
            true
        }
        TelephonyMessage::Media { media, .. } => {
            if let Some(call) = call {
                match BASE64.decode(media.payload.as_bytes()) {
                    Ok(audio) => call.session.stream_audio(Bytes::from(audio)).await,
                    Err(e) => warn!("Dropping media frame with invalid base64 payload: {}", e),
                }
            } else {
                debug!("Media frame before start, dropping");
            }
            true
        }
        TelephonyMessage::Stop { .. } => {
            info!("Stop frame received, ending call");
            if let Some(call) = call.take() {
                call.session.end_user_turn().await;
                call.buffer.flush().await;
                teardown_call(call, state).await;
            }
            let _ = message_tx.send(MessageRoute::Close).await;
            false
        }
        TelephonyMessage::Mark { mark, .. } => {
            debug!(name = %mark.name, "Mark acknowledged by telephony peer");
            true
        }
    }
}

/// Establish the call: create the session, run setup, wire event handlers,
/// and start the framing and pump tasks.
async fn handle_start(
    stream_sid: Option<String>,
    start: Option<super::messages::StartPayload>,
    validated_call_sid: Option<String>,
    call: &mut Option<ActiveCall>,
    message_tx: &mpsc::Sender<MessageRoute>,
    state: &Arc<AppState>,
) {
    if call.is_some() {
        warn!("Duplicate start frame on an established call, ignoring");
        return;
    }

    let session_id = stream_sid
        .or_else(|| start.as_ref().and_then(|s| s.stream_sid.clone()))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    info!(session_id = %session_id, call_sid = ?validated_call_sid, "Starting call session");

    let session = Arc::new(CallSession::with_queue_capacity(
        session_id,
        state.inference.clone(),
        state.config.output_queue_capacity,
    ));

    if let Err(e) = session.setup_prompt_start().await {
        warn!(error = %e, "Prompt start setup failed");
    }
    if let Err(e) = session.setup_system_prompt(None, None).await {
        warn!(error = %e, "System prompt setup failed");
    }
    if let Err(e) = session.setup_start_audio(None).await {
        warn!(error = %e, "Audio setup failed");
    }

    // Model audio lands in the session queue; interruption empties it so
    // stale audio is never played over the caller.
    let queue_session = session.clone();
    session.on_event(
        events::AUDIO_OUTPUT,
        Arc::new(move |payload| {
            let session = queue_session.clone();
            Box::pin(async move {
                let Some(b64) = payload.get("audioContent").and_then(|c| c.as_str()) else {
                    return;
                };
                match BASE64.decode(b64.as_bytes()) {
                    Ok(audio) => session.buffer_audio_output(Bytes::from(audio)),
                    Err(e) => warn!("Dropping audio output with invalid base64: {}", e),
                }
            })
        }),
    );
    let interrupt_session = session.clone();
    session.on_event(
        events::INTERRUPTION,
        Arc::new(move |_| {
            let session = interrupt_session.clone();
            Box::pin(async move {
                debug!(session_id = %session.session_id(), "Interruption, clearing output queue");
                session.clear_output_buffer();
            })
        }),
    );

    let buffer = Arc::new(AudioFrameBuffer::new(
        state.framing_config(),
        Arc::new(ChannelSink {
            tx: message_tx.clone(),
        }),
    ));

    // Output pump: session queue -> frame buffer, until the session closes
    let pump_session = session.clone();
    let pump_buffer = buffer.clone();
    let pump = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(OUTPUT_PUMP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while pump_session.is_active() {
            ticker.tick().await;
            while let Some(chunk) = pump_session.get_next_audio_output() {
                pump_buffer.add_audio(&chunk);
            }
        }
        debug!("Output pump stopped");
    });

    *call = Some(ActiveCall {
        session,
        buffer,
        call_sid: validated_call_sid,
        pump,
    });
}

async fn teardown_call(call: ActiveCall, state: &Arc<AppState>) {
    call.session.close().await;
    call.buffer.shutdown();
    call.pump.abort();
    if let Some(call_sid) = &call.call_sid {
        state.gate.remove_active_session(call_sid);
    }
    info!(session_id = %call.session.session_id(), "Call torn down");
}
