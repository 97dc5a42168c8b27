//! WebSocket handler streaming domain events to clients.
//!
//! Every [`BroadcastEvent`](crate::events::BroadcastEvent) is forwarded as a
//! JSON text frame. Clients keep the connection alive with `HEARTBEAT`
//! messages (any frame counts as activity).

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::api::AppState;
use crate::protocol_constants::{WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS};
use crate::upnp::model::DeviceSummary;

/// Incoming WebSocket message envelope.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsIncoming {
    Heartbeat,
    /// Asks for the current list of detected devices.
    GetDevices,
}

/// Outgoing messages that are not domain events.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsOutgoing {
    HeartbeatAck,
    Devices { devices: Vec<DeviceSummary> },
    Error { message: String },
}

impl WsOutgoing {
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|json| Message::Text(json.into()))
    }
}

fn devices_message(state: &AppState) -> Option<Message> {
    WsOutgoing::Devices {
        devices: state
            .control_point
            .devices()
            .iter()
            .map(|d| d.summary())
            .collect(),
    }
    .to_message()
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Main WebSocket connection handler.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.broadcast_tx.subscribe());
    let mut last_activity = Instant::now();

    log::info!("[WS] New connection established");

    // Send the current devices immediately so clients need not wait for events.
    if let Some(msg) = devices_message(&state) {
        if sender.send(msg).await.is_err() {
            log::warn!("[WS] Failed to send initial state, client disconnected");
            return;
        }
    }

    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(WS_HEARTBEAT_CHECK_INTERVAL_SECS));
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                log::debug!("[WS] Closing connection on shutdown");
                break;
            }
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<WsIncoming>(&text) {
                            Ok(WsIncoming::Heartbeat) => WsOutgoing::HeartbeatAck.to_message(),
                            Ok(WsIncoming::GetDevices) => devices_message(&state),
                            Err(e) => WsOutgoing::Error {
                                message: format!("unrecognized message: {}", e),
                            }
                            .to_message(),
                        };
                        if let Some(msg) = reply {
                            if sender.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            event = events.next() => {
                match event {
                    Some(Ok(event)) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        log::warn!("[WS] Client lagged, {} events dropped", skipped);
                    }
                    None => break,
                }
            }
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > Duration::from_secs(WS_HEARTBEAT_TIMEOUT_SECS) {
                    log::warn!("[WS] Heartbeat timeout");
                    break;
                }
            }
        }
    }

    log::info!("[WS] Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_messages_use_screaming_snake_case() {
        assert!(matches!(
            serde_json::from_str::<WsIncoming>(r#"{"type":"HEARTBEAT"}"#),
            Ok(WsIncoming::Heartbeat)
        ));
        assert!(matches!(
            serde_json::from_str::<WsIncoming>(r#"{"type":"GET_DEVICES"}"#),
            Ok(WsIncoming::GetDevices)
        ));
        assert!(serde_json::from_str::<WsIncoming>(r#"{"type":"PLAY"}"#).is_err());
    }

    #[test]
    fn outgoing_devices_message_is_tagged() {
        let json = serde_json::to_value(WsOutgoing::Devices { devices: vec![] }).unwrap();
        assert_eq!(json["type"], "DEVICES");
        assert_eq!(json["devices"], serde_json::json!([]));
    }
}
