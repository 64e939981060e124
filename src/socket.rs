use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::SharedService;
use crate::hub::{ChannelId, NotificationHub, StatusUpdate};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    Register { student_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    StatusUpdate(StatusUpdate),
}

pub async fn connect<S: Store>(
    ws: WebSocketUpgrade,
    State(service): State<SharedService<S>>,
) -> Response {
    let hub = service.hub().clone();
    ws.on_upgrade(move |socket| serve_socket(socket, hub))
}

async fn serve_socket(mut socket: WebSocket, hub: Arc<NotificationHub>) {
    let channel = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<StatusUpdate>();
    tracing::info!(%channel, "client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => on_client_text(&hub, channel, &tx, &text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(%channel, error = %err, "socket read failed");
                    break;
                }
            },
            Some(update) = rx.recv() => {
                let frame = match serde_json::to_string(&ServerMessage::StatusUpdate(update)) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::error!(%channel, error = %err, "failed to encode status update");
                        continue;
                    }
                };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.unregister(channel);
    tracing::info!(%channel, live_channels = hub.len(), "client disconnected");
}

fn on_client_text(
    hub: &NotificationHub,
    channel: ChannelId,
    tx: &mpsc::UnboundedSender<StatusUpdate>,
    text: &str,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Register { student_id }) if !student_id.trim().is_empty() => {
            hub.register(student_id.trim(), channel, tx.clone());
        }
        Ok(ClientMessage::Register { .. }) => {
            tracing::debug!(%channel, "register frame without student id ignored");
        }
        Err(err) => tracing::debug!(%channel, error = %err, "unrecognized client frame ignored"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::tests::student;
    use crate::models::InterventionState;

    #[test]
    fn register_frame_binds_channel_to_student() {
        let hub = NotificationHub::new();
        let channel = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();

        on_client_text(&hub, channel, &tx, r#"{"event":"register","student_id":"S1"}"#);
        assert!(hub.notify("S1", StatusUpdate::new(&student(InterventionState::Locked, 1), None)));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn junk_frames_are_ignored() {
        let hub = NotificationHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        on_client_text(&hub, Uuid::new_v4(), &tx, "hello");
        on_client_text(&hub, Uuid::new_v4(), &tx, r#"{"event":"register","student_id":"  "}"#);
        assert_eq!(hub.len(), 0);
    }

    #[test]
    fn server_frame_wraps_status_update() {
        let frame = ServerMessage::StatusUpdate(StatusUpdate::new(
            &student(InterventionState::Normal, 3),
            None,
        ));
        let value = serde_json::to_value(frame).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "event": "status-update",
                "data": { "status": "Normal", "intervention_state": "Normal", "version": 3 }
            })
        );
    }
}
