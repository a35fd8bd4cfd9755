//! Real-time transport: one WebSocket per user, JSON text frames.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use tradepost_shared::constants::MAX_FRAME_SIZE;
use tradepost_shared::protocol::{ClientEvent, ServerEvent};
use tradepost_shared::UserRef;

use crate::api::AppState;
use crate::error::ServerError;
use crate::fanout::DeliveryReport;
use crate::identity::authenticate;
use crate::presence::ConnectionHandle;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// `GET /ws?userId=<token>`. Rejects the upgrade with `401` unless the token
/// resolves to a user.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let user = authenticate(state.identity.as_ref(), params.user_id.as_deref())?;

    Ok(ws
        .max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: UserRef) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (handle, mut rx) = ConnectionHandle::new(state.config.outbound_buffer);

    if let Some(previous) = state.presence.register(user, handle.clone()).await {
        debug!(user = %user, previous = %previous.id(), "Replaced earlier connection");
    }

    // Forward queued events and keep the socket alive with pings.
    let ping_interval = Duration::from_secs(state.config.ws_ping_interval_secs);
    let forward_task = tokio::spawn(async move {
        let mut ping_ticker = tokio::time::interval(ping_interval);
        ping_ticker.tick().await;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let frame = match event.encode() {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(event = event.name(), error = %e, "Failed to encode outbound event");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                _ = ping_ticker.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if !state.event_limiter.check(user).await {
                    warn!(user = %user, "Event rate limit exceeded");
                    handle.deliver(ServerEvent::error(ServerError::RateLimited.public_message()));
                    continue;
                }
                let state = state.clone();
                let origin = handle.clone();
                tokio::spawn(async move {
                    handle_frame(&state, user, &origin, &text).await;
                });
            }
            Ok(Message::Binary(_)) => {
                handle.deliver(ServerEvent::error("Binary frames are not supported"));
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                debug!(user = %user, error = %e, "WebSocket error");
                break;
            }
        }
    }

    if state.presence.unregister(&handle).await.is_none() {
        debug!(user = %user, connection = %handle.id(), "Superseded connection closed");
    }
    forward_task.abort();
}

/// Process one inbound frame. Failures are reported to the originating
/// connection only.
async fn handle_frame(state: &AppState, user: UserRef, origin: &ConnectionHandle, frame: &str) {
    match dispatch(state, user, frame).await {
        Ok(report) => {
            debug!(
                user = %user,
                message = %report.message_id,
                delivered = report.delivered.len(),
                offline = report.offline.len(),
                dropped = report.dropped.len(),
                "Event handled"
            );
        }
        Err(e) => {
            if e.status().is_server_error() {
                tracing::error!(user = %user, error = %e, "Event failed");
            } else {
                info!(user = %user, error = %e, "Event rejected");
            }
            origin.deliver(ServerEvent::error(e.public_message()));
        }
    }
}

async fn dispatch(state: &AppState, user: UserRef, frame: &str) -> Result<DeliveryReport, ServerError> {
    let event = ClientEvent::decode(frame)?;
    debug!(user = %user, event = event.name(), "Dispatching event");

    match event {
        ClientEvent::SendMessage(msg) => {
            check_sender(user, msg.sender)?;
            state
                .fanout
                .send_direct(user, msg.recipient, msg.message_type, msg.content, msg.file_url)
                .await
        }
        ClientEvent::SendChannelMessage(msg) => {
            check_sender(user, msg.sender)?;
            state
                .fanout
                .send_channel(msg.channel_id, user, msg.message_type, msg.content, msg.file_url)
                .await
        }
    }
}

/// A payload may name its sender, but only as the connection's own user.
fn check_sender(connection: UserRef, claimed: Option<UserRef>) -> Result<(), ServerError> {
    match claimed {
        Some(sender) if sender != connection => Err(ServerError::Forbidden(format!(
            "sender {sender} does not match the connection"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_user, test_state};
    use tradepost_shared::UserKind;
    use uuid::Uuid;

    fn direct_frame(recipient: UserRef, sender: Option<UserRef>) -> String {
        serde_json::json!({
            "event": "sendMessage",
            "data": {
                "sender": sender,
                "recipient": recipient,
                "messageType": "text",
                "content": "do you ship to Lyon?",
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_direct_frame_is_routed() {
        let (state, _dir) = test_state().await;
        let alice = seed_user(&state.store, UserKind::Reseller, "Alice").await;
        let bob = seed_user(&state.store, UserKind::Supplier, "Bob").await;
        let (bob_handle, mut bob_rx) = ConnectionHandle::new(4);
        state.presence.register(bob, bob_handle).await;

        let report = dispatch(&state, alice, &direct_frame(bob, None)).await.unwrap();
        assert_eq!(report.delivered, vec![bob]);

        let Some(ServerEvent::ReceiveMessage(message)) = bob_rx.recv().await else {
            panic!("expected receiveMessage");
        };
        assert_eq!(message.sender.user_ref(), alice);
        assert_eq!(message.body.content(), Some("do you ship to Lyon?"));
    }

    #[tokio::test]
    async fn test_spoofed_sender_is_rejected() {
        let (state, _dir) = test_state().await;
        let alice = seed_user(&state.store, UserKind::Reseller, "Alice").await;
        let bob = seed_user(&state.store, UserKind::Supplier, "Bob").await;

        let err = dispatch(&state, alice, &direct_frame(alice, Some(bob)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));

        // Naming yourself is fine.
        assert!(dispatch(&state, alice, &direct_frame(bob, Some(alice))).await.is_ok());
    }

    #[tokio::test]
    async fn test_errors_go_to_the_originating_connection() {
        let (state, _dir) = test_state().await;
        let alice = seed_user(&state.store, UserKind::Reseller, "Alice").await;
        let (origin, mut rx) = ConnectionHandle::new(4);

        handle_frame(&state, alice, &origin, "{not json").await;
        let Some(ServerEvent::Error { message }) = rx.recv().await else {
            panic!("expected error event");
        };
        assert!(message.starts_with("Invalid request"));

        let frame = serde_json::json!({
            "event": "send-channel-message",
            "data": { "channelId": Uuid::new_v4(), "messageType": "text", "content": "hi" }
        })
        .to_string();
        handle_frame(&state, alice, &origin, &frame).await;
        let Some(ServerEvent::Error { message }) = rx.recv().await else {
            panic!("expected error event");
        };
        assert!(message.starts_with("Not found"));
    }
}
