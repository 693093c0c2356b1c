//! WebSocket connection lifecycle for hosts and players.
//!
//! A fresh socket must identify itself within a short window: `host` with the
//! session's host token, or `join` with a display name. After admission the
//! read loop only forwards commands into the session engine's serialized
//! command stream; it never touches session state itself.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientMessage, ServerMessage},
    error::ServiceError,
    state::{EngineHandle, ParticipantConnection, SharedState, registry::send_json},
};

use super::{
    engine::{HostAction, SessionCommand},
    session_service,
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle of one participant WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket, pin: String) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we
    // await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let engine = match session_service::ensure_engine(&state, &pin).await {
        Ok(handle) => handle,
        Err(err) => {
            send_json(&outbound_tx, &ServerMessage::error(&err));
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(%pin, error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!(%pin, "websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let inbound = match ClientMessage::from_json_str(&initial_message) {
        Ok(message) => message,
        Err(err) => {
            warn!(%pin, error = %err, "failed to parse identification message");
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    match inbound {
        ClientMessage::Host { token } => {
            run_host_connection(&engine, &pin, token, &outbound_tx, &mut receiver).await;
        }
        ClientMessage::Join { name } => {
            run_player_connection(&engine, &pin, name, &outbound_tx, &mut receiver).await;
        }
        _ => {
            warn!(%pin, "first message was neither host nor join");
            let err = ServiceError::InvalidInput(
                "identify with a `host` or `join` message first".into(),
            );
            send_json(&outbound_tx, &ServerMessage::error(&err));
            let _ = outbound_tx.send(Message::Close(None));
        }
    }

    finalize(writer_task, outbound_tx).await;
}

type SocketReceiver = futures::stream::SplitStream<WebSocket>;

/// Admission handshake shared by both roles.
async fn admit(
    engine: &EngineHandle,
    command: impl FnOnce(oneshot::Sender<Result<(), ServiceError>>) -> SessionCommand,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) -> bool {
    let (verdict_tx, verdict_rx) = oneshot::channel();
    if engine.tx.send(command(verdict_tx)).is_err() {
        let err = ServiceError::NotFound("session is no longer live".into());
        send_json(outbound_tx, &ServerMessage::error(&err));
        let _ = outbound_tx.send(Message::Close(None));
        return false;
    }

    match verdict_rx.await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            send_json(outbound_tx, &ServerMessage::error(&err));
            let _ = outbound_tx.send(Message::Close(None));
            false
        }
        Err(_) => {
            let _ = outbound_tx.send(Message::Close(None));
            false
        }
    }
}

async fn run_host_connection(
    engine: &EngineHandle,
    pin: &str,
    token: Uuid,
    outbound_tx: &mpsc::UnboundedSender<Message>,
    receiver: &mut SocketReceiver,
) {
    let connection = ParticipantConnection::new(outbound_tx.clone());
    let conn_id = connection.id;

    let admitted = admit(
        engine,
        |respond_to| SessionCommand::ConnectHost {
            token,
            connection,
            respond_to,
        },
        outbound_tx,
    )
    .await;
    if !admitted {
        return;
    }

    info!(%pin, %conn_id, "host connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let action = match ClientMessage::from_json_str(&text) {
                    Ok(ClientMessage::StartQuestion { index }) => {
                        Some(HostAction::StartQuestion { index })
                    }
                    Ok(ClientMessage::CloseQuestion) => Some(HostAction::CloseQuestion),
                    Ok(ClientMessage::NextQuestion) => Some(HostAction::NextQuestion),
                    Ok(ClientMessage::EndGame) => Some(HostAction::EndGame),
                    Ok(ClientMessage::KickPlayer { name }) => {
                        Some(HostAction::KickPlayer { name })
                    }
                    Ok(ClientMessage::Heartbeat) => Some(HostAction::Heartbeat),
                    Ok(ClientMessage::Host { .. }) => {
                        warn!(%pin, "ignoring duplicate host identification");
                        Some(HostAction::Heartbeat)
                    }
                    Ok(ClientMessage::Join { .. } | ClientMessage::SubmitAnswer { .. }) => {
                        let err = ServiceError::Unauthorized(
                            "player messages are not valid on the host connection".into(),
                        );
                        send_json(outbound_tx, &ServerMessage::error(&err));
                        None
                    }
                    Ok(ClientMessage::Unknown) => {
                        let err =
                            ServiceError::InvalidInput("unknown message type".into());
                        send_json(outbound_tx, &ServerMessage::error(&err));
                        None
                    }
                    Err(err) => {
                        warn!(%pin, error = %err, "failed to parse host message");
                        let err = ServiceError::InvalidInput("malformed message".into());
                        send_json(outbound_tx, &ServerMessage::error(&err));
                        None
                    }
                };

                if let Some(action) = action
                    && engine
                        .tx
                        .send(SessionCommand::HostAction { conn_id, action })
                        .is_err()
                {
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
                // Any sign of life counts toward the heartbeat window.
                let _ = engine.tx.send(SessionCommand::HostAction {
                    conn_id,
                    action: HostAction::Heartbeat,
                });
            }
            Ok(Message::Close(frame)) => {
                info!(%pin, "host closed the connection");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%pin, error = %err, "host websocket error");
                break;
            }
        }
    }

    let _ = engine.tx.send(SessionCommand::HostDisconnected { conn_id });
    info!(%pin, "host connection ended");
}

async fn run_player_connection(
    engine: &EngineHandle,
    pin: &str,
    name: String,
    outbound_tx: &mpsc::UnboundedSender<Message>,
    receiver: &mut SocketReceiver,
) {
    let name = name.trim().to_owned();
    let connection = ParticipantConnection::new(outbound_tx.clone());
    let conn_id = connection.id;

    let admitted = admit(
        engine,
        |respond_to| SessionCommand::Join {
            name: name.clone(),
            connection,
            respond_to,
        },
        outbound_tx,
    )
    .await;
    if !admitted {
        return;
    }

    info!(%pin, player = %name, "player connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientMessage::from_json_str(&text) {
                Ok(ClientMessage::SubmitAnswer { answer, sent_at_ms }) => {
                    let command = SessionCommand::Submit {
                        name: name.clone(),
                        answer: answer.into(),
                        sent_at_ms,
                        received_at: Instant::now(),
                    };
                    if engine.tx.send(command).is_err() {
                        break;
                    }
                }
                Ok(ClientMessage::Heartbeat) => {}
                Ok(ClientMessage::Join { .. }) => {
                    warn!(%pin, player = %name, "ignoring duplicate join message");
                }
                Ok(
                    ClientMessage::Host { .. }
                    | ClientMessage::StartQuestion { .. }
                    | ClientMessage::CloseQuestion
                    | ClientMessage::NextQuestion
                    | ClientMessage::EndGame
                    | ClientMessage::KickPlayer { .. },
                ) => {
                    let err = ServiceError::Unauthorized(
                        "host commands are not valid on a player connection".into(),
                    );
                    send_json(outbound_tx, &ServerMessage::error(&err));
                }
                Ok(ClientMessage::Unknown) => {
                    let err = ServiceError::InvalidInput("unknown message type".into());
                    send_json(outbound_tx, &ServerMessage::error(&err));
                }
                Err(err) => {
                    warn!(%pin, player = %name, error = %err, "failed to parse player message");
                    let err = ServiceError::InvalidInput("malformed message".into());
                    send_json(outbound_tx, &ServerMessage::error(&err));
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(%pin, player = %name, "player closed the connection");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%pin, player = %name, error = %err, "player websocket error");
                break;
            }
        }
    }

    let _ = engine.tx.send(SessionCommand::PlayerDisconnected {
        name: name.clone(),
        conn_id,
    });
    info!(%pin, player = %name, "player disconnected");
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
