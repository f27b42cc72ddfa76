use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        sse::ServerEvent,
        ws::{ClientEvent, ServerMessage},
    },
    error::ServiceError,
    services::handlers::{self, Caller, Dispatch, RoomAudience},
    state::{AppState, ClientConnection, SharedState},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle of one live-session WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

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
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let Ok(ClientEvent::Identify {
        user_id,
        role,
        session_code,
    }) = ClientEvent::from_json_str(&initial_message)
    else {
        warn!("first message was not a valid identification");
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    };

    let connection_id = Uuid::new_v4().simple().to_string();
    let caller =
        match handlers::identify(&state, &connection_id, user_id, role, session_code).await {
            Ok(caller) => caller,
            Err(err) => {
                warn!(error = %err, "identification rejected");
                send_message_to_websocket(&outbound_tx, &ServerMessage::from(&err));
                let _ = outbound_tx.send(Message::Close(None));
                finalize(writer_task, outbound_tx).await;
                return;
            }
        };

    state.clients().insert(
        connection_id.clone(),
        ClientConnection {
            connection_id: connection_id.clone(),
            user_id: caller.user_id.clone(),
            role: caller.role,
            session_code: caller.session_code.clone(),
            tx: outbound_tx.clone(),
        },
    );
    send_message_to_websocket(
        &outbound_tx,
        &ServerMessage::Identified {
            session_code: caller.session_code.clone(),
            role: caller.role,
        },
    );

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientEvent::from_json_str(&text) {
                Ok(ClientEvent::Disconnect) => {
                    info!(connection_id = %connection_id, "client requested disconnect");
                    break;
                }
                Ok(event) => {
                    let dispatches = handlers::handle_event(&state, &caller, event).await;
                    if deliver(&state, &caller, &outbound_tx, dispatches).is_err() {
                        info!(connection_id = %connection_id, "writer closed, terminating");
                        break;
                    }
                }
                Err(err) => {
                    warn!(connection_id = %connection_id, error = %err, "failed to parse client message");
                    let invalid = ServiceError::InvalidInput(format!("malformed message: {err}"));
                    send_message_to_websocket(&outbound_tx, &ServerMessage::from(&invalid));
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.clients().remove(&connection_id);
    let dispatches = handlers::disconnect(&state, &caller).await;
    let _ = deliver(&state, &caller, &outbound_tx, dispatches);
    info!(
        code = %caller.session_code,
        user_id = %caller.user_id,
        connection_id = %connection_id,
        "client disconnected"
    );

    finalize(writer_task, outbound_tx).await;
}

/// Execute handler dispatches. Fails only when the caller's own writer is closed.
fn deliver(
    state: &AppState,
    caller: &Caller,
    own_tx: &mpsc::UnboundedSender<Message>,
    dispatches: Vec<Dispatch>,
) -> Result<(), mpsc::error::SendError<Message>> {
    for dispatch in dispatches {
        match dispatch {
            Dispatch::Reply(message) => {
                let payload = encode(&message);
                if let Some(payload) = payload {
                    own_tx.send(Message::Text(payload.into()))?;
                }
            }
            Dispatch::Room {
                code,
                audience,
                message,
            } => broadcast_to_room(state, caller, &code, audience, &message),
            Dispatch::User {
                code,
                user_id,
                message,
            } => send_to_user(state, &code, &user_id, &message),
        }
    }
    Ok(())
}

/// Fan a message out to the matching connections of the session and to its projector feed.
fn broadcast_to_room(
    state: &AppState,
    caller: &Caller,
    code: &str,
    audience: RoomAudience,
    message: &ServerMessage,
) {
    let Some(payload) = encode(message) else {
        return;
    };
    let targets: Vec<(String, mpsc::UnboundedSender<Message>)> = state
        .clients()
        .iter()
        .filter(|entry| entry.session_code == code)
        .filter(|entry| audience == RoomAudience::Everyone || entry.role.is_privileged())
        .map(|entry| (entry.connection_id.clone(), entry.tx.clone()))
        .collect();

    for (connection_id, tx) in targets {
        if tx.send(Message::Text(payload.clone().into())).is_err() {
            warn!(
                code = %code,
                connection_id = %connection_id,
                sender = %caller.connection_id,
                "send failed (writer closed), removing client connection"
            );
            state.clients().remove(&connection_id);
        }
    }

    state.projectors().publish(
        code,
        ServerEvent::new(Some(message.name().to_string()), payload),
    );
}

/// Push a message to every live connection of `user_id` in `code`.
fn send_to_user(state: &AppState, code: &str, user_id: &str, message: &ServerMessage) {
    let targets: Vec<mpsc::UnboundedSender<Message>> = state
        .clients()
        .iter()
        .filter(|entry| entry.session_code == code && entry.user_id == user_id)
        .map(|entry| entry.tx.clone())
        .collect();
    for tx in targets {
        send_message_to_websocket(&tx, message);
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{message:?}`");
            None
        }
    }
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization and closed-writer failures are logged; the read loop notices a dead
/// connection on its own.
pub fn send_message_to_websocket<T>(tx: &mpsc::UnboundedSender<Message>, value: &T)
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return;
        }
    };

    if tx.send(Message::Text(payload.into())).is_err() {
        warn!("websocket writer closed, dropping message");
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
