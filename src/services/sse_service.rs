use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    dto::{
        sse::{ProjectorHandshake, ServerEvent},
        ws::ServerMessage,
    },
    error::ServiceError,
    state::{SharedState, session::Audience},
};

/// Subscribe to the projector feed of `code` and queue the current view for the newcomer.
///
/// The feed carries the live board, so only the session controller may open it. The
/// initial events go through the session hub, so projectors already watching receive
/// them too; they carry state every projector already agrees on.
pub async fn subscribe_projector(
    state: &SharedState,
    code: &str,
    actor_id: &str,
) -> Result<broadcast::Receiver<ServerEvent>, ServiceError> {
    let controller = state
        .sessions()
        .read(code, |session| session.is_controller(actor_id))
        .await?;
    if !controller {
        return Err(ServiceError::Unauthorized(
            "only the session controller may open the projector feed".into(),
        ));
    }
    let projection = state.sessions().projection(code).await?;
    let entries = state.leaderboard().compute(code, Audience::Projector).await?;

    let hub = state.projectors().hub(code);
    let receiver = hub.subscribe();

    let handshake = ProjectorHandshake {
        access_code: code.to_owned(),
        degraded: state.is_degraded(),
    };
    let initial = [
        ServerEvent::json(Some("handshake".to_string()), &handshake),
        ServerEvent::json(
            Some("projection".to_string()),
            &ServerMessage::Projection { state: projection },
        ),
        ServerEvent::json(
            Some("leaderboard".to_string()),
            &ServerMessage::Leaderboard { entries },
        ),
    ];
    for event in initial.into_iter().flatten() {
        hub.broadcast(event);
    }
    Ok(receiver)
}

/// Identifies the feed so teardown can release per-session resources.
#[derive(Clone)]
pub enum StreamKind {
    /// Carries the shared state so the hub of the session can be dropped once unwatched.
    Projector { state: SharedState, code: String },
}

/// Convert a broadcast receiver into an SSE response, forwarding events and
/// cleaning up once the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    kind: StreamKind,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: reads from broadcast and pushes into mpsc
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(_)) => {
                            // Skip lagged messages but keep the stream alive.
                            continue;
                        }
                    }
                }
            }
        }

        match kind {
            StreamKind::Projector { state, code } => {
                drop(receiver);
                state.projectors().release(&code);
                tracing::info!(code = %code, "Projector SSE stream disconnected");
            }
        }
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::cache::MemoryStore,
        services::session_service::NewSession,
        state::{
            AppState,
            question::{Question, QuestionBank, QuestionKind},
            session::PlayMode,
        },
    };

    #[tokio::test]
    async fn projector_receives_the_current_view_first() {
        let state = AppState::new(
            Arc::new(AppConfig::default()),
            Arc::new(MemoryStore::new()),
            Arc::new(QuestionBank::default()),
        );
        let code = state
            .sessions()
            .create_session(NewSession {
                access_code: None,
                play_mode: PlayMode::Quiz,
                controller_id: "teacher".into(),
                question_uids: Vec::new(),
                questions: vec![Question {
                    uid: "q1".into(),
                    kind: QuestionKind::Numeric {
                        value: 3.1416,
                        tolerance: 0.0,
                    },
                    discipline: None,
                    grade_level: None,
                    themes: Vec::new(),
                }],
            })
            .await
            .unwrap()
            .access_code;

        let mut receiver = subscribe_projector(&state, &code, "teacher").await.unwrap();
        let names: Vec<_> = (0..3)
            .map(|_| receiver.try_recv().unwrap().event.unwrap())
            .collect();
        assert_eq!(names, ["handshake", "projection", "leaderboard"]);

        assert!(matches!(
            subscribe_projector(&state, &code, "u1").await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            subscribe_projector(&state, "NOPE00", "teacher").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
