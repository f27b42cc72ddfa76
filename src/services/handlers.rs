//! Transport-neutral handling of live-session client events.
//!
//! Handlers validate the caller, call exactly one session operation and describe who must
//! be told about the outcome. Delivery is left to the transport: the WebSocket adapter
//! executes the returned [`Dispatch`]es against its connection registry and relays
//! privileged room messages to the projector feed.

use tracing::{debug, info};

use crate::{
    dto::ws::{AnswerFeedback, ClientEvent, ParticipantView, QuestionView, ServerMessage},
    error::ServiceError,
    services::{
        presence_service::PresenceChange,
        session_service::{AnswerInput, JoinRequest},
    },
    state::{
        AppState,
        session::{Audience, ProjectionFlag},
    },
};

/// Identified sender of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Transport connection the events arrive on.
    pub connection_id: String,
    /// Identified user.
    pub user_id: String,
    /// Role granted at identification.
    pub role: Audience,
    /// Session the connection is bound to.
    pub session_code: String,
}

/// Clients of a session a room message is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomAudience {
    /// Every connection of the session.
    Everyone,
    /// Teacher and projector connections, plus the projector SSE feed.
    Privileged,
}

/// Delivery instruction produced by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Back to the connection that sent the event.
    Reply(ServerMessage),
    /// Every matching connection of a session.
    Room {
        /// Target session.
        code: String,
        /// Connections that receive the message.
        audience: RoomAudience,
        /// Payload.
        message: ServerMessage,
    },
    /// Every connection of one user in a session, e.g. several open tabs.
    User {
        /// Target session.
        code: String,
        /// Target user.
        user_id: String,
        /// Payload.
        message: ServerMessage,
    },
}

impl Dispatch {
    fn everyone(code: &str, message: ServerMessage) -> Self {
        Dispatch::Room {
            code: code.to_owned(),
            audience: RoomAudience::Everyone,
            message,
        }
    }

    fn privileged(code: &str, message: ServerMessage) -> Self {
        Dispatch::Room {
            code: code.to_owned(),
            audience: RoomAudience::Privileged,
            message,
        }
    }
}

impl From<&ServiceError> for ServerMessage {
    fn from(err: &ServiceError) -> Self {
        ServerMessage::Error {
            kind: err.kind().into(),
            message: err.public_message(),
        }
    }
}

/// Bind a connection to a session.
///
/// Teacher and projector roles are reserved to the session controller. Only student
/// connections count towards presence.
pub async fn identify(
    state: &AppState,
    connection_id: &str,
    user_id: String,
    role: Audience,
    session_code: String,
) -> Result<Caller, ServiceError> {
    let controller = state
        .sessions()
        .read(&session_code, |session| session.controller_id.clone())
        .await?;
    if role.is_privileged() && controller != user_id {
        return Err(ServiceError::Unauthorized(format!(
            "only the session controller may connect as {role:?}"
        )));
    }

    if !role.is_privileged() {
        state
            .presence()
            .on_connect(&user_id, &session_code, connection_id)
            .await;
    }
    info!(
        code = %session_code,
        user_id = %user_id,
        role = ?role,
        connection_id = %connection_id,
        "client identified"
    );
    Ok(Caller {
        connection_id: connection_id.to_owned(),
        user_id,
        role,
        session_code,
    })
}

/// Handle one event from an identified caller. Failures become an error reply.
pub async fn handle_event(state: &AppState, caller: &Caller, event: ClientEvent) -> Vec<Dispatch> {
    let result = match event {
        ClientEvent::Identify { .. } => Err(ServiceError::InvalidState(
            "connection is already identified".into(),
        )),
        ClientEvent::Join {
            display_name,
            cookie_id,
        } => join(state, caller, display_name, cookie_id).await,
        ClientEvent::SubmitAnswer {
            question_uid,
            submission,
            elapsed_ms,
        } => {
            submit_answer(
                state,
                caller,
                AnswerInput {
                    user_id: caller.user_id.clone(),
                    question_uid,
                    submission,
                    elapsed_ms,
                },
            )
            .await
        }
        ClientEvent::StartSession => start(state, caller).await,
        ClientEvent::AdvanceQuestion {
            expected_index,
            duration_ms,
        } => advance(state, caller, expected_index, duration_ms).await,
        ClientEvent::RewindQuestion { index, duration_ms } => {
            rewind(state, caller, index, duration_ms).await
        }
        ClientEvent::RevealLeaderboard => reveal(state, caller).await,
        ClientEvent::ToggleProjectionFlag { flag, value } => {
            toggle_projection(state, caller, flag, value).await
        }
        ClientEvent::LockAnswers { locked } => {
            let code = &caller.session_code;
            state
                .sessions()
                .set_answers_locked(code, &caller.user_id, locked)
                .await
                .map(|locked| {
                    vec![Dispatch::everyone(code, ServerMessage::AnswersLocked { locked })]
                })
        }
        ClientEvent::PauseTimer => {
            let code = &caller.session_code;
            state
                .sessions()
                .pause_timer(code, &caller.user_id)
                .await
                .map(|timer| {
                    vec![Dispatch::everyone(code, ServerMessage::TimerChanged { timer })]
                })
        }
        ClientEvent::ResumeTimer => {
            let code = &caller.session_code;
            state
                .sessions()
                .resume_timer(code, &caller.user_id)
                .await
                .map(|timer| {
                    vec![Dispatch::everyone(code, ServerMessage::TimerChanged { timer })]
                })
        }
        ClientEvent::FinishAttempt => finish_attempt(state, caller).await,
        ClientEvent::CompleteSession => complete(state, caller).await,
        ClientEvent::Disconnect => Ok(disconnect(state, caller).await),
    };

    result.unwrap_or_else(|err| {
        debug!(
            code = %caller.session_code,
            user_id = %caller.user_id,
            error = %err,
            "client event rejected"
        );
        vec![Dispatch::Reply(ServerMessage::from(&err))]
    })
}

/// Release the caller's connection and tell the room when a participant is gone.
pub async fn disconnect(state: &AppState, caller: &Caller) -> Vec<Dispatch> {
    if caller.role.is_privileged() {
        return Vec::new();
    }
    match state
        .presence()
        .on_disconnect(&caller.connection_id, Some(&caller.session_code))
        .await
    {
        PresenceChange::Left {
            code,
            user_id,
            participant,
        } => {
            let joined = match participant {
                Some(_) => true,
                None => state
                    .sessions()
                    .read(&code, |session| session.participants.contains_key(&user_id))
                    .await
                    .unwrap_or(false),
            };
            if !joined {
                return Vec::new();
            }
            vec![Dispatch::everyone(
                &code,
                ServerMessage::ParticipantLeft { user_id },
            )]
        }
        PresenceChange::StillPresent { .. } | PresenceChange::Ignored => Vec::new(),
    }
}

fn ensure_student(caller: &Caller) -> Result<(), ServiceError> {
    if caller.role == Audience::Student {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(
            "only students take part in a session".into(),
        ))
    }
}

async fn join(
    state: &AppState,
    caller: &Caller,
    display_name: String,
    cookie_id: Option<String>,
) -> Result<Vec<Dispatch>, ServiceError> {
    ensure_student(caller)?;
    let code = &caller.session_code;
    let outcome = state
        .sessions()
        .join(
            code,
            JoinRequest {
                user_id: caller.user_id.clone(),
                display_name,
                cookie_id,
            },
        )
        .await?;
    let mode = state.sessions().read(code, |session| session.play_mode).await?;
    let participant = ParticipantView::new(&outcome.participant, mode);

    let mut dispatches = vec![
        Dispatch::Reply(ServerMessage::Joined {
            participant: participant.clone(),
            first_join: outcome.first_join,
            new_attempt: outcome.new_attempt,
            join_bonus: outcome.join_bonus,
        }),
        Dispatch::privileged(code, ServerMessage::ParticipantJoined { participant }),
        Dispatch::privileged(
            code,
            ServerMessage::Leaderboard {
                entries: state.leaderboard().compute(code, Audience::Teacher).await?,
            },
        ),
    ];
    let snapshot = state.leaderboard().compute(code, Audience::Student).await?;
    if !snapshot.is_empty() {
        dispatches.push(Dispatch::Reply(ServerMessage::Leaderboard { entries: snapshot }));
    }
    Ok(dispatches)
}

async fn submit_answer(
    state: &AppState,
    caller: &Caller,
    input: AnswerInput,
) -> Result<Vec<Dispatch>, ServiceError> {
    ensure_student(caller)?;
    let code = &caller.session_code;
    let outcome = state.sessions().apply_answer(code, input).await?;
    let mode = state.sessions().read(code, |session| session.play_mode).await?;

    let mut dispatches = vec![Dispatch::Reply(ServerMessage::AnswerAccepted {
        answer: AnswerFeedback::from(&outcome.answer),
        score: outcome.participant.score(mode),
        attempt_finished: outcome.attempt_finished,
    })];
    if outcome.changed {
        dispatches.push(Dispatch::privileged(
            code,
            ServerMessage::Leaderboard {
                entries: state.leaderboard().compute(code, Audience::Teacher).await?,
            },
        ));
        let show_stats = state.sessions().projection(code).await?.show_stats;
        if show_stats {
            let stats = state
                .sessions()
                .answer_stats(code, Some(&outcome.answer.question_uid))
                .await?;
            dispatches.push(Dispatch::privileged(code, ServerMessage::AnswerStats { stats }));
        }
    }
    Ok(dispatches)
}

async fn toggle_projection(
    state: &AppState,
    caller: &Caller,
    flag: ProjectionFlag,
    value: bool,
) -> Result<Vec<Dispatch>, ServiceError> {
    let code = &caller.session_code;
    let projection = state
        .sessions()
        .set_projection_flag(code, &caller.user_id, flag, value)
        .await?;
    let mut dispatches = vec![Dispatch::privileged(
        code,
        ServerMessage::Projection { state: projection },
    )];
    if flag == ProjectionFlag::ShowStats && value {
        match state.sessions().answer_stats(code, None).await {
            Ok(stats) => {
                dispatches.push(Dispatch::privileged(code, ServerMessage::AnswerStats { stats }))
            }
            Err(ServiceError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(dispatches)
}

async fn start(state: &AppState, caller: &Caller) -> Result<Vec<Dispatch>, ServiceError> {
    let code = &caller.session_code;
    let summary = state.sessions().start_session(code, &caller.user_id).await?;
    let question = current_question(state, code).await?;
    Ok(vec![Dispatch::everyone(
        code,
        ServerMessage::SessionStarted {
            question_index: summary.current_question_index,
            question,
            timer: summary.timer,
        },
    )])
}

async fn advance(
    state: &AppState,
    caller: &Caller,
    expected_index: Option<usize>,
    duration_ms: Option<u64>,
) -> Result<Vec<Dispatch>, ServiceError> {
    let code = &caller.session_code;
    let step = state
        .sessions()
        .advance_question(code, &caller.user_id, expected_index, duration_ms)
        .await?;
    let changed = ServerMessage::QuestionChanged {
        question_index: step.index,
        question: current_question(state, code).await?,
        timer: step.timer,
    };
    if !step.moved {
        return Ok(vec![Dispatch::Reply(changed)]);
    }
    Ok(vec![
        Dispatch::everyone(code, changed),
        Dispatch::privileged(
            code,
            ServerMessage::Projection {
                state: step.projection,
            },
        ),
    ])
}

async fn rewind(
    state: &AppState,
    caller: &Caller,
    index: usize,
    duration_ms: Option<u64>,
) -> Result<Vec<Dispatch>, ServiceError> {
    let code = &caller.session_code;
    let step = state
        .sessions()
        .rewind_question(code, &caller.user_id, index, duration_ms)
        .await?;
    Ok(vec![
        Dispatch::everyone(
            code,
            ServerMessage::QuestionChanged {
                question_index: step.index,
                question: current_question(state, code).await?,
                timer: step.timer,
            },
        ),
        Dispatch::privileged(
            code,
            ServerMessage::Projection {
                state: step.projection,
            },
        ),
    ])
}

async fn reveal(state: &AppState, caller: &Caller) -> Result<Vec<Dispatch>, ServiceError> {
    let code = &caller.session_code;
    let entries = state.leaderboard().reveal(code, &caller.user_id).await?;
    Ok(vec![Dispatch::everyone(
        code,
        ServerMessage::Leaderboard { entries },
    )])
}

async fn finish_attempt(state: &AppState, caller: &Caller) -> Result<Vec<Dispatch>, ServiceError> {
    ensure_student(caller)?;
    let code = &caller.session_code;
    let participant = state
        .sessions()
        .finish_attempt(code, &caller.user_id)
        .await?;
    let finished = ServerMessage::AttemptFinished {
        user_id: participant.user_id,
        attempt_count: participant.attempt_count,
    };
    Ok(vec![
        Dispatch::User {
            code: code.clone(),
            user_id: caller.user_id.clone(),
            message: finished.clone(),
        },
        Dispatch::privileged(code, finished),
    ])
}

async fn complete(state: &AppState, caller: &Caller) -> Result<Vec<Dispatch>, ServiceError> {
    let code = &caller.session_code;
    let results = state
        .sessions()
        .complete_session(code, &caller.user_id)
        .await?;
    Ok(vec![Dispatch::everyone(
        code,
        ServerMessage::SessionCompleted {
            session_code: results.access_code,
            already_persisted: results.already_persisted,
        },
    )])
}

async fn current_question(
    state: &AppState,
    code: &str,
) -> Result<Option<QuestionView>, ServiceError> {
    state
        .sessions()
        .read(code, |session| session.current_question().map(QuestionView::from))
        .await
}
