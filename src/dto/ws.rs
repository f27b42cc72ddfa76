//! Frames exchanged over the live-session WebSocket.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;

use crate::state::{
    question::{Question, QuestionKind, Submission},
    session::{
        AnswerRecord, AnswerStats, Audience, ConnectionStatus, LeaderboardEntry, Participant,
        PlayMode, ProjectionFlag, ProjectionState, QuestionTimer,
    },
};

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
/// Messages accepted from live-session WebSocket clients.
///
/// The first frame of a connection must be `identify`; every later frame acts on the
/// identified session as the identified user.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind the connection to a user, a role and a session.
    #[serde(rename_all = "camelCase")]
    Identify {
        /// Caller identity.
        user_id: String,
        /// Viewer kind; `teacher` and `projector` must be the session controller.
        role: Audience,
        /// Session to attach to.
        session_code: String,
    },
    /// Join, rejoin, or start a new deferred attempt.
    #[serde(rename_all = "camelCase")]
    Join {
        /// Name shown to the room.
        display_name: String,
        /// Anonymous browser identity used for history lookups.
        #[serde(default)]
        cookie_id: Option<String>,
    },
    /// Answer a question, replacing any earlier answer to it.
    #[serde(rename_all = "camelCase")]
    SubmitAnswer {
        /// Answered question.
        question_uid: String,
        /// The answer.
        submission: Submission,
        /// Time taken since the question opened, as measured by the client.
        #[serde(default)]
        elapsed_ms: u64,
    },
    /// Open the first question. Controller only.
    StartSession,
    /// Move to the next question. Controller only.
    #[serde(rename_all = "camelCase")]
    AdvanceQuestion {
        /// Index the controller believes is current. Duplicate advances are dropped.
        #[serde(default)]
        expected_index: Option<usize>,
        /// Time allowed for the new question.
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    /// Jump back to an earlier question. Controller only.
    #[serde(rename_all = "camelCase")]
    RewindQuestion {
        /// Target question index.
        index: usize,
        /// Time allowed for the reopened question.
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    /// Publish the current standings to students. Controller only.
    RevealLeaderboard,
    /// Change one projector toggle. Controller only.
    ToggleProjectionFlag {
        /// Toggle to change.
        flag: ProjectionFlag,
        /// New value.
        value: bool,
    },
    /// Close or reopen the open question to new answers. Controller only.
    LockAnswers {
        /// True to close the question.
        locked: bool,
    },
    /// Freeze the question timer. Controller only.
    PauseTimer,
    /// Restart a frozen question timer. Controller only.
    ResumeTimer,
    /// End the caller's deferred attempt early.
    FinishAttempt,
    /// Persist the results and close the session. Controller only.
    CompleteSession,
    /// Leave the session; the socket stays open.
    Disconnect,
}

impl ClientEvent {
    /// Parse one text frame.
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Question as shown to participants: the expected answer is withheld.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    /// Question identifier.
    pub uid: String,
    /// `single_choice`, `multiple_choice` or `numeric`.
    pub kind: String,
    /// Offered options of choice questions.
    pub options: Option<Vec<String>>,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        let (kind, options) = match &question.kind {
            QuestionKind::SingleChoice { options, .. } => ("single_choice", Some(options.clone())),
            QuestionKind::MultipleChoice { options, .. } => {
                ("multiple_choice", Some(options.clone()))
            }
            QuestionKind::Numeric { .. } => ("numeric", None),
        };
        Self {
            uid: question.uid.clone(),
            kind: kind.into(),
            options,
        }
    }
}

/// Participant as seen by the other clients of a session.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    /// Participant identity.
    pub user_id: String,
    /// Name shown to the room.
    pub display_name: String,
    /// Score that counts in the session's play mode.
    pub score: i64,
    /// Attempts started.
    pub attempt_count: u32,
    /// Last known presence.
    pub connection_status: ConnectionStatus,
}

impl ParticipantView {
    /// View of `participant` scored for `mode`.
    pub fn new(participant: &Participant, mode: PlayMode) -> Self {
        Self {
            user_id: participant.user_id.clone(),
            display_name: participant.display_name.clone(),
            score: participant.score(mode),
            attempt_count: participant.attempt_count,
            connection_status: participant.connection_status,
        }
    }
}

/// Scoring result of one accepted answer.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerFeedback {
    /// Answered question.
    pub question_uid: String,
    /// Attempt the answer counts for.
    pub attempt: u32,
    /// Credit percentage, 0 to 100.
    pub credit: u8,
    /// Whether the answer was fully correct.
    pub is_fully_correct: bool,
    /// Points the answer is worth after the time penalty.
    pub points: i64,
}

impl From<&AnswerRecord> for AnswerFeedback {
    fn from(answer: &AnswerRecord) -> Self {
        Self {
            question_uid: answer.question_uid.clone(),
            attempt: answer.attempt,
            credit: answer.credit,
            is_fully_correct: answer.is_fully_correct,
            points: answer.points,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
/// Messages pushed to live-session WebSocket clients and projector feeds.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The connection is bound to a session.
    #[serde(rename_all = "camelCase")]
    Identified {
        /// Bound session.
        session_code: String,
        /// Role granted.
        role: Audience,
    },
    /// Reply to the joining user.
    #[serde(rename_all = "camelCase")]
    Joined {
        /// Participant after the join.
        participant: ParticipantView,
        /// The user had never joined before.
        first_join: bool,
        /// A deferred attempt started.
        new_attempt: bool,
        /// Bonus granted for this join, 0 on rejoins.
        join_bonus: i64,
    },
    /// Somebody joined the room.
    ParticipantJoined {
        /// The newcomer.
        participant: ParticipantView,
    },
    /// A participant's last connection closed.
    #[serde(rename_all = "camelCase")]
    ParticipantLeft {
        /// Participant gone offline.
        user_id: String,
    },
    /// Reply to an accepted answer.
    #[serde(rename_all = "camelCase")]
    AnswerAccepted {
        /// Scoring of the answer.
        answer: AnswerFeedback,
        /// Participant's score afterwards.
        score: i64,
        /// The answer completed the deferred attempt.
        attempt_finished: bool,
    },
    /// Play started.
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        /// Index of the open question.
        question_index: usize,
        /// The open question.
        question: Option<QuestionView>,
        /// Its timer.
        timer: Option<QuestionTimer>,
    },
    /// The open question changed.
    #[serde(rename_all = "camelCase")]
    QuestionChanged {
        /// Index of the open question.
        question_index: usize,
        /// The open question.
        question: Option<QuestionView>,
        /// Its timer.
        timer: Option<QuestionTimer>,
    },
    /// Standings for the receiving audience.
    Leaderboard {
        /// Ranked entries, best first.
        entries: Vec<LeaderboardEntry>,
    },
    /// Projector toggles changed.
    Projection {
        /// New toggles.
        state: ProjectionState,
    },
    /// The open question was closed to or reopened for answers.
    AnswersLocked {
        /// True while closed.
        locked: bool,
    },
    /// The question timer was paused or resumed.
    TimerChanged {
        /// Timer after the change.
        timer: QuestionTimer,
    },
    /// Answer distribution of the open question, for teachers and projectors.
    AnswerStats {
        /// Current distribution.
        stats: AnswerStats,
    },
    /// A deferred attempt ended.
    #[serde(rename_all = "camelCase")]
    AttemptFinished {
        /// Participant whose attempt ended.
        user_id: String,
        /// Attempt that ended.
        attempt_count: u32,
    },
    /// Results are persisted and the session is closed.
    #[serde(rename_all = "camelCase")]
    SessionCompleted {
        /// Closed session.
        session_code: String,
        /// An earlier call already stored the results.
        already_persisted: bool,
    },
    /// The last frame could not be handled.
    Error {
        /// Stable error code.
        kind: String,
        /// Human-readable detail.
        message: String,
    },
}

impl ServerMessage {
    /// Event name used when the message is relayed over SSE.
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::Identified { .. } => "identified",
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::ParticipantJoined { .. } => "participant_joined",
            ServerMessage::ParticipantLeft { .. } => "participant_left",
            ServerMessage::AnswerAccepted { .. } => "answer_accepted",
            ServerMessage::SessionStarted { .. } => "session_started",
            ServerMessage::QuestionChanged { .. } => "question_changed",
            ServerMessage::Leaderboard { .. } => "leaderboard",
            ServerMessage::Projection { .. } => "projection",
            ServerMessage::AnswersLocked { .. } => "answers_locked",
            ServerMessage::TimerChanged { .. } => "timer_changed",
            ServerMessage::AnswerStats { .. } => "answer_stats",
            ServerMessage::AttemptFinished { .. } => "attempt_finished",
            ServerMessage::SessionCompleted { .. } => "session_completed",
            ServerMessage::Error { .. } => "error",
        }
    }
}
