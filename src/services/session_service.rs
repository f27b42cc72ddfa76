//! Session State Manager: the single owner of every live session held by this process.
//!
//! Sessions live in an arena keyed by access code, each behind its own async mutex so that
//! operations on one session are serialized without a global lock. Every mutation is written
//! through to the ephemeral store before it is committed in memory, so a failed write leaves
//! both copies untouched and the caller can retry. A lookup that misses the arena rebuilds the
//! session from the store, which is how state survives a restart.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::SystemTime,
};

use dashmap::{DashMap, mapref::entry::Entry};
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        cache::{EphemeralStore, decode, encode, get_json, hgetall_json, keys},
        models::{ParticipantRecordEntity, SessionRecordEntity},
        storage::StorageResult,
    },
    dto::session::SessionSummary,
    error::ServiceError,
    services::{
        leaderboard_service::{entry_for, insert_late_joiner},
        scoring_service::{self, ScoreResult},
    },
    state::{
        durable::DurableSlot,
        question::{Question, QuestionBank, Submission},
        session::{
            AnswerRecord, AnswerStats, ConnectionStatus, LeaderboardEntry, LiveSession,
            Participant, PlayMode, ProjectionFlag, ProjectionState, QuestionTimer,
            SessionStateRecord, unix_millis,
        },
        state_machine::{SessionEvent, SessionPhase, SessionStateMachine},
        transitions::run_transition,
    },
};

const ACCESS_CODE_LEN: usize = 6;
const ACCESS_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ACCESS_CODE_ATTEMPTS: usize = 8;
const PROJECTION_UPDATED_AT_FIELD: &str = "updatedAt";

type SessionHandle = Arc<Mutex<LiveSession>>;

/// Parameters of a new live session.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Requested access code; one is generated when absent.
    pub access_code: Option<String>,
    /// How the session is played; `practice` is refused.
    pub play_mode: PlayMode,
    /// User allowed to drive the session.
    pub controller_id: String,
    /// Questions drawn from the bank, in play order.
    pub question_uids: Vec<String>,
    /// Definitions supplied inline, appended after the bank questions.
    pub questions: Vec<Question>,
}

/// A user joining or rejoining a session.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    /// Joining user.
    pub user_id: String,
    /// Name shown to the room.
    pub display_name: String,
    /// Guest browser cookie.
    pub cookie_id: Option<String>,
}

/// Result of a join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Participant after the join.
    pub participant: Participant,
    /// The user was not yet a participant of this session.
    pub first_join: bool,
    /// A deferred play-through started with this join.
    pub new_attempt: bool,
    /// Bonus granted by this join; 0 on rejoins.
    pub join_bonus: i64,
}

/// One submitted answer.
#[derive(Debug, Clone)]
pub struct AnswerInput {
    /// Answering participant.
    pub user_id: String,
    /// Answered question.
    pub question_uid: String,
    /// The answer.
    pub submission: Submission,
    /// Time the participant took since the question opened.
    pub elapsed_ms: u64,
}

/// Result of a submitted answer.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    /// Participant after scoring.
    pub participant: Participant,
    /// Stored answer, the previous one when nothing changed.
    pub answer: AnswerRecord,
    /// False when the submission repeated the stored one and nothing changed.
    pub changed: bool,
    /// The answer completed the participant's deferred attempt.
    pub attempt_finished: bool,
}

/// Result of a question move. `moved` is false when a concurrent move already happened.
#[derive(Debug, Clone)]
pub struct QuestionMove {
    /// Current question index after the call.
    pub index: usize,
    /// The call moved the session.
    pub moved: bool,
    /// Timer of the current question.
    pub timer: Option<QuestionTimer>,
    /// Projection toggles, reset by a move.
    pub projection: ProjectionState,
}

/// Durable outcome of a completed session.
#[derive(Debug, Clone)]
pub struct FinalResults {
    /// Session access code.
    pub access_code: String,
    /// How the session was played.
    pub play_mode: PlayMode,
    /// Completion time.
    pub completed_at: SystemTime,
    /// One durable row per participant.
    pub participants: Vec<ParticipantRecordEntity>,
    /// The records were already stored by an earlier call.
    pub already_persisted: bool,
}

/// Owner of the live sessions of this process.
pub struct SessionStateManager {
    cache: Arc<dyn EphemeralStore>,
    durable: Arc<DurableSlot>,
    config: Arc<AppConfig>,
    questions: Arc<QuestionBank>,
    arena: DashMap<String, SessionHandle>,
}

impl SessionStateManager {
    /// Manager over the shared stores. The arena starts empty.
    pub fn new(
        cache: Arc<dyn EphemeralStore>,
        durable: Arc<DurableSlot>,
        config: Arc<AppConfig>,
        questions: Arc<QuestionBank>,
    ) -> Self {
        Self {
            cache,
            durable,
            config,
            questions,
            arena: DashMap::new(),
        }
    }

    /// Register a `pending` session.
    pub async fn create_session(&self, request: NewSession) -> Result<SessionSummary, ServiceError> {
        if request.play_mode == PlayMode::Practice {
            return Err(ServiceError::InvalidInput(
                "practice runs are created through the practice API".into(),
            ));
        }
        let questions = self.resolve_questions(&request.question_uids, request.questions)?;

        let code = match request.access_code {
            Some(code) => {
                if self.code_in_use(&code).await? {
                    return Err(ServiceError::InvalidState(format!(
                        "access code `{code}` is already in use"
                    )));
                }
                code
            }
            None => self.fresh_access_code().await?,
        };

        let session = LiveSession::new(
            code.clone(),
            request.play_mode,
            request.controller_id,
            questions,
        );
        let record = session.to_record();
        let summary = SessionSummary::from(&session);

        match self.arena.entry(code.clone()) {
            Entry::Occupied(_) => {
                return Err(ServiceError::InvalidState(format!(
                    "access code `{code}` is already in use"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(session)));
            }
        }

        if let Err(err) = self.write_state(&record).await {
            self.arena.remove(&code);
            return Err(err.into());
        }

        info!(
            code = %code,
            mode = record.play_mode.as_str(),
            questions = record.questions.len(),
            "session created"
        );
        Ok(summary)
    }

    /// `pending -> active`, opening the first question. Controller only.
    pub async fn start_session(
        &self,
        code: &str,
        actor_id: &str,
    ) -> Result<SessionSummary, ServiceError> {
        let handle = self.session(code).await?;
        let mut session = handle.lock().await;
        ensure_controller(&session, actor_id, "start the session")?;

        let timer = session
            .questions
            .first()
            .map(|question| open_timer(question, None));
        let mut record = session.to_record();
        record.current_question_index = 0;
        record.timer = timer.clone();

        run_transition(&mut session.machine, SessionEvent::Start, None, |next| async move {
            record.status = next;
            self.write_state(&record).await.map_err(ServiceError::from)
        })
        .await?;

        session.current_question_index = 0;
        session.timer = timer;
        info!(code = %code, "session started");
        Ok(SessionSummary::from(&*session))
    }

    /// Add or refresh a participant, applying the play-mode attempt policy.
    pub async fn join(&self, code: &str, request: JoinRequest) -> Result<JoinOutcome, ServiceError> {
        let handle = self.session(code).await?;
        let mut session = handle.lock().await;
        ensure_open(&session)?;
        let mode = session.play_mode;

        if let Some(existing) = session.participants.get(&request.user_id) {
            let mut participant = existing.clone();
            // live modes hold the count on rejoin; deferred counts finished play-throughs
            let new_attempt = mode.is_deferred() && participant.completed_at.is_some();
            if new_attempt {
                participant.start_attempt();
            }
            participant.display_name = request.display_name;
            if request.cookie_id.is_some() {
                participant.cookie_id = request.cookie_id;
            }

            if participant != *existing {
                self.write_participant(code, &participant).await?;
                session
                    .participants
                    .insert(participant.user_id.clone(), participant.clone());
            }
            if new_attempt {
                info!(
                    code = %code,
                    user_id = %participant.user_id,
                    attempt = participant.attempt_count,
                    "deferred attempt started"
                );
            }
            return Ok(JoinOutcome {
                participant,
                first_join: false,
                new_attempt,
                join_bonus: 0,
            });
        }

        let order = session.participants.len();
        let join_bonus = self.config.join_bonus(order);
        let mut participant = Participant {
            user_id: request.user_id,
            session_code: code.to_owned(),
            display_name: request.display_name,
            cookie_id: request.cookie_id,
            live_score: 0,
            deferred_score: 0,
            best_deferred_score: 0,
            join_bonus,
            attempt_count: 1,
            connection_status: ConnectionStatus::Online,
            joined_at: SystemTime::now(),
            join_sequence: u64::try_from(order).unwrap_or(u64::MAX),
            completed_at: None,
        };
        participant.replace_award(mode, 0, join_bonus);

        let mut join_order: Vec<String> = session.participants.keys().cloned().collect();
        join_order.push(participant.user_id.clone());

        let snapshot = session.revealed.clone().map(|mut snapshot| {
            insert_late_joiner(&mut snapshot, entry_for(mode, &participant));
            snapshot
        });

        self.write_participant(code, &participant).await?;
        self.write_json(&keys::join_order(code), &join_order).await?;
        if let Some(snapshot) = &snapshot {
            self.write_json(&keys::leaderboard_snapshot(code), snapshot)
                .await?;
        }

        session
            .participants
            .insert(participant.user_id.clone(), participant.clone());
        if snapshot.is_some() {
            session.revealed = snapshot;
        }

        info!(
            code = %code,
            user_id = %participant.user_id,
            order,
            join_bonus,
            "participant joined"
        );
        Ok(JoinOutcome {
            participant,
            first_join: true,
            new_attempt: false,
            join_bonus,
        })
    }

    /// Score an answer and replace whatever the same (user, question, attempt) earned before.
    pub async fn apply_answer(
        &self,
        code: &str,
        input: AnswerInput,
    ) -> Result<AnswerOutcome, ServiceError> {
        let handle = self.session(code).await?;
        let mut session = handle.lock().await;
        ensure_open(&session)?;
        let mode = session.play_mode;

        let participant = session
            .participants
            .get(&input.user_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::NotFound(format!("participant `{}` not in session", input.user_id))
            })?;
        let question = session
            .question(&input.question_uid)
            .cloned()
            .ok_or_else(|| {
                ServiceError::NotFound(format!("question `{}` not in session", input.question_uid))
            })?;

        if mode.is_deferred() {
            if participant.completed_at.is_some() {
                return Err(ServiceError::StaleOperation(
                    "this attempt is already finished".into(),
                ));
            }
        } else if session.current_question().map(|current| current.uid.as_str())
            != Some(question.uid.as_str())
            || session.phase() != SessionPhase::Active
        {
            return Err(ServiceError::InvalidState(format!(
                "question `{}` is not open",
                question.uid
            )));
        } else if session.answers_locked {
            return Err(ServiceError::InvalidState(format!(
                "answers to question `{}` are locked",
                question.uid
            )));
        } else if session.timer.as_ref().is_some_and(QuestionTimer::is_paused) {
            return Err(ServiceError::InvalidState(
                "the question timer is paused".into(),
            ));
        }

        let attempt = participant.attempt_count;
        let answer_key = (
            participant.user_id.clone(),
            question.uid.clone(),
            attempt,
        );
        let previous = session.answers.get(&answer_key).cloned();
        if let Some(previous) = previous
            .as_ref()
            .filter(|previous| previous.submission == input.submission)
        {
            return Ok(AnswerOutcome {
                participant,
                answer: previous.clone(),
                changed: false,
                attempt_finished: false,
            });
        }

        let result = scoring_service::score(&question, &input.submission);
        let points = self.award(result, mode, input.elapsed_ms);
        let now = SystemTime::now();
        let answer = AnswerRecord {
            user_id: participant.user_id.clone(),
            question_uid: question.uid.clone(),
            attempt,
            submission: input.submission,
            credit: result.points,
            is_fully_correct: result.is_fully_correct,
            points,
            elapsed_ms: input.elapsed_ms,
            submitted_at: now,
        };

        let mut updated = participant;
        let previous_points = previous.as_ref().map_or(0, |previous| previous.points);
        updated.replace_award(mode, previous_points, points);

        let answered = session.answered_in_attempt(&updated.user_id, attempt)
            + usize::from(previous.is_none());
        let attempt_finished = mode.is_deferred() && answered >= session.questions.len();
        if attempt_finished {
            updated.finish_attempt(now);
        }

        let answer_field = mode.is_deferred().then_some(attempt);
        let (participant_row, answer_row) = (updated.clone(), answer.clone());
        run_transition(
            &mut session.machine,
            SessionEvent::AnswerApplied,
            None,
            |_| async move {
                self.write_answer(code, answer_field, &answer_row).await?;
                self.write_participant(code, &participant_row).await?;
                Ok(())
            },
        )
        .await?;

        session.answers.insert(answer_key, answer.clone());
        session
            .participants
            .insert(updated.user_id.clone(), updated.clone());

        Ok(AnswerOutcome {
            participant: updated,
            answer,
            changed: true,
            attempt_finished,
        })
    }

    /// Mark the participant's current deferred attempt as finished. Repeated calls no-op.
    pub async fn finish_attempt(
        &self,
        code: &str,
        user_id: &str,
    ) -> Result<Participant, ServiceError> {
        let handle = self.session(code).await?;
        let mut session = handle.lock().await;
        ensure_open(&session)?;
        if !session.play_mode.is_deferred() {
            return Err(ServiceError::InvalidState(
                "only deferred sessions have attempts".into(),
            ));
        }

        let mut participant = session.participants.get(user_id).cloned().ok_or_else(|| {
            ServiceError::NotFound(format!("participant `{user_id}` not in session"))
        })?;
        if participant.completed_at.is_some() {
            return Ok(participant);
        }

        participant.finish_attempt(SystemTime::now());
        self.write_participant(code, &participant).await?;
        session
            .participants
            .insert(participant.user_id.clone(), participant.clone());
        info!(
            code = %code,
            user_id = %user_id,
            attempt = participant.attempt_count,
            "deferred attempt finished"
        );
        Ok(participant)
    }

    /// Move to the next question. Controller only.
    ///
    /// When `expected_index` no longer matches, another call already moved the session and
    /// the current index is returned unchanged.
    pub async fn advance_question(
        &self,
        code: &str,
        actor_id: &str,
        expected_index: Option<usize>,
        duration_ms: Option<u64>,
    ) -> Result<QuestionMove, ServiceError> {
        let handle = self.session(code).await?;
        let mut session = handle.lock().await;
        ensure_controller(&session, actor_id, "advance the question")?;
        ensure_open(&session)?;

        if expected_index.is_some_and(|expected| expected != session.current_question_index) {
            return Ok(QuestionMove {
                index: session.current_question_index,
                moved: false,
                timer: session.timer.clone(),
                projection: session.projection,
            });
        }

        let next = session.current_question_index + 1;
        if next >= session.questions.len() {
            return Err(ServiceError::InvalidState(
                "there is no question after the current one".into(),
            ));
        }
        self.move_to(code, &mut session, next, duration_ms).await
    }

    /// Explicit administrative rewind to `index`. Controller only.
    pub async fn rewind_question(
        &self,
        code: &str,
        actor_id: &str,
        index: usize,
        duration_ms: Option<u64>,
    ) -> Result<QuestionMove, ServiceError> {
        let handle = self.session(code).await?;
        let mut session = handle.lock().await;
        ensure_controller(&session, actor_id, "rewind the question")?;
        ensure_open(&session)?;
        if index >= session.questions.len() {
            return Err(ServiceError::InvalidInput(format!(
                "question index {index} is out of range"
            )));
        }
        self.move_to(code, &mut session, index, duration_ms).await
    }

    async fn move_to(
        &self,
        code: &str,
        session: &mut LiveSession,
        index: usize,
        duration_ms: Option<u64>,
    ) -> Result<QuestionMove, ServiceError> {
        let timer = session
            .questions
            .get(index)
            .map(|question| open_timer(question, duration_ms));
        let projection = ProjectionState {
            show_stats: false,
            show_correct_answers: false,
            updated_at_ms: Some(unix_millis(SystemTime::now())),
        };
        let mut record = session.to_record();
        record.current_question_index = index;
        record.timer = timer.clone();
        record.answers_locked = false;

        run_transition(
            &mut session.machine,
            SessionEvent::AdvanceQuestion,
            None,
            |next| async move {
                record.status = next;
                self.write_state(&record).await?;
                self.write_projection(code, &projection).await?;
                Ok(())
            },
        )
        .await?;

        session.current_question_index = index;
        session.timer = timer.clone();
        session.answers_locked = false;
        session.projection = projection;
        info!(code = %code, index, "question opened");
        Ok(QuestionMove {
            index,
            moved: true,
            timer,
            projection,
        })
    }

    /// Flush final results to the durable store and close the session. Controller only.
    ///
    /// Safe to repeat: once the durable store holds the session, later calls return the
    /// stored rows flagged as already persisted, even after the cached state expired.
    /// A completed session leaves the arena; later reads rebuild it from the cache.
    pub async fn complete_session(
        &self,
        code: &str,
        actor_id: &str,
    ) -> Result<FinalResults, ServiceError> {
        let handle = match self.session(code).await {
            Ok(handle) => handle,
            Err(ServiceError::NotFound(message)) => {
                return self
                    .persisted_results(code, actor_id)
                    .await?
                    .ok_or(ServiceError::NotFound(message));
            }
            Err(err) => return Err(err),
        };
        let mut session = handle.lock().await;
        ensure_controller(&session, actor_id, "complete the session")?;

        if let Some(results) = self.persisted_results(code, actor_id).await? {
            if session.phase() != SessionPhase::Completed {
                session.machine = SessionStateMachine::resume(SessionPhase::Completed);
                self.evict_completed(&session).await;
            }
            return Ok(results);
        }
        let store = self.durable.require().await?;

        let completed_at = SystemTime::now();
        let session_row = SessionRecordEntity {
            id: Uuid::new_v4(),
            access_code: session.access_code.clone(),
            play_mode: session.play_mode,
            controller_id: session.controller_id.clone(),
            question_count: u32::try_from(session.questions.len()).unwrap_or(u32::MAX),
            created_at: session.created_at,
            completed_at,
        };
        let participants: Vec<ParticipantRecordEntity> = session
            .participants
            .values()
            .map(|participant| participant_row(participant, completed_at))
            .collect();
        let rows = participants.clone();

        run_transition(
            &mut session.machine,
            SessionEvent::Complete,
            Some(self.config.transition_timeout),
            |_| async move {
                store
                    .record_session(session_row, rows)
                    .await
                    .map_err(ServiceError::from)
            },
        )
        .await?;

        session.timer = None;
        for participant in session.participants.values_mut() {
            participant.completed_at.get_or_insert(completed_at);
        }
        self.evict_completed(&session).await;

        info!(
            code = %code,
            participants = participants.len(),
            "session completed and persisted"
        );
        Ok(FinalResults {
            access_code: code.to_owned(),
            play_mode: session.play_mode,
            completed_at,
            participants,
            already_persisted: false,
        })
    }

    /// Record a presence change. Users who never joined are ignored. Last writer wins.
    pub async fn set_connection_status(
        &self,
        code: &str,
        user_id: &str,
        status: ConnectionStatus,
    ) -> Result<Option<Participant>, ServiceError> {
        let handle = self.session(code).await?;
        let mut session = handle.lock().await;
        let Some(mut participant) = session.participants.get(user_id).cloned() else {
            return Ok(None);
        };
        if participant.connection_status == status {
            return Ok(Some(participant));
        }

        participant.connection_status = status;
        self.write_participant(code, &participant).await?;
        session
            .participants
            .insert(participant.user_id.clone(), participant.clone());
        Ok(Some(participant))
    }

    /// Set one projection toggle, leaving the other untouched. Controller only.
    pub async fn set_projection_flag(
        &self,
        code: &str,
        actor_id: &str,
        flag: ProjectionFlag,
        value: bool,
    ) -> Result<ProjectionState, ServiceError> {
        let handle = self.session(code).await?;
        let mut session = handle.lock().await;
        ensure_controller(&session, actor_id, "change the projection")?;

        let updated_at = unix_millis(SystemTime::now());
        let key = keys::projection(code);
        self.cache
            .hset(&key, flag.field(), encode(&key, &value)?)
            .await?;
        self.cache
            .hset(&key, PROJECTION_UPDATED_AT_FIELD, encode(&key, &updated_at)?)
            .await?;
        self.cache.expire(&key, self.config.snapshot_ttl).await?;

        match flag {
            ProjectionFlag::ShowStats => session.projection.show_stats = value,
            ProjectionFlag::ShowCorrectAnswers => session.projection.show_correct_answers = value,
        }
        session.projection.updated_at_ms = Some(updated_at);
        Ok(session.projection)
    }

    /// Close or reopen the current question to new answers. Controller only, live modes only.
    pub async fn set_answers_locked(
        &self,
        code: &str,
        actor_id: &str,
        locked: bool,
    ) -> Result<bool, ServiceError> {
        let handle = self.session(code).await?;
        let mut session = handle.lock().await;
        ensure_controller(&session, actor_id, "lock answers")?;
        ensure_live_question(&session)?;
        if session.answers_locked == locked {
            return Ok(locked);
        }

        let mut record = session.to_record();
        record.answers_locked = locked;
        self.write_state(&record).await?;
        session.answers_locked = locked;
        info!(code = %code, locked, "answer lock changed");
        Ok(locked)
    }

    /// Freeze the current question timer. Pausing a paused timer no-ops. Controller only.
    pub async fn pause_timer(
        &self,
        code: &str,
        actor_id: &str,
    ) -> Result<QuestionTimer, ServiceError> {
        self.update_timer(code, actor_id, "pause the timer", QuestionTimer::pause)
            .await
    }

    /// Restart the current question timer; the paused span is not counted. Controller only.
    pub async fn resume_timer(
        &self,
        code: &str,
        actor_id: &str,
    ) -> Result<QuestionTimer, ServiceError> {
        self.update_timer(code, actor_id, "resume the timer", QuestionTimer::resume)
            .await
    }

    async fn update_timer(
        &self,
        code: &str,
        actor_id: &str,
        action: &str,
        change: fn(&mut QuestionTimer, u64),
    ) -> Result<QuestionTimer, ServiceError> {
        let handle = self.session(code).await?;
        let mut session = handle.lock().await;
        ensure_controller(&session, actor_id, action)?;
        ensure_live_question(&session)?;
        let mut timer = session
            .timer
            .clone()
            .ok_or_else(|| ServiceError::InvalidState("no question timer is running".into()))?;

        change(&mut timer, unix_millis(SystemTime::now()));
        if session.timer.as_ref() == Some(&timer) {
            return Ok(timer);
        }

        let mut record = session.to_record();
        record.timer = Some(timer.clone());
        self.write_state(&record).await?;
        session.timer = Some(timer.clone());
        info!(code = %code, paused = timer.is_paused(), "question timer changed");
        Ok(timer)
    }

    /// Answer distribution of `question_uid`, or of the current question when absent.
    pub async fn answer_stats(
        &self,
        code: &str,
        question_uid: Option<&str>,
    ) -> Result<AnswerStats, ServiceError> {
        self.read(code, |session| {
            let question = match question_uid {
                Some(uid) => session.question(uid),
                None => session.current_question(),
            };
            question
                .map(|question| session.answer_stats(question))
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "question `{}` not in session",
                        question_uid.unwrap_or_default()
                    ))
                })
        })
        .await?
    }

    /// Current projection toggles.
    pub async fn projection(&self, code: &str) -> Result<ProjectionState, ServiceError> {
        self.read(code, |session| session.projection).await
    }

    /// Public view of the session.
    pub async fn summary(&self, code: &str) -> Result<SessionSummary, ServiceError> {
        self.read(code, |session| SessionSummary::from(session)).await
    }

    /// Run `view` against the current state of `code`.
    pub async fn read<R>(
        &self,
        code: &str,
        view: impl FnOnce(&LiveSession) -> R,
    ) -> Result<R, ServiceError> {
        let handle = self.session(code).await?;
        let session = handle.lock().await;
        Ok(view(&session))
    }

    /// Replace the student-visible snapshot with `build(session)`. Controller only.
    pub async fn replace_snapshot(
        &self,
        code: &str,
        actor_id: &str,
        build: impl FnOnce(&LiveSession) -> Vec<LeaderboardEntry>,
    ) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        let handle = self.session(code).await?;
        let mut session = handle.lock().await;
        ensure_controller(&session, actor_id, "reveal the leaderboard")?;

        let snapshot = build(&session);
        self.write_json(&keys::leaderboard_snapshot(code), &snapshot)
            .await?;
        session.revealed = Some(snapshot.clone());
        info!(code = %code, entries = snapshot.len(), "leaderboard revealed");
        Ok(snapshot)
    }

    /// Session handle from the arena, rebuilt from the ephemeral store on a miss.
    async fn session(&self, code: &str) -> Result<SessionHandle, ServiceError> {
        if let Some(handle) = self.arena.get(code) {
            return Ok(Arc::clone(handle.value()));
        }

        let session = self.rehydrate(code).await?;
        if session.phase() == SessionPhase::Completed {
            // completed sessions are served from the cache and never re-enter the arena
            return Ok(Arc::new(Mutex::new(session)));
        }
        let handle = Arc::clone(
            self.arena
                .entry(code.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(session)))
                .value(),
        );
        Ok(handle)
    }

    async fn rehydrate(&self, code: &str) -> Result<LiveSession, ServiceError> {
        let cache = self.cache.as_ref();
        let record: SessionStateRecord = get_json(cache, &keys::state(code))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session `{code}` not found")))?;
        let mut session = LiveSession::from_record(record);

        let join_order: Vec<String> = get_json(cache, &keys::join_order(code))
            .await?
            .unwrap_or_default();
        let mut participants: Vec<Participant> = hgetall_json(cache, &keys::participants(code))
            .await?
            .into_values()
            .collect();
        participants.sort_by_key(|participant| {
            let position = join_order
                .iter()
                .position(|user_id| *user_id == participant.user_id)
                .unwrap_or(usize::MAX);
            (position, participant.join_sequence)
        });

        let attempts: Vec<Option<u32>> = if session.play_mode.is_deferred() {
            let latest = participants
                .iter()
                .map(|participant| participant.attempt_count)
                .max()
                .unwrap_or(0);
            (1..=latest).map(Some).collect()
        } else {
            vec![None]
        };
        for question in &session.questions {
            for attempt in &attempts {
                let answers: HashMap<String, AnswerRecord> =
                    hgetall_json(cache, &keys::answers(code, &question.uid, *attempt)).await?;
                for answer in answers.into_values() {
                    session.answers.insert(
                        (
                            answer.user_id.clone(),
                            answer.question_uid.clone(),
                            answer.attempt,
                        ),
                        answer,
                    );
                }
            }
        }

        session.participants = participants
            .into_iter()
            .map(|participant| (participant.user_id.clone(), participant))
            .collect();
        session.revealed = get_json(cache, &keys::leaderboard_snapshot(code)).await?;
        session.projection = self.read_projection(code).await?;

        info!(
            code = %code,
            participants = session.participants.len(),
            answers = session.answers.len(),
            "session rehydrated from cache"
        );
        Ok(session)
    }

    async fn read_projection(&self, code: &str) -> StorageResult<ProjectionState> {
        let key = keys::projection(code);
        let fields = self.cache.hgetall(&key).await?;
        let flag = |flag: ProjectionFlag| -> StorageResult<bool> {
            fields
                .get(flag.field())
                .map(|raw| decode::<bool>(&key, raw))
                .transpose()
                .map(Option::unwrap_or_default)
        };

        Ok(ProjectionState {
            show_stats: flag(ProjectionFlag::ShowStats)?,
            show_correct_answers: flag(ProjectionFlag::ShowCorrectAnswers)?,
            updated_at_ms: fields
                .get(PROJECTION_UPDATED_AT_FIELD)
                .map(|raw| decode(&key, raw))
                .transpose()?,
        })
    }

    fn resolve_questions(
        &self,
        uids: &[String],
        inline: Vec<Question>,
    ) -> Result<Vec<Question>, ServiceError> {
        let mut pool = uids
            .iter()
            .map(|uid| {
                self.questions
                    .get(uid)
                    .cloned()
                    .ok_or_else(|| ServiceError::InvalidInput(format!("unknown question `{uid}`")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        pool.extend(inline);

        if pool.is_empty() {
            return Err(ServiceError::InvalidInput(
                "a session needs at least one question".into(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = pool.iter().find(|question| !seen.insert(question.uid.as_str())) {
            return Err(ServiceError::InvalidInput(format!(
                "question `{}` appears twice",
                duplicate.uid
            )));
        }
        Ok(pool)
    }

    async fn code_in_use(&self, code: &str) -> Result<bool, ServiceError> {
        if self.arena.contains_key(code) || self.cache.get(&keys::state(code)).await?.is_some() {
            return Ok(true);
        }
        match self.durable.get().await {
            Some(store) => Ok(store.find_session(code.to_owned()).await?.is_some()),
            None => Ok(false),
        }
    }

    async fn fresh_access_code(&self) -> Result<String, ServiceError> {
        for _ in 0..ACCESS_CODE_ATTEMPTS {
            let code = generate_access_code();
            if !self.code_in_use(&code).await? {
                return Ok(code);
            }
        }
        Err(ServiceError::InvalidState(
            "could not allocate a free access code".into(),
        ))
    }

    /// Session points for a scored answer: base score scaled by credit, minus the time penalty.
    fn award(&self, result: ScoreResult, mode: PlayMode, elapsed_ms: u64) -> i64 {
        if result.points == 0 {
            return 0;
        }
        let base = (self.config.base_score as f64 * f64::from(result.points) / 100.0).round() as i64;
        let penalty = if mode.is_timed() {
            self.config.time_penalty(elapsed_ms)
        } else {
            0
        };
        base.saturating_sub(penalty).max(0)
    }

    /// Stored results of `code`, if the durable store already holds them.
    async fn persisted_results(
        &self,
        code: &str,
        actor_id: &str,
    ) -> Result<Option<FinalResults>, ServiceError> {
        let store = self.durable.require().await?;
        let Some(existing) = store.find_session(code.to_owned()).await? else {
            return Ok(None);
        };
        if existing.controller_id != actor_id {
            return Err(ServiceError::Unauthorized(
                "only the session controller may complete the session".into(),
            ));
        }
        let participants = store.find_participants(code.to_owned()).await?;
        Ok(Some(FinalResults {
            access_code: existing.access_code,
            play_mode: existing.play_mode,
            completed_at: existing.completed_at,
            participants,
            already_persisted: true,
        }))
    }

    /// Write the completed state through to the cache, then drop the session from the arena.
    /// The session stays in the arena when the cache write fails, so no reader can rebuild
    /// it as still active.
    async fn evict_completed(&self, session: &LiveSession) {
        let code = &session.access_code;
        let mut result = self.write_state(&session.to_record()).await;
        for participant in session.participants.values() {
            if result.is_err() {
                break;
            }
            result = self.write_participant(code, participant).await;
        }
        match result {
            Ok(()) => {
                self.arena.remove(code);
            }
            Err(err) => {
                warn!(code = %code, error = %err, "failed to mark session completed in cache");
            }
        }
    }

    async fn write_state(&self, record: &SessionStateRecord) -> StorageResult<()> {
        self.write_json(&keys::state(&record.access_code), record)
            .await
    }

    async fn write_participant(&self, code: &str, participant: &Participant) -> StorageResult<()> {
        self.write_field(&keys::participants(code), &participant.user_id, participant)
            .await
    }

    async fn write_answer(
        &self,
        code: &str,
        attempt: Option<u32>,
        answer: &AnswerRecord,
    ) -> StorageResult<()> {
        let key = keys::answers(code, &answer.question_uid, attempt);
        self.write_field(&key, &answer.user_id, answer).await
    }

    async fn write_projection(&self, code: &str, projection: &ProjectionState) -> StorageResult<()> {
        let key = keys::projection(code);
        self.cache
            .hset(
                &key,
                ProjectionFlag::ShowStats.field(),
                encode(&key, &projection.show_stats)?,
            )
            .await?;
        self.cache
            .hset(
                &key,
                ProjectionFlag::ShowCorrectAnswers.field(),
                encode(&key, &projection.show_correct_answers)?,
            )
            .await?;
        if let Some(updated_at) = projection.updated_at_ms {
            self.cache
                .hset(&key, PROJECTION_UPDATED_AT_FIELD, encode(&key, &updated_at)?)
                .await?;
        }
        self.cache.expire(&key, self.config.snapshot_ttl).await?;
        Ok(())
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let raw = encode(key, value)?;
        self.cache.set_ex(key, raw, self.config.snapshot_ttl).await
    }

    async fn write_field<T: Serialize>(
        &self,
        key: &str,
        field: &str,
        value: &T,
    ) -> StorageResult<()> {
        let raw = encode(key, value)?;
        self.cache.hset(key, field, raw).await?;
        self.cache.expire(key, self.config.snapshot_ttl).await?;
        Ok(())
    }
}

fn ensure_controller(session: &LiveSession, actor_id: &str, action: &str) -> Result<(), ServiceError> {
    if session.is_controller(actor_id) {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(format!(
            "only the session controller may {action}"
        )))
    }
}

fn ensure_open(session: &LiveSession) -> Result<(), ServiceError> {
    if session.phase() == SessionPhase::Completed {
        return Err(ServiceError::StaleOperation(format!(
            "session `{}` is already completed",
            session.access_code
        )));
    }
    Ok(())
}

fn ensure_live_question(session: &LiveSession) -> Result<(), ServiceError> {
    if session.play_mode.is_deferred() || session.phase() != SessionPhase::Active {
        return Err(ServiceError::InvalidState(
            "no question is open for the whole room".into(),
        ));
    }
    Ok(())
}

fn open_timer(question: &Question, duration_ms: Option<u64>) -> QuestionTimer {
    QuestionTimer {
        question_uid: question.uid.clone(),
        started_at_ms: unix_millis(SystemTime::now()),
        duration_ms,
        paused_at_ms: None,
    }
}

fn participant_row(participant: &Participant, completed_at: SystemTime) -> ParticipantRecordEntity {
    ParticipantRecordEntity {
        id: Uuid::new_v4(),
        access_code: participant.session_code.clone(),
        user_id: participant.user_id.clone(),
        cookie_id: participant.cookie_id.clone(),
        display_name: participant.display_name.clone(),
        live_score: participant.live_score,
        deferred_score: participant.score(PlayMode::Deferred),
        attempt_count: participant.attempt_count,
        joined_at: participant.joined_at,
        completed_at: participant.completed_at.unwrap_or(completed_at),
    }
}

fn generate_access_code() -> String {
    let mut rng = rand::rng();
    (0..ACCESS_CODE_LEN)
        .map(|_| char::from(ACCESS_CODE_ALPHABET[rng.random_range(0..ACCESS_CODE_ALPHABET.len())]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::{cache::MemoryStore, result_store::MemoryResultStore},
        state::question::QuestionKind,
    };

    fn choice(uid: &str, correct: &str) -> Question {
        Question {
            uid: uid.into(),
            kind: QuestionKind::SingleChoice {
                options: vec!["a".into(), "b".into(), "c".into()],
                correct: correct.into(),
            },
            discipline: None,
            grade_level: None,
            themes: vec![],
        }
    }

    fn pick(option: &str) -> Submission {
        Submission::Choice {
            selected: vec![option.into()],
        }
    }

    struct Harness {
        cache: Arc<MemoryStore>,
        durable: Arc<DurableSlot>,
        manager: SessionStateManager,
    }

    impl Harness {
        async fn new() -> Self {
            let cache = Arc::new(MemoryStore::new());
            let durable = Arc::new(DurableSlot::new());
            durable.install(Arc::new(MemoryResultStore::new())).await;
            let manager = Self::manager_over(cache.clone(), durable.clone());
            Self {
                cache,
                durable,
                manager,
            }
        }

        fn manager_over(cache: Arc<MemoryStore>, durable: Arc<DurableSlot>) -> SessionStateManager {
            let bank = QuestionBank::new(vec![choice("q1", "a"), choice("q2", "b"), choice("q3", "c")]);
            SessionStateManager::new(
                cache,
                durable,
                Arc::new(AppConfig::default()),
                Arc::new(bank),
            )
        }

        async fn session(&self, mode: PlayMode) -> String {
            self.manager
                .create_session(NewSession {
                    access_code: Some("ABC123".into()),
                    play_mode: mode,
                    controller_id: "teacher".into(),
                    question_uids: vec!["q1".into(), "q2".into()],
                    questions: vec![],
                })
                .await
                .unwrap()
                .access_code
        }

        async fn join(&self, code: &str, user: &str) -> JoinOutcome {
            self.manager
                .join(
                    code,
                    JoinRequest {
                        user_id: user.into(),
                        display_name: user.to_uppercase(),
                        cookie_id: None,
                    },
                )
                .await
                .unwrap()
        }

        async fn answer(&self, code: &str, user: &str, question: &str, option: &str) -> AnswerOutcome {
            self.manager
                .apply_answer(
                    code,
                    AnswerInput {
                        user_id: user.into(),
                        question_uid: question.into(),
                        submission: pick(option),
                        elapsed_ms: 1_500,
                    },
                )
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn duplicate_answers_never_double_count() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Quiz).await;
        h.join(&code, "u1").await;
        h.manager.start_session(&code, "teacher").await.unwrap();

        let first = h.answer(&code, "u1", "q1", "a").await;
        assert!(first.changed);
        assert_eq!(first.answer.points, 985);
        assert_eq!(first.participant.live_score, 10 + 985);

        let retry = h.answer(&code, "u1", "q1", "a").await;
        assert!(!retry.changed);
        assert_eq!(retry.participant.live_score, 10 + 985);

        let changed = h.answer(&code, "u1", "q1", "b").await;
        assert!(changed.changed);
        assert_eq!(changed.answer.points, 0);
        assert_eq!(changed.participant.live_score, 10);
    }

    #[tokio::test]
    async fn live_answers_only_target_the_open_question() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Quiz).await;
        h.join(&code, "u1").await;

        let before_start = h
            .manager
            .apply_answer(
                &code,
                AnswerInput {
                    user_id: "u1".into(),
                    question_uid: "q1".into(),
                    submission: pick("a"),
                    elapsed_ms: 0,
                },
            )
            .await;
        assert!(matches!(before_start, Err(ServiceError::InvalidState(_))));

        h.manager.start_session(&code, "teacher").await.unwrap();
        let wrong_question = h
            .manager
            .apply_answer(
                &code,
                AnswerInput {
                    user_id: "u1".into(),
                    question_uid: "q2".into(),
                    submission: pick("b"),
                    elapsed_ms: 0,
                },
            )
            .await;
        assert!(matches!(wrong_question, Err(ServiceError::InvalidState(_))));

        let unknown_user = h
            .manager
            .apply_answer(
                &code,
                AnswerInput {
                    user_id: "ghost".into(),
                    question_uid: "q1".into(),
                    submission: pick("a"),
                    elapsed_ms: 0,
                },
            )
            .await;
        assert!(matches!(unknown_user, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn live_rejoin_keeps_attempt_and_bonus() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Tournament).await;

        let first = h.join(&code, "u1").await;
        let second = h.join(&code, "u2").await;
        assert_eq!((first.join_bonus, second.join_bonus), (10, 9));

        let again = h.join(&code, "u1").await;
        assert!(!again.first_join);
        assert_eq!(again.join_bonus, 0);
        assert_eq!(again.participant.attempt_count, 1);
        assert_eq!(again.participant.live_score, 10);
    }

    #[tokio::test]
    async fn deferred_attempts_count_completed_play_throughs() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Deferred).await;
        h.manager.start_session(&code, "teacher").await.unwrap();

        let mut counts = Vec::new();
        for _ in 0..3 {
            let joined = h.join(&code, "u1").await;
            counts.push(joined.participant.attempt_count);

            // reconnecting mid-attempt is not a new play-through
            let reconnected = h.join(&code, "u1").await;
            assert_eq!(reconnected.participant.attempt_count, joined.participant.attempt_count);

            h.answer(&code, "u1", "q2", "b").await;
            let last = h.answer(&code, "u1", "q1", "a").await;
            assert!(last.attempt_finished);
            // every attempt starts from the join bonus earned on the first join
            assert_eq!(last.participant.deferred_score, 10 + 985 * 2);
        }
        assert_eq!(counts, vec![1, 2, 3]);

        let finished = h.manager.finish_attempt(&code, "u1").await.unwrap();
        assert_eq!(finished.attempt_count, 3);
    }

    #[tokio::test]
    async fn a_weaker_retry_keeps_the_best_deferred_score() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Deferred).await;
        h.manager.start_session(&code, "teacher").await.unwrap();
        h.join(&code, "u1").await;
        h.answer(&code, "u1", "q2", "b").await;
        assert!(h.answer(&code, "u1", "q1", "a").await.attempt_finished);

        let retry = h.join(&code, "u1").await;
        assert!(retry.new_attempt);
        assert_eq!(retry.participant.deferred_score, 10);
        assert_eq!(retry.participant.score(PlayMode::Deferred), 10 + 985 * 2);
        h.answer(&code, "u1", "q1", "b").await;

        let results = h.manager.complete_session(&code, "teacher").await.unwrap();
        assert_eq!(results.participants[0].deferred_score, 10 + 985 * 2);
        assert_eq!(results.participants[0].attempt_count, 2);

        let store = h.durable.require().await.unwrap();
        let rows = store.find_participants(code.clone()).await.unwrap();
        assert_eq!(rows[0].deferred_score, 10 + 985 * 2);
    }

    #[tokio::test]
    async fn answers_after_a_finished_attempt_are_stale() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Deferred).await;
        h.manager.start_session(&code, "teacher").await.unwrap();
        h.join(&code, "u1").await;
        h.manager.finish_attempt(&code, "u1").await.unwrap();

        let result = h
            .manager
            .apply_answer(
                &code,
                AnswerInput {
                    user_id: "u1".into(),
                    question_uid: "q1".into(),
                    submission: pick("a"),
                    elapsed_ms: 0,
                },
            )
            .await;
        assert!(matches!(result, Err(ServiceError::StaleOperation(_))));
    }

    #[tokio::test]
    async fn concurrent_advances_move_exactly_once() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Quiz).await;
        h.manager.start_session(&code, "teacher").await.unwrap();

        let (a, b) = tokio::join!(
            h.manager.advance_question(&code, "teacher", Some(0), None),
            h.manager.advance_question(&code, "teacher", Some(0), None),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!((a.index, b.index), (1, 1));
        assert!(a.moved ^ b.moved);

        let past_end = h.manager.advance_question(&code, "teacher", None, None).await;
        assert!(matches!(past_end, Err(ServiceError::InvalidState(_))));

        let rewound = h.manager.rewind_question(&code, "teacher", 0, Some(20_000)).await.unwrap();
        assert_eq!(rewound.index, 0);
        assert_eq!(rewound.timer.unwrap().duration_ms, Some(20_000));
    }

    #[tokio::test]
    async fn only_the_controller_advances() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Quiz).await;
        h.manager.start_session(&code, "teacher").await.unwrap();

        let result = h.manager.advance_question(&code, "student", None, None).await;
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn completing_twice_writes_one_row_per_user() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Quiz).await;
        h.join(&code, "u1").await;
        h.join(&code, "u2").await;
        h.manager.start_session(&code, "teacher").await.unwrap();
        h.answer(&code, "u1", "q1", "a").await;

        let first = h.manager.complete_session(&code, "teacher").await.unwrap();
        assert!(!first.already_persisted);
        assert_eq!(first.participants.len(), 2);

        let second = h.manager.complete_session(&code, "teacher").await.unwrap();
        assert!(second.already_persisted);

        let store = h.durable.require().await.unwrap();
        let rows = store.find_participants(code.clone()).await.unwrap();
        assert_eq!(rows.len(), 2);

        let late = h
            .manager
            .apply_answer(
                &code,
                AnswerInput {
                    user_id: "u2".into(),
                    question_uid: "q1".into(),
                    submission: pick("a"),
                    elapsed_ms: 0,
                },
            )
            .await;
        assert!(matches!(late, Err(ServiceError::StaleOperation(_))));
    }

    #[tokio::test]
    async fn completed_sessions_leave_the_arena() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Quiz).await;
        h.join(&code, "u1").await;
        h.manager.start_session(&code, "teacher").await.unwrap();
        h.manager.complete_session(&code, "teacher").await.unwrap();

        assert!(!h.manager.arena.contains_key(&code));
        let summary = h.manager.summary(&code).await.unwrap();
        assert_eq!(summary.status, SessionPhase::Completed);
        assert!(!h.manager.arena.contains_key(&code));

        // once the cached state expires, completion is still answered from durable storage
        h.cache.del(&keys::state(&code)).await.unwrap();
        assert!(matches!(
            h.manager.summary(&code).await,
            Err(ServiceError::NotFound(_))
        ));
        let again = h.manager.complete_session(&code, "teacher").await.unwrap();
        assert!(again.already_persisted);
        assert_eq!(again.participants.len(), 1);
        assert!(matches!(
            h.manager.complete_session(&code, "student").await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn locked_answers_and_paused_timers_reject_submissions() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Quiz).await;
        h.join(&code, "u1").await;
        h.join(&code, "u2").await;
        h.manager.start_session(&code, "teacher").await.unwrap();
        h.manager
            .rewind_question(&code, "teacher", 0, Some(30_000))
            .await
            .unwrap();

        assert!(matches!(
            h.manager.set_answers_locked(&code, "u1", true).await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(h.manager.set_answers_locked(&code, "teacher", true).await.unwrap());
        let locked = h
            .manager
            .apply_answer(
                &code,
                AnswerInput {
                    user_id: "u1".into(),
                    question_uid: "q1".into(),
                    submission: pick("a"),
                    elapsed_ms: 0,
                },
            )
            .await;
        assert!(matches!(locked, Err(ServiceError::InvalidState(_))));
        assert!(!h.manager.set_answers_locked(&code, "teacher", false).await.unwrap());

        let paused = h.manager.pause_timer(&code, "teacher").await.unwrap();
        assert!(paused.is_paused());
        assert_eq!(h.manager.pause_timer(&code, "teacher").await.unwrap(), paused);
        let while_paused = h
            .manager
            .apply_answer(
                &code,
                AnswerInput {
                    user_id: "u1".into(),
                    question_uid: "q1".into(),
                    submission: pick("a"),
                    elapsed_ms: 0,
                },
            )
            .await;
        assert!(matches!(while_paused, Err(ServiceError::InvalidState(_))));

        let resumed = h.manager.resume_timer(&code, "teacher").await.unwrap();
        assert!(!resumed.is_paused());
        assert!(resumed.started_at_ms >= paused.started_at_ms);
        assert_eq!(resumed.duration_ms, Some(30_000));
        h.answer(&code, "u1", "q1", "a").await;

        // the lock is per question and survives a restart until the next move
        h.manager.set_answers_locked(&code, "teacher", true).await.unwrap();
        let restarted = Harness::manager_over(h.cache.clone(), h.durable.clone());
        assert!(restarted.read(&code, |session| session.answers_locked).await.unwrap());
        restarted.advance_question(&code, "teacher", None, None).await.unwrap();
        assert!(!restarted.read(&code, |session| session.answers_locked).await.unwrap());
    }

    #[tokio::test]
    async fn answer_stats_follow_changed_answers() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Quiz).await;
        for user in ["u1", "u2", "u3"] {
            h.join(&code, user).await;
        }
        h.manager.start_session(&code, "teacher").await.unwrap();
        h.answer(&code, "u1", "q1", "a").await;
        h.answer(&code, "u2", "q1", "b").await;
        h.answer(&code, "u2", "q1", "a").await;

        let stats = h.manager.answer_stats(&code, None).await.unwrap();
        assert_eq!(stats.question_uid, "q1");
        assert_eq!((stats.total_answers, stats.correct_answers), (2, 2));
        assert_eq!(stats.distribution.get("a"), Some(&2));
        assert_eq!(stats.distribution.get("b"), Some(&0));
        assert_eq!(stats.distribution.get("c"), Some(&0));

        let untouched = h.manager.answer_stats(&code, Some("q2")).await.unwrap();
        assert_eq!(untouched.total_answers, 0);
        assert!(matches!(
            h.manager.answer_stats(&code, Some("missing")).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn completing_while_degraded_keeps_the_session_active() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Quiz).await;
        h.manager.start_session(&code, "teacher").await.unwrap();
        h.durable.clear().await;

        let result = h.manager.complete_session(&code, "teacher").await;
        assert!(matches!(result, Err(ServiceError::Degraded)));
        let phase = h.manager.read(&code, LiveSession::phase).await.unwrap();
        assert_eq!(phase, SessionPhase::Active);
    }

    #[tokio::test]
    async fn sessions_survive_a_restart() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Quiz).await;
        h.join(&code, "u1").await;
        h.join(&code, "u2").await;
        h.manager.start_session(&code, "teacher").await.unwrap();
        h.answer(&code, "u2", "q1", "a").await;
        h.manager
            .set_projection_flag(&code, "teacher", ProjectionFlag::ShowStats, true)
            .await
            .unwrap();

        let restarted = Harness::manager_over(h.cache.clone(), h.durable.clone());
        let (phase, order, score) = restarted
            .read(&code, |session| {
                (
                    session.phase(),
                    session.participants.keys().cloned().collect::<Vec<_>>(),
                    session.participants["u2"].live_score,
                )
            })
            .await
            .unwrap();
        assert_eq!(phase, SessionPhase::Active);
        assert_eq!(order, vec!["u1".to_string(), "u2".to_string()]);
        assert_eq!(score, 9 + 985);
        assert!(restarted.projection(&code).await.unwrap().show_stats);

        // the rebuilt answer index still rejects double counting
        let retry = restarted
            .apply_answer(
                &code,
                AnswerInput {
                    user_id: "u2".into(),
                    question_uid: "q1".into(),
                    submission: pick("a"),
                    elapsed_ms: 1_500,
                },
            )
            .await
            .unwrap();
        assert!(!retry.changed);
    }

    #[tokio::test]
    async fn corrupted_cache_entries_surface_as_corrupted_state() {
        let h = Harness::new().await;
        h.cache
            .set(&keys::state("BROKEN"), "{not json".into())
            .await
            .unwrap();

        let result = h.manager.summary("BROKEN").await;
        assert!(matches!(result, Err(ServiceError::CorruptedState(_))));
        assert!(matches!(
            h.manager.summary("NOPE").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn projection_flags_are_independent_and_reset_on_advance() {
        let h = Harness::new().await;
        let code = h.session(PlayMode::Quiz).await;
        h.manager.start_session(&code, "teacher").await.unwrap();

        let state = h
            .manager
            .set_projection_flag(&code, "teacher", ProjectionFlag::ShowCorrectAnswers, true)
            .await
            .unwrap();
        assert!(state.show_correct_answers);
        assert!(!state.show_stats);
        assert!(state.updated_at_ms.is_some());

        let moved = h.manager.advance_question(&code, "teacher", None, None).await.unwrap();
        assert!(!moved.projection.show_correct_answers);
    }

    #[tokio::test]
    async fn duplicate_codes_and_unknown_questions_are_rejected() {
        let h = Harness::new().await;
        h.session(PlayMode::Quiz).await;

        let duplicate = h
            .manager
            .create_session(NewSession {
                access_code: Some("ABC123".into()),
                play_mode: PlayMode::Quiz,
                controller_id: "teacher".into(),
                question_uids: vec!["q1".into()],
                questions: vec![],
            })
            .await;
        assert!(matches!(duplicate, Err(ServiceError::InvalidState(_))));

        let unknown = h
            .manager
            .create_session(NewSession {
                access_code: None,
                play_mode: PlayMode::Quiz,
                controller_id: "teacher".into(),
                question_uids: vec!["missing".into()],
                questions: vec![],
            })
            .await;
        assert!(matches!(unknown, Err(ServiceError::InvalidInput(_))));

        let generated = h
            .manager
            .create_session(NewSession {
                access_code: None,
                play_mode: PlayMode::Quiz,
                controller_id: "teacher".into(),
                question_uids: vec![],
                questions: vec![choice("inline", "a")],
            })
            .await
            .unwrap();
        assert_eq!(generated.access_code.len(), ACCESS_CODE_LEN);
    }
}
