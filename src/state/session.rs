use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::{
    question::{Question, QuestionKind, Submission},
    state_machine::{SessionPhase, SessionStateMachine},
};

/// How a session is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    /// Synchronous classroom quiz driven by a teacher.
    Quiz,
    /// Synchronous tournament.
    Tournament,
    /// Asynchronous tournament each participant plays at their own pace.
    Deferred,
    /// Solo practice outside any multi-participant session.
    Practice,
}

impl PlayMode {
    /// True for asynchronous play where every participant has their own attempts.
    pub fn is_deferred(self) -> bool {
        matches!(self, PlayMode::Deferred)
    }

    /// True when the time penalty applies to awarded points.
    pub fn is_timed(self) -> bool {
        !matches!(self, PlayMode::Practice)
    }

    /// Serialized name, as stored in durable records.
    pub fn as_str(self) -> &'static str {
        match self {
            PlayMode::Quiz => "quiz",
            PlayMode::Tournament => "tournament",
            PlayMode::Deferred => "deferred",
            PlayMode::Practice => "practice",
        }
    }
}

/// Milliseconds since the Unix epoch, saturating at the bounds.
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Who is looking at a session. Decides which leaderboard is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// A participant. Only ever sees the revealed snapshot.
    Student,
    /// The session controller.
    Teacher,
    /// The shared classroom display.
    Projector,
}

impl Audience {
    /// True for viewers allowed to see live scores.
    pub fn is_privileged(self) -> bool {
        !matches!(self, Audience::Student)
    }
}

/// Whether a participant currently has at least one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// At least one live connection.
    Online,
    /// No live connection.
    Offline,
}

/// One user's membership in one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Identifier of the user, unique within the session.
    pub user_id: String,
    /// Access code of the session the user joined.
    pub session_code: String,
    /// Name shown on leaderboards; refreshed on every join.
    pub display_name: String,
    /// Guest identifier, used to find history for users without an account.
    #[serde(default)]
    pub cookie_id: Option<String>,
    /// Score of synchronous play, including the join bonus.
    pub live_score: i64,
    /// Score of the current deferred attempt, including the join bonus.
    pub deferred_score: i64,
    /// Best deferred score over the finished attempts.
    #[serde(default)]
    pub best_deferred_score: i64,
    /// One-off bonus granted on first join. It belongs to the participant, so every
    /// deferred attempt starts from it.
    #[serde(default)]
    pub join_bonus: i64,
    /// Number of play-throughs; only deferred sessions go past 1.
    pub attempt_count: u32,
    /// Advisory presence flag, last writer wins.
    pub connection_status: ConnectionStatus,
    /// First join time, the primary tie-breaker.
    pub joined_at: SystemTime,
    /// Position in the session join order, used to break score ties.
    pub join_sequence: u64,
    /// Set when the current deferred attempt (or the session) is finished.
    #[serde(default)]
    pub completed_at: Option<SystemTime>,
}

impl Participant {
    /// Score that counts for ranking and for the durable record in the given mode.
    ///
    /// Deferred play keeps the best attempt, so starting a new one never lowers it.
    pub fn score(&self, mode: PlayMode) -> i64 {
        if mode.is_deferred() {
            self.deferred_score.max(self.best_deferred_score)
        } else {
            self.live_score
        }
    }

    fn score_mut(&mut self, mode: PlayMode) -> &mut i64 {
        if mode.is_deferred() {
            &mut self.deferred_score
        } else {
            &mut self.live_score
        }
    }

    /// Replace a previously awarded amount with a new one, never summing both.
    pub fn replace_award(&mut self, mode: PlayMode, previous: i64, next: i64) {
        let score = self.score_mut(mode);
        *score = score.saturating_sub(previous).saturating_add(next);
    }

    /// Close the current deferred attempt at `at`, keeping its score if it is the best so far.
    pub fn finish_attempt(&mut self, at: SystemTime) {
        self.best_deferred_score = self.best_deferred_score.max(self.deferred_score);
        self.completed_at = Some(at);
    }

    /// Open the next deferred attempt. Its score restarts from the join bonus.
    pub fn start_attempt(&mut self) {
        self.best_deferred_score = self.best_deferred_score.max(self.deferred_score);
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.deferred_score = self.join_bonus;
        self.completed_at = None;
    }
}

/// Advisory timer of the current question. Expiry is enforced by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionTimer {
    /// Question the timer belongs to.
    pub question_uid: String,
    /// Unix milliseconds at which the question was opened, shifted forward by every pause.
    pub started_at_ms: u64,
    /// Time allowed for the question; open-ended when absent.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Unix milliseconds at which the timer was paused, absent while running.
    #[serde(default)]
    pub paused_at_ms: Option<u64>,
}

impl QuestionTimer {
    /// True while the controller holds the timer.
    pub fn is_paused(&self) -> bool {
        self.paused_at_ms.is_some()
    }

    /// Freeze the timer at `now_ms`. Pausing twice keeps the first pause.
    pub fn pause(&mut self, now_ms: u64) {
        self.paused_at_ms.get_or_insert(now_ms);
    }

    /// Restart a paused timer at `now_ms`; the paused span does not count as elapsed.
    pub fn resume(&mut self, now_ms: u64) {
        if let Some(paused_at) = self.paused_at_ms.take() {
            self.started_at_ms = self
                .started_at_ms
                .saturating_add(now_ms.saturating_sub(paused_at));
        }
    }

    /// Milliseconds of running time at `now_ms`.
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        self.paused_at_ms
            .unwrap_or(now_ms)
            .saturating_sub(self.started_at_ms)
    }
}

/// Display toggles of the shared projector view for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionState {
    /// Show the answer distribution of the current question.
    pub show_stats: bool,
    /// Show the expected answer of the current question.
    pub show_correct_answers: bool,
    /// Unix milliseconds of the last change, absent until a flag is set.
    pub updated_at_ms: Option<u64>,
}

/// Individually settable projection toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionFlag {
    /// Toggles [`ProjectionState::show_stats`].
    ShowStats,
    /// Toggles [`ProjectionState::show_correct_answers`].
    ShowCorrectAnswers,
}

impl ProjectionFlag {
    /// Field name inside the projection hash.
    pub fn field(self) -> &'static str {
        match self {
            ProjectionFlag::ShowStats => "showStats",
            ProjectionFlag::ShowCorrectAnswers => "showCorrectAnswers",
        }
    }
}

/// Scored answer kept per (user, question, attempt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Author of the answer.
    pub user_id: String,
    /// Answered question.
    pub question_uid: String,
    /// Attempt the answer belongs to; always 1 outside deferred play.
    pub attempt: u32,
    /// Submission as received.
    pub submission: Submission,
    /// Credit percentage returned by the scoring engine.
    pub credit: u8,
    /// Whether the scoring engine found the answer fully correct.
    pub is_fully_correct: bool,
    /// Points actually added to the participant's score.
    pub points: i64,
    /// Time the participant took, as reported by the client.
    pub elapsed_ms: u64,
    /// Reception time.
    pub submitted_at: SystemTime,
}

/// Distribution of the answers given to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerStats {
    /// Question the statistics describe.
    pub question_uid: String,
    /// Participants who answered.
    pub total_answers: u32,
    /// Answers the scoring engine found fully correct.
    pub correct_answers: u32,
    /// Answers per option for choice questions (every offered option is listed, in order),
    /// or per typed value for numeric questions.
    pub distribution: IndexMap<String, u32>,
}

/// Ranked row of a leaderboard. Never carries connection or cache details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// Ranked user.
    pub user_id: String,
    /// Name shown next to the score.
    pub display_name: String,
    /// Score counted for this board.
    pub score: i64,
    /// Position from 1, without gaps.
    pub rank: u32,
}

/// Serialized form of the session header stored under `session:state:{code}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStateRecord {
    /// Session access code.
    pub access_code: String,
    /// Lifecycle phase.
    pub status: SessionPhase,
    /// How the session is played.
    pub play_mode: PlayMode,
    /// User allowed to drive the session.
    pub controller_id: String,
    /// Index of the open question in `questions`.
    pub current_question_index: usize,
    /// Question pool in play order.
    pub questions: Vec<Question>,
    /// Timer of the open question.
    #[serde(default)]
    pub timer: Option<QuestionTimer>,
    /// Whether the controller closed the open question to new answers.
    #[serde(default)]
    pub answers_locked: bool,
    /// Creation time.
    pub created_at: SystemTime,
}

/// Authoritative in-process representation of one live session.
///
/// Participants are owned by value and keyed by user id; connection mappings live in the
/// presence tracker and only reference users by id.
#[derive(Debug)]
pub struct LiveSession {
    /// Session access code.
    pub access_code: String,
    /// How the session is played.
    pub play_mode: PlayMode,
    /// User allowed to drive the session.
    pub controller_id: String,
    /// Lifecycle of the session.
    pub machine: SessionStateMachine,
    /// Index of the open question in `questions`.
    pub current_question_index: usize,
    /// Question pool in play order.
    pub questions: Vec<Question>,
    /// Timer of the open question.
    pub timer: Option<QuestionTimer>,
    /// Whether the controller closed the open question to new answers.
    pub answers_locked: bool,
    /// Creation time.
    pub created_at: SystemTime,
    /// Participants in join order.
    pub participants: IndexMap<String, Participant>,
    /// Answers keyed by (user, question, attempt).
    pub answers: HashMap<(String, String, u32), AnswerRecord>,
    /// Projector toggles.
    pub projection: ProjectionState,
    /// Student-visible standings, replaced on reveal.
    pub revealed: Option<Vec<LeaderboardEntry>>,
}

impl LiveSession {
    /// Fresh `pending` session.
    pub fn new(
        access_code: String,
        play_mode: PlayMode,
        controller_id: String,
        questions: Vec<Question>,
    ) -> Self {
        Self {
            access_code,
            play_mode,
            controller_id,
            machine: SessionStateMachine::new(),
            current_question_index: 0,
            questions,
            timer: None,
            answers_locked: false,
            created_at: SystemTime::now(),
            participants: IndexMap::new(),
            answers: HashMap::new(),
            projection: ProjectionState::default(),
            revealed: None,
        }
    }

    /// Rebuild a session from its persisted header.
    pub fn from_record(record: SessionStateRecord) -> Self {
        Self {
            access_code: record.access_code,
            play_mode: record.play_mode,
            controller_id: record.controller_id,
            machine: SessionStateMachine::resume(record.status),
            current_question_index: record.current_question_index,
            questions: record.questions,
            timer: record.timer,
            answers_locked: record.answers_locked,
            created_at: record.created_at,
            participants: IndexMap::new(),
            answers: HashMap::new(),
            projection: ProjectionState::default(),
            revealed: None,
        }
    }

    /// Header written under `session:state:{code}`.
    pub fn to_record(&self) -> SessionStateRecord {
        SessionStateRecord {
            access_code: self.access_code.clone(),
            status: self.machine.phase(),
            play_mode: self.play_mode,
            controller_id: self.controller_id.clone(),
            current_question_index: self.current_question_index,
            questions: self.questions.clone(),
            timer: self.timer.clone(),
            answers_locked: self.answers_locked,
            created_at: self.created_at,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.machine.phase()
    }

    /// True when `actor_id` drives the session.
    pub fn is_controller(&self, actor_id: &str) -> bool {
        self.controller_id == actor_id
    }

    /// Question of the pool with the given uid.
    pub fn question(&self, uid: &str) -> Option<&Question> {
        self.questions.iter().find(|question| question.uid == uid)
    }

    /// Question at the current index.
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_question_index)
    }

    /// Number of answers `user_id` gave during `attempt`.
    pub fn answered_in_attempt(&self, user_id: &str, attempt: u32) -> usize {
        self.answers
            .keys()
            .filter(|(user, _, answer_attempt)| user == user_id && *answer_attempt == attempt)
            .count()
    }

    /// Answer distribution of `question`. Each participant counts once, with the answer of
    /// their current attempt.
    pub fn answer_stats(&self, question: &Question) -> AnswerStats {
        let mut distribution: IndexMap<String, u32> = match &question.kind {
            QuestionKind::SingleChoice { options, .. }
            | QuestionKind::MultipleChoice { options, .. } => {
                options.iter().map(|option| (option.clone(), 0)).collect()
            }
            QuestionKind::Numeric { .. } => IndexMap::new(),
        };
        let mut stats = AnswerStats {
            question_uid: question.uid.clone(),
            total_answers: 0,
            correct_answers: 0,
            distribution: IndexMap::new(),
        };

        for participant in self.participants.values() {
            let key = (
                participant.user_id.clone(),
                question.uid.clone(),
                participant.attempt_count,
            );
            let Some(answer) = self.answers.get(&key) else {
                continue;
            };
            stats.total_answers += 1;
            if answer.is_fully_correct {
                stats.correct_answers += 1;
            }
            match &answer.submission {
                Submission::Choice { selected } => {
                    for option in selected {
                        *distribution.entry(option.clone()).or_default() += 1;
                    }
                }
                Submission::Numeric { value } => {
                    *distribution.entry(value.trim().to_owned()).or_default() += 1;
                }
            }
        }
        stats.distribution = distribution;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant() -> Participant {
        Participant {
            user_id: "u1".into(),
            session_code: "ABC".into(),
            display_name: "Ada".into(),
            cookie_id: None,
            live_score: 0,
            deferred_score: 0,
            best_deferred_score: 0,
            join_bonus: 0,
            attempt_count: 1,
            connection_status: ConnectionStatus::Online,
            joined_at: SystemTime::UNIX_EPOCH,
            join_sequence: 0,
            completed_at: None,
        }
    }

    #[test]
    fn replacing_an_award_never_sums() {
        let mut p = participant();
        p.replace_award(PlayMode::Quiz, 0, 900);
        p.replace_award(PlayMode::Quiz, 900, 700);
        assert_eq!(p.live_score, 700);
        assert_eq!(p.deferred_score, 0);
    }

    #[test]
    fn deferred_mode_scores_its_own_counter() {
        let mut p = participant();
        p.live_score = 40;
        p.replace_award(PlayMode::Deferred, 0, 500);
        assert_eq!(p.score(PlayMode::Deferred), 500);
        assert_eq!(p.score(PlayMode::Tournament), 40);
    }

    #[test]
    fn new_attempts_keep_the_best_score_and_the_join_bonus() {
        let mut p = participant();
        p.join_bonus = 10;
        p.replace_award(PlayMode::Deferred, 0, 10);
        p.replace_award(PlayMode::Deferred, 0, 900);
        p.finish_attempt(SystemTime::UNIX_EPOCH);
        assert_eq!(p.best_deferred_score, 910);

        p.start_attempt();
        assert_eq!(p.attempt_count, 2);
        assert_eq!(p.deferred_score, 10);
        assert_eq!(p.completed_at, None);
        assert_eq!(p.score(PlayMode::Deferred), 910);

        p.replace_award(PlayMode::Deferred, 0, 950);
        assert_eq!(p.score(PlayMode::Deferred), 960);
    }

    #[test]
    fn paused_time_does_not_count_as_elapsed() {
        let mut timer = QuestionTimer {
            question_uid: "q1".into(),
            started_at_ms: 1_000,
            duration_ms: Some(20_000),
            paused_at_ms: None,
        };
        timer.pause(4_000);
        timer.pause(6_000);
        assert!(timer.is_paused());
        assert_eq!(timer.elapsed_ms(9_000), 3_000);

        timer.resume(10_000);
        assert!(!timer.is_paused());
        assert_eq!(timer.started_at_ms, 7_000);
        assert_eq!(timer.elapsed_ms(12_000), 5_000);
    }

    #[test]
    fn stats_count_each_participant_once_per_option() {
        let question = Question {
            uid: "q1".into(),
            kind: QuestionKind::MultipleChoice {
                options: vec!["a".into(), "b".into(), "c".into()],
                correct: vec!["a".into(), "b".into()],
            },
            discipline: None,
            grade_level: None,
            themes: vec![],
        };
        let mut session = LiveSession::new(
            "ABC".into(),
            PlayMode::Quiz,
            "teacher".into(),
            vec![question.clone()],
        );
        let answers = [("u1", vec!["a", "b"], true), ("u2", vec!["a", "c"], false)];
        for (user, selected, correct) in answers {
            let mut p = participant();
            p.user_id = user.into();
            session.participants.insert(user.into(), p);
            session.answers.insert(
                (user.into(), "q1".into(), 1),
                AnswerRecord {
                    user_id: user.into(),
                    question_uid: "q1".into(),
                    attempt: 1,
                    submission: Submission::Choice {
                        selected: selected.into_iter().map(String::from).collect(),
                    },
                    credit: if correct { 100 } else { 17 },
                    is_fully_correct: correct,
                    points: 0,
                    elapsed_ms: 0,
                    submitted_at: SystemTime::UNIX_EPOCH,
                },
            );
        }

        let stats = session.answer_stats(&question);
        assert_eq!((stats.total_answers, stats.correct_answers), (2, 1));
        let distribution: Vec<_> = stats.distribution.into_iter().collect();
        assert_eq!(
            distribution,
            vec![("a".to_string(), 2), ("b".to_string(), 1), ("c".to_string(), 1)]
        );
    }

    #[test]
    fn participant_round_trips_through_json() {
        let p = participant();
        let raw = serde_json::to_string(&p).unwrap();
        let back: Participant = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, p);
    }
}
