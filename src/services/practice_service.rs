//! Solo practice runs. Each run is one JSON blob under `practice:{id}` with a TTL; expiry is
//! also enforced lazily on every read through `expiresAt`.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use rand::{Rng, distr::Alphanumeric, rng, seq::SliceRandom};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        cache::{EphemeralStore, encode, get_json, keys},
        models::{ParticipantRecordEntity, SessionRecordEntity},
        storage::StorageError,
    },
    error::ServiceError,
    services::scoring_service,
    state::{
        durable::DurableSlot,
        practice::{
            PracticeAnswer, PracticeSession, PracticeSettings, PracticeStatistics, PracticeStatus,
        },
        question::{Question, QuestionBank, QuestionFilter, QuestionKind, Submission},
        session::{PlayMode, unix_millis},
    },
};

const ID_SUFFIX_LEN: usize = 6;

/// Result of one practice submission.
#[derive(Debug, Clone)]
pub struct PracticeFeedback {
    /// The answer was fully correct.
    pub is_correct: bool,
    /// Points added to the run.
    pub points: i64,
    /// Expected answer, present only when immediate feedback is enabled.
    pub correct_answer: Option<QuestionKind>,
    /// The run after the submission.
    pub session: PracticeSession,
}

/// Result of ending a practice run.
#[derive(Debug, Clone)]
pub struct PracticeEnd {
    /// The finished run.
    pub session: PracticeSession,
    /// Durable records already existed before this call.
    pub already_persisted: bool,
}

type RunLocks = DashMap<String, Arc<Mutex<()>>>;

/// Owner of the practice runs. Mutations of one run are serialized in this process.
pub struct PracticeSessionManager {
    cache: Arc<dyn EphemeralStore>,
    durable: Arc<DurableSlot>,
    config: Arc<AppConfig>,
    questions: Arc<QuestionBank>,
    locks: RunLocks,
}

/// Exclusive access to one run. The lock entry goes away with its last user.
struct RunGuard<'a> {
    locks: &'a RunLocks,
    session_id: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        self.locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl PracticeSessionManager {
    /// Manager over the shared stores.
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
            locks: DashMap::new(),
        }
    }

    async fn lock_run(&self, session_id: &str) -> RunGuard<'_> {
        let lock = self
            .locks
            .entry(session_id.to_owned())
            .or_default()
            .clone();
        RunGuard {
            locks: &self.locks,
            session_id: session_id.to_owned(),
            held: Some(lock.lock_owned().await),
        }
    }

    /// Start a run for `user_id` with a pool drawn from the question bank.
    pub async fn create_session(
        &self,
        user_id: &str,
        cookie_id: Option<String>,
        settings: PracticeSettings,
    ) -> Result<PracticeSession, ServiceError> {
        let question_pool = self.draw_pool(&settings)?;
        let now = SystemTime::now();
        let session = PracticeSession {
            session_id: practice_id(user_id, now),
            user_id: user_id.to_owned(),
            cookie_id,
            settings,
            status: PracticeStatus::Active,
            question_pool,
            current_question_index: 0,
            answers: Vec::new(),
            statistics: PracticeStatistics::default(),
            score: 0,
            created_at: now,
            expires_at: now + self.config.practice_ttl,
            completed_at: None,
            persisted: false,
        };

        self.save(&session).await?;
        info!(
            session_id = %session.session_id,
            user_id = %user_id,
            questions = session.question_pool.len(),
            "practice session created"
        );
        Ok(session)
    }

    /// Read a run. Runs past `expiresAt` are gone.
    pub async fn get_session(&self, session_id: &str) -> Result<PracticeSession, ServiceError> {
        let key = keys::practice(session_id);
        let mut session: PracticeSession = get_json(self.cache.as_ref(), &key)
            .await?
            .ok_or_else(|| not_found(session_id))?;

        if session.is_expired_at(SystemTime::now()) {
            if session.status == PracticeStatus::Active {
                session.status = PracticeStatus::Expired;
            }
            info!(session_id = %session_id, status = ?session.status, "practice session expired");
            if let Err(err) = self.cache.del(&key).await {
                warn!(
                    session_id = %session_id,
                    error = %err,
                    "failed to reclaim expired practice session"
                );
            }
            return Err(not_found(session_id));
        }
        Ok(session)
    }

    /// Score an answer to the current question and move on unless a retry is allowed.
    pub async fn submit_answer(
        &self,
        session_id: &str,
        question_uid: &str,
        submission: Submission,
        time_spent_ms: u64,
    ) -> Result<PracticeFeedback, ServiceError> {
        let _run = self.lock_run(session_id).await;
        let mut session = self.get_session(session_id).await?;
        if session.status != PracticeStatus::Active {
            return Err(ServiceError::StaleOperation(format!(
                "practice session `{session_id}` is no longer active"
            )));
        }
        let question = session
            .current_question()
            .filter(|question| question.uid == question_uid)
            .cloned()
            .ok_or_else(|| {
                ServiceError::InvalidState(format!("question `{question_uid}` is not the current one"))
            })?;

        let result = scoring_service::score(&question, &submission);
        let is_correct = result.is_fully_correct;
        let points = if is_correct {
            self.config.practice_points_per_correct
        } else {
            0
        };
        let attempt_number = session.attempts_on(question_uid) + 1;
        let now = SystemTime::now();

        session
            .statistics
            .record(question_uid, is_correct, time_spent_ms, attempt_number > 1);
        session.answers.push(PracticeAnswer {
            question_uid: question_uid.to_owned(),
            submission,
            is_correct,
            points,
            time_spent_ms,
            attempt_number,
            submitted_at: now,
        });
        session.score = session.score.saturating_add(points);

        if is_correct || !session.settings.allow_retry {
            session.current_question_index += 1;
            if session.current_question_index >= session.question_pool.len() {
                session.status = PracticeStatus::Completed;
                session.completed_at = Some(now);
            }
        }

        self.save(&session).await?;
        let correct_answer = session
            .settings
            .show_immediate_feedback
            .then(|| question.kind.clone());
        Ok(PracticeFeedback {
            is_correct,
            points,
            correct_answer,
            session,
        })
    }

    /// Finish a run and write its durable records once. Repeated calls no-op.
    pub async fn end_session(&self, session_id: &str) -> Result<PracticeEnd, ServiceError> {
        let _run = self.lock_run(session_id).await;
        let mut session = self.get_session(session_id).await?;
        if session.persisted {
            return Ok(PracticeEnd {
                session,
                already_persisted: true,
            });
        }

        if session.status == PracticeStatus::Active {
            session.status = PracticeStatus::Completed;
            session.completed_at = Some(SystemTime::now());
            self.save(&session).await?;
        }

        let store = self.durable.require().await?;
        let (session_row, participant_row) = durable_rows(&session);
        let already_persisted = match store
            .record_session(session_row, vec![participant_row])
            .await
        {
            Ok(()) => false,
            Err(StorageError::Integrity { message }) => {
                // the records were written but the flag update was lost
                if store.find_session(session_id.to_owned()).await?.is_none() {
                    return Err(ServiceError::IntegrityViolation(message));
                }
                warn!(session_id = %session_id, %message, "practice records already stored");
                true
            }
            Err(err) => return Err(err.into()),
        };

        session.persisted = true;
        self.save(&session).await?;
        info!(
            session_id = %session_id,
            score = session.score,
            accuracy = session.statistics.accuracy_percentage,
            "practice session ended"
        );
        Ok(PracticeEnd {
            session,
            already_persisted,
        })
    }

    /// Re-home a guest run under an authenticated user. The guest record is deleted.
    pub async fn upgrade_guest(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<PracticeSession, ServiceError> {
        let _run = self.lock_run(session_id).await;
        let guest = self.get_session(session_id).await?;
        if guest.user_id == user_id {
            return Ok(guest);
        }

        let upgraded = PracticeSession {
            session_id: practice_id(user_id, SystemTime::now()),
            user_id: user_id.to_owned(),
            ..guest
        };
        self.save(&upgraded).await?;

        if let Err(err) = self.cache.del(&keys::practice(session_id)).await {
            // never leave two live records for the same run
            if let Err(rollback) = self.cache.del(&keys::practice(&upgraded.session_id)).await {
                warn!(
                    session_id = %upgraded.session_id,
                    error = %rollback,
                    "failed to roll back upgraded practice session"
                );
            }
            return Err(err.into());
        }

        info!(
            from = %session_id,
            to = %upgraded.session_id,
            user_id = %user_id,
            "practice session upgraded"
        );
        Ok(upgraded)
    }

    /// Remove the ephemeral record. Returns whether one existed.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, ServiceError> {
        let _run = self.lock_run(session_id).await;
        Ok(self.cache.del(&keys::practice(session_id)).await?)
    }

    fn draw_pool(&self, settings: &PracticeSettings) -> Result<Vec<Question>, ServiceError> {
        let mut pool = match &settings.question_uids {
            Some(uids) => uids
                .iter()
                .map(|uid| {
                    self.questions.get(uid).cloned().ok_or_else(|| {
                        ServiceError::InvalidInput(format!("unknown question `{uid}`"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => {
                let mut pool = self.questions.filter(&QuestionFilter {
                    discipline: settings.discipline.as_deref(),
                    grade_level: settings.grade_level.as_deref(),
                    themes: &settings.themes,
                });
                pool.shuffle(&mut rng());
                pool
            }
        };
        if settings.question_count > 0 {
            pool.truncate(settings.question_count);
        }

        if pool.is_empty() {
            return Err(ServiceError::InvalidInput(
                "no question matches the practice settings".into(),
            ));
        }
        Ok(pool)
    }

    /// Write the blob with the TTL left until `expiresAt`.
    async fn save(&self, session: &PracticeSession) -> Result<(), ServiceError> {
        let remaining = session
            .expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return Err(not_found(&session.session_id));
        }

        let key = keys::practice(&session.session_id);
        let raw = encode(&key, session)?;
        self.cache.set_ex(&key, raw, remaining).await?;
        Ok(())
    }
}

fn practice_id(user_id: &str, now: SystemTime) -> String {
    let suffix: String = rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("practice_{user_id}_{}_{suffix}", unix_millis(now))
}

fn not_found(session_id: &str) -> ServiceError {
    ServiceError::NotFound(format!("practice session `{session_id}` not found"))
}

fn durable_rows(session: &PracticeSession) -> (SessionRecordEntity, ParticipantRecordEntity) {
    let completed_at = session.completed_at.unwrap_or_else(SystemTime::now);
    let session_row = SessionRecordEntity {
        id: Uuid::new_v4(),
        access_code: session.session_id.clone(),
        play_mode: PlayMode::Practice,
        controller_id: session.user_id.clone(),
        question_count: u32::try_from(session.question_pool.len()).unwrap_or(u32::MAX),
        created_at: session.created_at,
        completed_at,
    };
    let participant_row = ParticipantRecordEntity {
        id: Uuid::new_v4(),
        access_code: session.session_id.clone(),
        user_id: session.user_id.clone(),
        cookie_id: session.cookie_id.clone(),
        display_name: session.user_id.clone(),
        live_score: session.score,
        deferred_score: 0,
        attempt_count: 1,
        joined_at: session.created_at,
        completed_at,
    };
    (session_row, participant_row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{cache::MemoryStore, models::HistoryOwner, result_store::MemoryResultStore};

    fn question(uid: &str, discipline: &str) -> Question {
        Question {
            uid: uid.into(),
            kind: QuestionKind::SingleChoice {
                options: vec!["a".into(), "b".into()],
                correct: "a".into(),
            },
            discipline: Some(discipline.into()),
            grade_level: None,
            themes: vec![],
        }
    }

    fn pick(option: &str) -> Submission {
        Submission::Choice {
            selected: vec![option.into()],
        }
    }

    fn settings(count: usize, allow_retry: bool) -> PracticeSettings {
        PracticeSettings {
            discipline: Some("math".into()),
            question_count: count,
            show_immediate_feedback: true,
            allow_retry,
            ..PracticeSettings::default()
        }
    }

    async fn manager() -> (PracticeSessionManager, Arc<MemoryStore>, Arc<DurableSlot>) {
        let cache = Arc::new(MemoryStore::new());
        let durable = Arc::new(DurableSlot::new());
        durable.install(Arc::new(MemoryResultStore::new())).await;
        let bank = QuestionBank::new([
            question("m1", "math"),
            question("m2", "math"),
            question("m3", "math"),
            question("f1", "french"),
        ]);
        let manager = PracticeSessionManager::new(
            cache.clone(),
            durable.clone(),
            Arc::new(AppConfig::default()),
            Arc::new(bank),
        );
        (manager, cache, durable)
    }

    async fn answer_current(
        manager: &PracticeSessionManager,
        session: &PracticeSession,
        option: &str,
    ) -> PracticeFeedback {
        let uid = session.current_question().unwrap().uid.clone();
        manager
            .submit_answer(&session.session_id, &uid, pick(option), 2_000)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn pool_is_filtered_and_truncated() {
        let (manager, _, _) = manager().await;
        let session = manager
            .create_session("u1", None, settings(2, false))
            .await
            .unwrap();

        assert!(session.session_id.starts_with("practice_u1_"));
        assert_eq!(session.question_pool.len(), 2);
        assert!(
            session
                .question_pool
                .iter()
                .all(|q| q.discipline.as_deref() == Some("math"))
        );

        let empty = manager
            .create_session(
                "u1",
                None,
                PracticeSettings {
                    discipline: Some("history".into()),
                    ..settings(2, false)
                },
            )
            .await;
        assert!(matches!(empty, Err(ServiceError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn retries_keep_the_question_and_count_attempts() {
        let (manager, _, _) = manager().await;
        let session = manager
            .create_session("u1", None, settings(1, true))
            .await
            .unwrap();

        let wrong = answer_current(&manager, &session, "b").await;
        assert!(!wrong.is_correct);
        assert_eq!(wrong.session.current_question_index, 0);
        assert!(wrong.correct_answer.is_some());

        let right = answer_current(&manager, &wrong.session, "a").await;
        assert!(right.is_correct);
        assert_eq!(right.points, 10);
        assert_eq!(right.session.answers[1].attempt_number, 2);
        assert_eq!(right.session.status, PracticeStatus::Completed);

        let stats = &right.session.statistics;
        assert_eq!((stats.correct_answers, stats.incorrect_answers), (1, 1));
        assert_eq!(stats.accuracy_percentage, 50);
        assert_eq!(stats.retried_questions.len(), 1);

        let late = manager
            .submit_answer(&session.session_id, "m1", pick("a"), 0)
            .await;
        assert!(matches!(late, Err(ServiceError::StaleOperation(_))));
    }

    #[tokio::test]
    async fn without_retry_wrong_answers_advance() {
        let (manager, _, _) = manager().await;
        let session = manager
            .create_session("u1", None, settings(2, false))
            .await
            .unwrap();

        let wrong = answer_current(&manager, &session, "b").await;
        assert_eq!(wrong.session.current_question_index, 1);
        assert_eq!(wrong.session.status, PracticeStatus::Active);
    }

    #[tokio::test]
    async fn expired_sessions_read_as_not_found() {
        let (manager, cache, _) = manager().await;
        let mut session = manager
            .create_session("u1", None, settings(1, false))
            .await
            .unwrap();
        session.expires_at = SystemTime::now() - Duration::from_secs(1);
        let key = keys::practice(&session.session_id);
        cache
            .set(&key, serde_json::to_string(&session).unwrap())
            .await
            .unwrap();

        let result = manager.get_session(&session.session_id).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ending_twice_writes_one_record() {
        let (manager, _, durable) = manager().await;
        let session = manager
            .create_session("guest-1", Some("cookie-1".into()), settings(2, false))
            .await
            .unwrap();
        answer_current(&manager, &session, "a").await;

        let first = manager.end_session(&session.session_id).await.unwrap();
        assert!(!first.already_persisted);
        assert_eq!(first.session.status, PracticeStatus::Completed);

        let second = manager.end_session(&session.session_id).await.unwrap();
        assert!(second.already_persisted);

        let store = durable.require().await.unwrap();
        let history = store
            .list_history(HistoryOwner::Cookie("cookie-1".into()), None)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].participant.live_score, 10);
    }

    #[tokio::test]
    async fn ending_while_degraded_can_be_retried() {
        let (manager, _, durable) = manager().await;
        let session = manager
            .create_session("u1", None, settings(1, false))
            .await
            .unwrap();
        durable.clear().await;

        let degraded = manager.end_session(&session.session_id).await;
        assert!(matches!(degraded, Err(ServiceError::Degraded)));

        durable.install(Arc::new(MemoryResultStore::new())).await;
        let ended = manager.end_session(&session.session_id).await.unwrap();
        assert!(!ended.already_persisted);
        assert!(ended.session.persisted);
    }

    #[tokio::test]
    async fn upgrade_moves_the_run_and_deletes_the_guest_record() {
        let (manager, _, _) = manager().await;
        let guest = manager
            .create_session("guest-1", None, settings(2, false))
            .await
            .unwrap();
        let progressed = answer_current(&manager, &guest, "a").await.session;

        let upgraded = manager
            .upgrade_guest(&guest.session_id, "account-7")
            .await
            .unwrap();
        assert_ne!(upgraded.session_id, guest.session_id);
        assert_eq!(upgraded.user_id, "account-7");
        assert_eq!(upgraded.statistics, progressed.statistics);
        assert_eq!(upgraded.current_question_index, 1);

        assert!(matches!(
            manager.get_session(&guest.session_id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(manager.get_session(&upgraded.session_id).await.is_ok());
        assert!(manager.delete_session(&upgraded.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_submissions_to_one_question_count_once() {
        let (manager, _, _) = manager().await;
        let session = manager
            .create_session("u1", None, settings(2, false))
            .await
            .unwrap();
        let uid = session.current_question().unwrap().uid.clone();

        let (a, b) = tokio::join!(
            manager.submit_answer(&session.session_id, &uid, pick("a"), 1_000),
            manager.submit_answer(&session.session_id, &uid, pick("b"), 1_000),
        );
        assert!(a.is_ok() ^ b.is_ok());
        assert!(matches!(
            a.err().or(b.err()),
            Some(ServiceError::InvalidState(_))
        ));

        let stored = manager.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.answers.len(), 1);
        assert_eq!(stored.current_question_index, 1);
        assert!(manager.locks.is_empty());
    }

    #[tokio::test]
    async fn ending_races_with_a_submission_without_losing_the_persisted_flag() {
        let (manager, _, durable) = manager().await;
        let session = manager
            .create_session("u1", None, settings(2, false))
            .await
            .unwrap();
        let uid = session.current_question().unwrap().uid.clone();

        let (submitted, ended) = tokio::join!(
            manager.submit_answer(&session.session_id, &uid, pick("a"), 1_000),
            manager.end_session(&session.session_id),
        );
        let ended = ended.unwrap();
        if let Err(err) = submitted {
            assert!(matches!(err, ServiceError::StaleOperation(_)));
        }

        let stored = manager.get_session(&session.session_id).await.unwrap();
        assert!(stored.persisted);
        assert_eq!(stored.status, PracticeStatus::Completed);
        assert_eq!(stored.score, ended.session.score);

        let store = durable.require().await.unwrap();
        let rows = store
            .find_participants(session.session_id.clone())
            .await
            .unwrap();
        assert_eq!(rows[0].live_score, stored.score);
    }
}
