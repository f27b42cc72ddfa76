//! Ranked, audience-scoped views over a session's participants.
//!
//! Students only ever receive the snapshot promoted by the last reveal; the live board is
//! reserved for the teacher and the projector. The redaction happens here, before entries
//! leave the service, so transports never have to filter.

use std::{cmp::Ordering, sync::Arc};

use crate::{
    error::ServiceError,
    services::session_service::SessionStateManager,
    state::session::{Audience, LeaderboardEntry, LiveSession, Participant, PlayMode},
};

/// Leaderboard views of the sessions held by a [`SessionStateManager`].
pub struct LeaderboardService {
    sessions: Arc<SessionStateManager>,
}

impl LeaderboardService {
    /// Service reading scores from `sessions`.
    pub fn new(sessions: Arc<SessionStateManager>) -> Self {
        Self { sessions }
    }

    /// Leaderboard of `code` as visible to `audience`.
    pub async fn compute(
        &self,
        code: &str,
        audience: Audience,
    ) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        self.sessions
            .read(code, |session| view_for(session, audience))
            .await
    }

    /// Like [`compute`](Self::compute), for callers whose identity is not established by a
    /// connection. Privileged views require `actor_id` to be the session controller.
    pub async fn compute_for(
        &self,
        code: &str,
        audience: Audience,
        actor_id: Option<&str>,
    ) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        self.sessions
            .read(code, |session| {
                let allowed = !audience.is_privileged()
                    || actor_id.is_some_and(|actor| session.is_controller(actor));
                if allowed {
                    Ok(view_for(session, audience))
                } else {
                    Err(ServiceError::Unauthorized(
                        "live scores are reserved to the session controller".into(),
                    ))
                }
            })
            .await?
    }

    /// Promote the live board to the student-visible snapshot. Controller only.
    pub async fn reveal(
        &self,
        code: &str,
        actor_id: &str,
    ) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        self.sessions
            .replace_snapshot(code, actor_id, live_board)
            .await
    }
}

/// Entries of `session` that `audience` may see.
pub fn view_for(session: &LiveSession, audience: Audience) -> Vec<LeaderboardEntry> {
    if audience.is_privileged() {
        live_board(session)
    } else {
        session.revealed.clone().unwrap_or_default()
    }
}

/// Live ranking: score descending, then earliest join.
pub fn live_board(session: &LiveSession) -> Vec<LeaderboardEntry> {
    let mut participants: Vec<&Participant> = session.participants.values().collect();
    participants.sort_by(|a, b| compare(session.play_mode, a, b));

    let mut entries: Vec<LeaderboardEntry> = participants
        .into_iter()
        .map(|participant| entry_for(session.play_mode, participant))
        .collect();
    assign_ranks(&mut entries);
    entries
}

/// Unranked entry of one participant.
pub fn entry_for(mode: PlayMode, participant: &Participant) -> LeaderboardEntry {
    LeaderboardEntry {
        user_id: participant.user_id.clone(),
        display_name: participant.display_name.clone(),
        score: participant.score(mode),
        rank: 0,
    }
}

/// Add a participant who joined after the last reveal to `snapshot`, keeping the other
/// entries' revealed scores. A user already present is left untouched.
pub fn insert_late_joiner(snapshot: &mut Vec<LeaderboardEntry>, entry: LeaderboardEntry) {
    if snapshot.iter().any(|existing| existing.user_id == entry.user_id) {
        return;
    }
    let position = snapshot
        .iter()
        .position(|existing| existing.score < entry.score)
        .unwrap_or(snapshot.len());
    snapshot.insert(position, entry);
    assign_ranks(snapshot);
}

fn compare(mode: PlayMode, a: &Participant, b: &Participant) -> Ordering {
    b.score(mode)
        .cmp(&a.score(mode))
        .then_with(|| a.joined_at.cmp(&b.joined_at))
        .then_with(|| a.join_sequence.cmp(&b.join_sequence))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

fn assign_ranks(entries: &mut [LeaderboardEntry]) {
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.rank = u32::try_from(index + 1).unwrap_or(u32::MAX);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::cache::MemoryStore,
        services::session_service::NewSession,
        state::{
            durable::DurableSlot,
            question::{Question, QuestionBank, QuestionKind},
            session::ConnectionStatus,
        },
    };

    fn participant(user: &str, score: i64, joined_secs: u64, sequence: u64) -> Participant {
        Participant {
            user_id: user.into(),
            session_code: "ABC".into(),
            display_name: user.to_uppercase(),
            cookie_id: None,
            live_score: score,
            deferred_score: 0,
            best_deferred_score: 0,
            join_bonus: 0,
            attempt_count: 1,
            connection_status: ConnectionStatus::Online,
            joined_at: SystemTime::UNIX_EPOCH + Duration::from_secs(joined_secs),
            join_sequence: sequence,
            completed_at: None,
        }
    }

    fn session(participants: Vec<Participant>) -> LiveSession {
        let mut session = LiveSession::new("ABC".into(), PlayMode::Quiz, "teacher".into(), vec![]);
        for p in participants {
            session.participants.insert(p.user_id.clone(), p);
        }
        session
    }

    #[test]
    fn ties_break_on_earliest_join() {
        let session = session(vec![
            participant("late", 500, 30, 2),
            participant("early", 500, 10, 0),
            participant("top", 900, 20, 1),
        ]);

        let board = live_board(&session);
        let order: Vec<_> = board.iter().map(|e| (e.user_id.as_str(), e.rank)).collect();
        assert_eq!(order, vec![("top", 1), ("early", 2), ("late", 3)]);
    }

    #[test]
    fn students_never_see_live_scores() {
        let mut session = session(vec![participant("a", 100, 0, 0), participant("b", 50, 1, 1)]);
        session.revealed = Some(live_board(&session));
        session.participants.get_mut("b").unwrap().live_score = 5_000;

        let student = view_for(&session, Audience::Student);
        assert_eq!(student[0].user_id, "a");
        assert!(student.iter().all(|entry| entry.score != 5_000));

        let teacher = view_for(&session, Audience::Teacher);
        assert_eq!(teacher[0].user_id, "b");
        assert_eq!(teacher[0].score, 5_000);
        assert_eq!(view_for(&session, Audience::Projector), teacher);
    }

    #[test]
    fn students_see_nothing_before_the_first_reveal() {
        let session = session(vec![participant("a", 100, 0, 0)]);
        assert!(view_for(&session, Audience::Student).is_empty());
    }

    #[test]
    fn late_joiner_is_ranked_into_the_snapshot() {
        let session = session(vec![participant("a", 100, 0, 0), participant("b", 50, 1, 1)]);
        let mut snapshot = live_board(&session);

        let joiner = participant("c", 80, 2, 2);
        insert_late_joiner(&mut snapshot, entry_for(PlayMode::Quiz, &joiner));
        insert_late_joiner(&mut snapshot, entry_for(PlayMode::Quiz, &joiner));

        let order: Vec<_> = snapshot.iter().map(|e| (e.user_id.as_str(), e.rank)).collect();
        assert_eq!(order, vec![("a", 1), ("c", 2), ("b", 3)]);
    }

    #[tokio::test]
    async fn live_board_over_rest_requires_the_controller() {
        let sessions = Arc::new(SessionStateManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(DurableSlot::new()),
            Arc::new(AppConfig::default()),
            Arc::new(QuestionBank::new(Vec::new())),
        ));
        sessions
            .create_session(NewSession {
                access_code: Some("ABC123".into()),
                play_mode: PlayMode::Quiz,
                controller_id: "teacher".into(),
                question_uids: vec![],
                questions: vec![Question {
                    uid: "q1".into(),
                    kind: QuestionKind::SingleChoice {
                        options: vec!["a".into(), "b".into()],
                        correct: "a".into(),
                    },
                    discipline: None,
                    grade_level: None,
                    themes: vec![],
                }],
            })
            .await
            .unwrap();
        let service = LeaderboardService::new(sessions);

        assert!(
            service
                .compute_for("ABC123", Audience::Student, None)
                .await
                .unwrap()
                .is_empty()
        );
        for actor in [None, Some("student-1")] {
            let err = service
                .compute_for("ABC123", Audience::Projector, actor)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::Unauthorized(_)));
        }
        assert!(
            service
                .compute_for("ABC123", Audience::Teacher, Some("teacher"))
                .await
                .is_ok()
        );
    }
}
