use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::state::session::PlayMode;

/// One completed session instance (live session or practice run).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecordEntity {
    /// Stable identifier of the durable row.
    pub id: Uuid,
    /// Access code (or practice session id). Unique across records.
    pub access_code: String,
    /// How the session was played.
    pub play_mode: PlayMode,
    /// User who controlled the session; the player for practice runs.
    pub controller_id: String,
    /// Questions in the session.
    pub question_count: u32,
    /// Creation time.
    pub created_at: SystemTime,
    /// Completion time.
    pub completed_at: SystemTime,
}

/// Final state of one participant in one completed session. Unique per (session, user).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantRecordEntity {
    /// Stable identifier of the durable row.
    pub id: Uuid,
    /// References [`SessionRecordEntity::access_code`]; deleting the session removes the row.
    pub access_code: String,
    /// Participant.
    pub user_id: String,
    /// Guest cookie the participant played under.
    pub cookie_id: Option<String>,
    /// Name shown in results.
    pub display_name: String,
    /// Score of synchronous play.
    pub live_score: i64,
    /// Best deferred attempt.
    pub deferred_score: i64,
    /// Attempts started.
    pub attempt_count: u32,
    /// First join.
    pub joined_at: SystemTime,
    /// End of the participant's play.
    pub completed_at: SystemTime,
}

/// Identity used to look up a user's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOwner {
    /// Authenticated user id.
    User(String),
    /// Guest cookie identifier.
    Cookie(String),
}

impl HistoryOwner {
    /// True when `participant` belongs to this owner.
    pub fn matches(&self, participant: &ParticipantRecordEntity) -> bool {
        match self {
            HistoryOwner::User(user_id) => &participant.user_id == user_id,
            HistoryOwner::Cookie(cookie_id) => participant.cookie_id.as_ref() == Some(cookie_id),
        }
    }
}

/// Play-mode filter of the history read API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    /// Classroom quizzes.
    Quiz,
    /// Matches synchronous and deferred tournaments.
    Tournament,
    /// Practice runs.
    Practice,
}

impl HistoryMode {
    /// True when `mode` passes the filter.
    pub fn includes(self, mode: PlayMode) -> bool {
        match self {
            HistoryMode::Quiz => mode == PlayMode::Quiz,
            HistoryMode::Tournament => matches!(mode, PlayMode::Tournament | PlayMode::Deferred),
            HistoryMode::Practice => mode == PlayMode::Practice,
        }
    }

    /// Play modes covered by this filter.
    pub fn play_modes(self) -> &'static [PlayMode] {
        match self {
            HistoryMode::Quiz => &[PlayMode::Quiz],
            HistoryMode::Tournament => &[PlayMode::Tournament, PlayMode::Deferred],
            HistoryMode::Practice => &[PlayMode::Practice],
        }
    }
}

/// A completed session as seen by one of its participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryItemEntity {
    /// The session row.
    pub session: SessionRecordEntity,
    /// The owner's participant row.
    pub participant: ParticipantRecordEntity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tournament_filter_covers_deferred_play() {
        assert!(HistoryMode::Tournament.includes(PlayMode::Deferred));
        assert!(HistoryMode::Tournament.includes(PlayMode::Tournament));
        assert!(!HistoryMode::Tournament.includes(PlayMode::Quiz));
        assert!(HistoryMode::Practice.includes(PlayMode::Practice));
        for mode in [HistoryMode::Quiz, HistoryMode::Tournament, HistoryMode::Practice] {
            for play_mode in mode.play_modes() {
                assert!(mode.includes(*play_mode));
            }
        }
    }
}
