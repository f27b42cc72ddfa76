use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;

use crate::state::question::{Question, Submission};

/// Lifecycle of a practice run. `Completed` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PracticeStatus {
    /// Accepting answers.
    Active,
    /// Every question answered, or ended by the player.
    Completed,
    /// Past `expiresAt` while still active.
    Expired,
}

/// Options chosen when starting a practice run.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSettings {
    /// Restrict the pool to one discipline.
    pub discipline: Option<String>,
    /// Restrict the pool to one grade level.
    pub grade_level: Option<String>,
    /// Restrict the pool to these themes; empty accepts all.
    #[serde(default)]
    pub themes: Vec<String>,
    /// Maximum pool size; 0 keeps every match.
    pub question_count: usize,
    /// Return correctness and the expected answer right after each submission.
    #[serde(default = "default_true")]
    pub show_immediate_feedback: bool,
    /// Keep the question open after a wrong answer.
    #[serde(default)]
    pub allow_retry: bool,
    /// Explicit question selection; bypasses the bank filter when present.
    pub question_uids: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

/// Running statistics of a practice run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PracticeStatistics {
    /// Distinct questions answered at least once.
    pub questions_attempted: u32,
    /// Correct submissions.
    pub correct_answers: u32,
    /// Incorrect submissions.
    pub incorrect_answers: u32,
    /// Rounded percentage of correct submissions.
    pub accuracy_percentage: u32,
    /// Milliseconds.
    pub average_time_per_question: u64,
    /// Milliseconds.
    pub total_time_spent: u64,
    /// Question uids answered more than once.
    pub retried_questions: Vec<String>,
}

impl PracticeStatistics {
    /// Fold one scored submission into the statistics.
    pub fn record(&mut self, question_uid: &str, correct: bool, time_spent_ms: u64, retry: bool) {
        self.questions_attempted += 1;
        if correct {
            self.correct_answers += 1;
        } else {
            self.incorrect_answers += 1;
        }
        self.total_time_spent = self.total_time_spent.saturating_add(time_spent_ms);
        self.average_time_per_question =
            self.total_time_spent / u64::from(self.questions_attempted);
        let ratio = f64::from(self.correct_answers) / f64::from(self.questions_attempted);
        self.accuracy_percentage = (ratio * 100.0).round() as u32;
        if retry && !self.retried_questions.iter().any(|uid| uid == question_uid) {
            self.retried_questions.push(question_uid.to_owned());
        }
    }
}

/// One submitted practice answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeAnswer {
    /// Answered question.
    pub question_uid: String,
    /// The answer.
    pub submission: Submission,
    /// Fully correct.
    pub is_correct: bool,
    /// Points earned.
    pub points: i64,
    /// Time spent, as reported by the client.
    pub time_spent_ms: u64,
    /// 1 for the first try at the question.
    pub attempt_number: u32,
    /// Reception time.
    pub submitted_at: SystemTime,
}

/// Solo play-through stored as one JSON blob under `practice:{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSession {
    /// `practice_{userId}_{millis}_{suffix}`.
    pub session_id: String,
    /// Player.
    pub user_id: String,
    /// Guest cookie of the player, carried into the durable history.
    #[serde(default)]
    pub cookie_id: Option<String>,
    /// Creation settings.
    pub settings: PracticeSettings,
    /// Lifecycle status.
    pub status: PracticeStatus,
    /// Questions in play order.
    pub question_pool: Vec<Question>,
    /// Index of the question to answer next.
    pub current_question_index: usize,
    /// Every submission, retries included.
    pub answers: Vec<PracticeAnswer>,
    /// Running statistics.
    pub statistics: PracticeStatistics,
    /// Points so far.
    pub score: i64,
    /// Creation time.
    pub created_at: SystemTime,
    /// Time after which the run is gone.
    pub expires_at: SystemTime,
    /// Completion time.
    #[serde(default)]
    pub completed_at: Option<SystemTime>,
    /// Durable records have been written for this run.
    #[serde(default)]
    pub persisted: bool,
}

impl PracticeSession {
    /// True once `now` reaches `expires_at`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }

    /// Question to answer next, absent once the pool is exhausted.
    pub fn current_question(&self) -> Option<&Question> {
        self.question_pool.get(self.current_question_index)
    }

    /// Attempts already made on `question_uid`.
    pub fn attempts_on(&self, question_uid: &str) -> u32 {
        let count = self
            .answers
            .iter()
            .filter(|answer| answer.question_uid == question_uid)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_track_accuracy_and_time() {
        let mut stats = PracticeStatistics::default();
        stats.record("q1", true, 3_000, false);
        stats.record("q2", false, 5_000, false);
        stats.record("q2", true, 1_000, true);

        assert_eq!(stats.questions_attempted, 3);
        assert_eq!(stats.correct_answers, 2);
        assert_eq!(stats.incorrect_answers, 1);
        assert_eq!(stats.accuracy_percentage, 67);
        assert_eq!(stats.total_time_spent, 9_000);
        assert_eq!(stats.average_time_per_question, 3_000);
        assert_eq!(stats.retried_questions, vec!["q2".to_string()]);
    }

    #[test]
    fn settings_default_to_immediate_feedback() {
        let settings: PracticeSettings =
            serde_json::from_str(r#"{"questionCount": 5, "discipline": "math"}"#).unwrap();
        assert!(settings.show_immediate_feedback);
        assert!(!settings.allow_retry);
        assert_eq!(settings.question_uids, None);
    }
}
