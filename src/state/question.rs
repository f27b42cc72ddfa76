use std::{fs, path::Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;

/// Definition of a question as needed for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Stable identifier of the question.
    pub uid: String,
    /// Answer policy and expected answer.
    #[serde(flatten)]
    pub kind: QuestionKind,
    /// Subject, used by practice filters.
    #[serde(default)]
    pub discipline: Option<String>,
    /// School level, used by practice filters.
    #[serde(default)]
    pub grade_level: Option<String>,
    /// Topics, used by practice filters.
    #[serde(default)]
    pub themes: Vec<String>,
}

/// Scoring policy selected by question type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionKind {
    /// Exactly one correct option.
    SingleChoice {
        /// Offered option identifiers.
        options: Vec<String>,
        /// The correct option identifier.
        correct: String,
    },
    /// Several correct options, scored with partial credit.
    MultipleChoice {
        /// Offered option identifiers.
        options: Vec<String>,
        /// Every correct option identifier.
        correct: Vec<String>,
    },
    /// Free numeric input compared within a tolerance.
    Numeric {
        /// Expected value.
        value: f64,
        /// Accepted absolute distance from `value`.
        #[serde(default)]
        tolerance: f64,
    },
}

/// Answer submitted by a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Submission {
    /// Option identifiers selected for a choice question.
    Choice {
        /// Selected option identifiers.
        selected: Vec<String>,
    },
    /// Raw text typed for a numeric question.
    Numeric {
        /// Text as typed, normalized during scoring.
        value: String,
    },
}

/// Failures loading the question bank.
#[derive(Debug, Error)]
pub enum QuestionBankError {
    /// The file could not be read.
    #[error("failed to read question bank")]
    Read(#[source] std::io::Error),
    /// The file is not a JSON array of questions.
    #[error("failed to parse question bank")]
    Parse(#[source] serde_json::Error),
}

/// Criteria used to draw a practice pool from the bank.
#[derive(Debug, Clone, Default)]
pub struct QuestionFilter<'a> {
    /// Required discipline.
    pub discipline: Option<&'a str>,
    /// Required grade level.
    pub grade_level: Option<&'a str>,
    /// Questions must carry at least one of these themes; empty accepts all.
    pub themes: &'a [String],
}

/// Read-only catalog of questions, keyed by uid in file order.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    questions: IndexMap<String, Question>,
}

impl QuestionBank {
    /// Build a bank from definitions; later duplicates replace earlier ones.
    pub fn new(questions: impl IntoIterator<Item = Question>) -> Self {
        Self {
            questions: questions
                .into_iter()
                .map(|question| (question.uid.clone(), question))
                .collect(),
        }
    }

    /// Load the bank from a JSON array on disk.
    pub fn from_file(path: &Path) -> Result<Self, QuestionBankError> {
        let contents = fs::read_to_string(path).map_err(QuestionBankError::Read)?;
        let questions: Vec<Question> =
            serde_json::from_str(&contents).map_err(QuestionBankError::Parse)?;
        Ok(Self::new(questions))
    }

    /// Load the bank from the optional configured path, logging and falling back to empty.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("no question bank configured; sessions must supply questions inline");
            return Self::default();
        };

        match Self::from_file(path) {
            Ok(bank) => {
                info!(path = %path.display(), count = bank.len(), "loaded question bank");
                bank
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to load question bank");
                Self::default()
            }
        }
    }

    /// Question with the given uid.
    pub fn get(&self, uid: &str) -> Option<&Question> {
        self.questions.get(uid)
    }

    /// Number of questions.
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// True when the bank holds nothing.
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Questions matching every provided criterion. Themes match when any theme overlaps.
    pub fn filter(&self, filter: &QuestionFilter<'_>) -> Vec<Question> {
        self.questions
            .values()
            .filter(|question| {
                filter
                    .discipline
                    .is_none_or(|wanted| question.discipline.as_deref() == Some(wanted))
            })
            .filter(|question| {
                filter
                    .grade_level
                    .is_none_or(|wanted| question.grade_level.as_deref() == Some(wanted))
            })
            .filter(|question| {
                filter.themes.is_empty()
                    || question.themes.iter().any(|theme| filter.themes.contains(theme))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(uid: &str, discipline: &str, themes: &[&str]) -> Question {
        Question {
            uid: uid.into(),
            kind: QuestionKind::SingleChoice {
                options: vec!["a".into(), "b".into()],
                correct: "a".into(),
            },
            discipline: Some(discipline.into()),
            grade_level: Some("CM1".into()),
            themes: themes.iter().map(|theme| theme.to_string()).collect(),
        }
    }

    #[test]
    fn filter_matches_discipline_and_any_theme() {
        let bank = QuestionBank::new([
            question("q1", "math", &["fractions"]),
            question("q2", "math", &["geometry"]),
            question("q3", "french", &["fractions"]),
        ]);
        let themes = vec!["fractions".to_string()];
        let pool = bank.filter(&QuestionFilter {
            discipline: Some("math"),
            grade_level: None,
            themes: &themes,
        });
        let uids: Vec<_> = pool.iter().map(|q| q.uid.as_str()).collect();
        assert_eq!(uids, vec!["q1"]);
    }

    #[test]
    fn question_json_uses_kind_tag() {
        let raw = r#"{"uid":"n1","kind":"numeric","value":3.14159,"tolerance":0.0001}"#;
        let parsed: Question = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.kind,
            QuestionKind::Numeric {
                value: 3.14159,
                tolerance: 0.0001
            }
        );
        assert!(parsed.themes.is_empty());
    }
}
