//! Pure scoring of a submission against a question definition.
//!
//! Scores are credit percentages in `[0, 100]`; converting credit into session points
//! (base score, time penalty) is done by the session and practice managers.

use std::collections::HashSet;

use crate::state::question::{Question, QuestionKind, Submission};

/// Outcome of scoring one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreResult {
    /// Credit percentage in `[0, 100]`.
    pub points: u8,
    /// True when the submission is exactly the expected answer.
    pub is_fully_correct: bool,
}

impl ScoreResult {
    const ZERO: Self = Self {
        points: 0,
        is_fully_correct: false,
    };
    const FULL: Self = Self {
        points: 100,
        is_fully_correct: true,
    };
}

/// Score `submission` against `question`. Mismatched or malformed submissions score zero.
pub fn score(question: &Question, submission: &Submission) -> ScoreResult {
    match (&question.kind, submission) {
        (QuestionKind::SingleChoice { correct, .. }, Submission::Choice { selected }) => {
            score_single_choice(correct, selected)
        }
        (QuestionKind::MultipleChoice { options, correct }, Submission::Choice { selected }) => {
            score_multiple_choice(options, correct, selected)
        }
        (QuestionKind::Numeric { value, tolerance }, Submission::Numeric { value: raw }) => {
            score_numeric(*value, *tolerance, raw)
        }
        _ => ScoreResult::ZERO,
    }
}

fn score_single_choice(correct: &str, selected: &[String]) -> ScoreResult {
    match selected {
        [only] if only == correct => ScoreResult::FULL,
        _ => ScoreResult::ZERO,
    }
}

/// `round((C/T - W/O) * 100)` clamped to `[0, 100]`, where selections outside the offered
/// options count as wrong.
fn score_multiple_choice(options: &[String], correct: &[String], selected: &[String]) -> ScoreResult {
    let correct: HashSet<&str> = correct.iter().map(String::as_str).collect();
    let selected: HashSet<&str> = selected.iter().map(String::as_str).collect();
    let total_correct = correct.len();
    let total_options = options.len();

    if selected.is_empty() || total_correct == 0 || total_options == 0 {
        return ScoreResult::ZERO;
    }

    let picked_correct = selected.intersection(&correct).count();
    let picked_wrong = selected.len() - picked_correct;

    let raw = picked_correct as f64 / total_correct as f64;
    let penalty = picked_wrong as f64 / total_options as f64;
    let percent = ((raw - penalty) * 100.0).round().clamp(0.0, 100.0);

    ScoreResult {
        points: percent as u8,
        is_fully_correct: selected == correct,
    }
}

fn score_numeric(expected: f64, tolerance: f64, raw: &str) -> ScoreResult {
    let Some(submitted) = parse_numeric(raw) else {
        return ScoreResult::ZERO;
    };

    if within_tolerance(submitted, expected, tolerance) {
        ScoreResult::FULL
    } else {
        ScoreResult::ZERO
    }
}

/// Parse user-typed numbers such as `"3,14159"`, `" 1 234,5 "` or `"-0.5"`.
///
/// Whitespace (including non-breaking and thin spaces) is treated as a thousands separator.
/// A single `,` or `.` is the decimal separator; more than one separator is rejected.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    let separators = compact.chars().filter(|c| matches!(c, ',' | '.')).count();
    if separators > 1 {
        return None;
    }

    let normalized = compact.replace(',', ".");
    let well_formed = normalized
        .chars()
        .enumerate()
        .all(|(index, c)| c.is_ascii_digit() || c == '.' || (index == 0 && matches!(c, '-' | '+')));
    if !well_formed || !normalized.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    normalized.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// `|submitted - expected| <= tolerance`, allowing a few ulps so values that differ only in
/// representation noise never flip across the boundary.
fn within_tolerance(submitted: f64, expected: f64, tolerance: f64) -> bool {
    let tolerance = tolerance.abs();
    let slack = f64::EPSILON * 4.0 * submitted.abs().max(expected.abs()).max(1.0);
    (submitted - expected).abs() <= tolerance + slack
}
