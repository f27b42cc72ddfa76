//! Application-level configuration loading: scoring constants, TTLs and the question bank path.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_QUIZ_BACK_CONFIG_PATH";

const DEFAULT_BASE_SCORE: i64 = 1000;
const DEFAULT_TIME_PENALTY_PER_SECOND: i64 = 10;
const DEFAULT_JOIN_BONUS_FIRST: i64 = 10;
const DEFAULT_JOIN_BONUS_STEP: i64 = 1;
const DEFAULT_PRACTICE_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_PRACTICE_POINTS_PER_CORRECT: i64 = 10;
const DEFAULT_SNAPSHOT_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_TRANSITION_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Points awarded for a fully correct answer before the time penalty.
    pub base_score: i64,
    /// Points removed per elapsed second on timed questions.
    pub time_penalty_per_second: i64,
    /// Bonus awarded to the first participant joining a session.
    pub join_bonus_first: i64,
    /// Amount the join bonus decreases with each subsequent joiner.
    pub join_bonus_step: i64,
    /// Lifetime of a practice session record.
    pub practice_ttl: Duration,
    /// Points awarded per correct practice answer.
    pub practice_points_per_correct: i64,
    /// Lifetime of every live-session key in the ephemeral store, refreshed on write.
    pub snapshot_ttl: Duration,
    /// Upper bound for the durable flush performed while completing a session.
    pub transition_timeout: Duration,
    /// Optional JSON file holding the read-only question bank.
    pub questions_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        base_score = app_config.base_score,
                        practice_ttl_secs = app_config.practice_ttl.as_secs(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Join bonus granted to the participant at position `order` (0-based) in the join list.
    pub fn join_bonus(&self, order: usize) -> i64 {
        let order = i64::try_from(order).unwrap_or(i64::MAX);
        self.join_bonus_first
            .saturating_sub(order.saturating_mul(self.join_bonus_step))
            .max(0)
    }

    /// Points removed for answering after `elapsed_ms` on a timed question.
    pub fn time_penalty(&self, elapsed_ms: u64) -> i64 {
        let tenths = i64::try_from(elapsed_ms / 100).unwrap_or(i64::MAX);
        // floor(seconds * rate), computed on tenths of a second to stay in integers
        tenths.saturating_mul(self.time_penalty_per_second) / 10
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_score: DEFAULT_BASE_SCORE,
            time_penalty_per_second: DEFAULT_TIME_PENALTY_PER_SECOND,
            join_bonus_first: DEFAULT_JOIN_BONUS_FIRST,
            join_bonus_step: DEFAULT_JOIN_BONUS_STEP,
            practice_ttl: Duration::from_secs(DEFAULT_PRACTICE_TTL_SECS),
            practice_points_per_correct: DEFAULT_PRACTICE_POINTS_PER_CORRECT,
            snapshot_ttl: Duration::from_secs(DEFAULT_SNAPSHOT_TTL_SECS),
            transition_timeout: Duration::from_millis(DEFAULT_TRANSITION_TIMEOUT_MS),
            questions_path: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    base_score: Option<i64>,
    time_penalty_per_second: Option<i64>,
    join_bonus_first: Option<i64>,
    join_bonus_step: Option<i64>,
    practice_ttl_secs: Option<u64>,
    practice_points_per_correct: Option<i64>,
    snapshot_ttl_secs: Option<u64>,
    transition_timeout_ms: Option<u64>,
    questions_path: Option<PathBuf>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            base_score: value.base_score.unwrap_or(defaults.base_score),
            time_penalty_per_second: value
                .time_penalty_per_second
                .unwrap_or(defaults.time_penalty_per_second),
            join_bonus_first: value.join_bonus_first.unwrap_or(defaults.join_bonus_first),
            join_bonus_step: value.join_bonus_step.unwrap_or(defaults.join_bonus_step),
            practice_ttl: value
                .practice_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.practice_ttl),
            practice_points_per_correct: value
                .practice_points_per_correct
                .unwrap_or(defaults.practice_points_per_correct),
            snapshot_ttl: value
                .snapshot_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.snapshot_ttl),
            transition_timeout: value
                .transition_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.transition_timeout),
            questions_path: value.questions_path,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_bonus_decreases_and_floors_at_zero() {
        let config = AppConfig::default();
        assert_eq!(config.join_bonus(0), 10);
        assert_eq!(config.join_bonus(1), 9);
        assert_eq!(config.join_bonus(9), 1);
        assert_eq!(config.join_bonus(10), 0);
        assert_eq!(config.join_bonus(500), 0);
    }

    #[test]
    fn time_penalty_is_ten_points_per_second() {
        let config = AppConfig::default();
        assert_eq!(config.time_penalty(0), 0);
        assert_eq!(config.time_penalty(99), 0);
        assert_eq!(config.time_penalty(1_500), 15);
        assert_eq!(config.time_penalty(12_340), 123);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let raw: RawConfig = serde_json::from_str(r#"{ "base_score": 500 }"#).unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.base_score, 500);
        assert_eq!(config.time_penalty_per_second, 10);
        assert_eq!(config.practice_ttl, Duration::from_secs(86_400));
    }
}
