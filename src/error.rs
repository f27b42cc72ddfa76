use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::{
    dao::storage::StorageError,
    state::{AbortError, ApplyError, PlanError, state_machine::SessionPhase},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Durable storage is not installed; the action may not have been recorded.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Caller is not allowed to perform the operation (e.g. not the session controller).
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Operation targets a session or attempt that is already finished.
    #[error("stale operation: {0}")]
    StaleOperation(String),
    /// A uniqueness or referential constraint rejected the write.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
    /// A stored value could not be decoded.
    #[error("corrupted state: {0}")]
    CorruptedState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl ServiceError {
    /// Short machine-readable kind, used in transport error frames.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Unavailable(_) | ServiceError::Degraded | ServiceError::Timeout => {
                "retry_later"
            }
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::InvalidState(_) => "invalid_state",
            ServiceError::StaleOperation(_) => "stale_operation",
            ServiceError::IntegrityViolation(_) => "integrity_violation",
            ServiceError::CorruptedState(_) => "corrupted_state",
            ServiceError::NotFound(_) => "not_found",
        }
    }

    /// Message safe to show to end users. Infrastructure details are not leaked.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Unavailable(_) | ServiceError::Degraded | ServiceError::Timeout => {
                "your action may not have been recorded, please retry".into()
            }
            other => other.to_string(),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Integrity { message } => ServiceError::IntegrityViolation(message),
            corrupted @ StorageError::Corrupted { .. } => {
                ServiceError::CorruptedState(corrupted.to_string())
            }
            unavailable @ StorageError::Unavailable { .. } => ServiceError::Unavailable(unavailable),
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(_) | ServiceError::Degraded | ServiceError::Timeout => {
                AppError::ServiceUnavailable(err.public_message())
            }
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::StaleOperation(message) => AppError::Conflict(message),
            ServiceError::IntegrityViolation(message) => AppError::Conflict(message),
            ServiceError::CorruptedState(message) => AppError::Internal(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("state transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) if invalid.from == SessionPhase::Completed => {
                ServiceError::StaleOperation("session already completed".into())
            }
            PlanError::InvalidTransition(invalid) => {
                ServiceError::InvalidState(invalid.to_string())
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ServiceError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ServiceError::InvalidState("pending transition does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => ServiceError::InvalidState(format!(
                "state changed during transition (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => {
                ServiceError::InvalidState(format!(
                    "state version mismatch during transition (expected {expected}, got {actual})"
                ))
            }
        }
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => ServiceError::InvalidState("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                ServiceError::InvalidState("transition plan does not match".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::state_machine::{InvalidTransition, SessionEvent};

    #[test]
    fn completed_sessions_reject_as_stale() {
        let err: ServiceError = PlanError::InvalidTransition(InvalidTransition {
            from: SessionPhase::Completed,
            event: SessionEvent::AnswerApplied,
        })
        .into();
        assert!(matches!(err, ServiceError::StaleOperation(_)));
    }

    #[test]
    fn storage_kinds_map_to_distinct_service_errors() {
        let integrity: ServiceError = StorageError::integrity("duplicate participant").into();
        assert!(matches!(integrity, ServiceError::IntegrityViolation(_)));

        let decode_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let corrupted: ServiceError = StorageError::corrupted("session:state:X", decode_err).into();
        assert!(matches!(corrupted, ServiceError::CorruptedState(_)));
    }

    #[test]
    fn infrastructure_errors_ask_users_to_retry() {
        let app: AppError = ServiceError::Degraded.into();
        assert!(matches!(app, AppError::ServiceUnavailable(ref m) if m.contains("retry")));
    }
}
