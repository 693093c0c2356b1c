use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{round::AdmissionError, state_machine::InvalidTransition},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Malformed command or answer payload; session state unaffected.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Command not valid in the current phase; no-op.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
    /// Answer arrived after the round closed; rejected without a score.
    #[error("the answer window for this question is closed")]
    RoundClosed,
    /// Second answer from the same player for the same round.
    #[error("an answer was already recorded for this question")]
    DuplicateSubmission,
    /// Display name already held by a live player in this session.
    #[error("display name `{0}` is already taken")]
    NameTaken(String),
    /// A live host connection already claims this session.
    #[error("a host is already connected to this session")]
    HostAlreadyConnected,
    /// The PIN space is too crowded to allocate another session.
    #[error("no free session PIN could be allocated")]
    AllocationExhausted,
    /// Operation against an unknown or expired PIN.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ServiceError {
    /// Stable machine-readable code used in WebSocket error messages.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unavailable(_) | ServiceError::Degraded => "storage_unavailable",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::InvalidInput(_) => "validation_error",
            ServiceError::IllegalTransition(_) => "illegal_transition",
            ServiceError::RoundClosed => "round_closed",
            ServiceError::DuplicateSubmission => "duplicate_submission",
            ServiceError::NameTaken(_) => "name_taken",
            ServiceError::HostAlreadyConnected => "host_already_connected",
            ServiceError::AllocationExhausted => "allocation_exhausted",
            ServiceError::NotFound(_) => "not_found",
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::IllegalTransition(err.to_string())
    }
}

impl From<AdmissionError> for ServiceError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::RoundClosed => ServiceError::RoundClosed,
            AdmissionError::DuplicateSubmission => ServiceError::DuplicateSubmission,
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
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
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::AllocationExhausted => {
                AppError::ServiceUnavailable("session capacity reached".into())
            }
            other @ (ServiceError::IllegalTransition(_)
            | ServiceError::RoundClosed
            | ServiceError::DuplicateSubmission
            | ServiceError::NameTaken(_)
            | ServiceError::HostAlreadyConnected) => AppError::Conflict(other.to_string()),
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
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::state_machine::{SessionEvent, SessionPhase};

    #[test]
    fn admission_errors_map_onto_the_taxonomy() {
        assert!(matches!(
            ServiceError::from(AdmissionError::RoundClosed),
            ServiceError::RoundClosed
        ));
        assert!(matches!(
            ServiceError::from(AdmissionError::DuplicateSubmission),
            ServiceError::DuplicateSubmission
        ));
    }

    #[test]
    fn illegal_transitions_become_conflicts() {
        let err: ServiceError = InvalidTransition {
            from: SessionPhase::Lobby,
            event: SessionEvent::CloseQuestion,
        }
        .into();
        assert_eq!(err.code(), "illegal_transition");
        assert!(matches!(AppError::from(err), AppError::Conflict(_)));
    }
}
