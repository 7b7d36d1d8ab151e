use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use serde_with::skip_serializing_none;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    dto::live::{MutationShapeError, SessionView},
    state::{AbortError, ApplyError, PlanError, tickets::RedeemError},
};

/// Rejections that carry the current session so clients can resynchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Client sequence is behind the canonical head.
    Stale,
    /// Session is not accepting this request.
    InvalidState,
}

impl RejectionKind {
    fn code(self) -> &'static str {
        match self {
            RejectionKind::Stale => "stale",
            RejectionKind::InvalidState => "invalid_state",
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Caller may not act on this resource.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Rejection carrying the current session view.
    #[error("{message}")]
    Rejected {
        /// Stale or invalid state.
        kind: RejectionKind,
        /// Human readable explanation.
        message: String,
        /// Session as it is now.
        view: Box<SessionView>,
    },
    /// A live session already exists for the game or round.
    #[error("{message}")]
    Conflict {
        /// Human readable explanation.
        message: String,
        /// Session holding the game.
        session_id: Uuid,
    },
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Stream ticket could not be redeemed.
    #[error("ticket rejected: {0}")]
    TicketRejected(RedeemError),
}

impl ServiceError {
    /// Stale rejection for `view`.
    pub fn stale(message: impl Into<String>, view: SessionView) -> Self {
        ServiceError::Rejected {
            kind: RejectionKind::Stale,
            message: message.into(),
            view: Box::new(view),
        }
    }

    /// Invalid-state rejection for `view`.
    pub fn invalid_state(message: impl Into<String>, view: SessionView) -> Self {
        ServiceError::Rejected {
            kind: RejectionKind::InvalidState,
            message: message.into(),
            view: Box::new(view),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<MutationShapeError> for ServiceError {
    fn from(err: MutationShapeError) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Body missing, not JSON, or not matching the expected shape.
    #[error("{message}")]
    InvalidBody {
        /// Status chosen by the JSON extractor (400, 415 or 422).
        status: StatusCode,
        /// Extractor message.
        message: String,
    },
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Stream ticket rejected.
    #[error("ticket rejected")]
    TicketRejected {
        /// Stable reason code.
        reason: &'static str,
    },
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {message}")]
    Conflict {
        /// Human readable explanation.
        message: String,
        /// Session the conflict is about.
        session_id: Option<Uuid>,
    },
    /// Stale or invalid-state rejection with the session view.
    #[error("{message}")]
    Rejected {
        /// Rejection kind.
        kind: RejectionKind,
        /// Human readable explanation.
        message: String,
        /// Current session view.
        state: Box<SessionView>,
    },
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict {
                message,
                session_id: None,
            },
            ServiceError::Rejected {
                kind,
                message,
                view,
            } => AppError::Rejected {
                kind,
                message,
                state: view,
            },
            ServiceError::Conflict {
                message,
                session_id,
            } => AppError::Conflict {
                message,
                session_id: Some(session_id),
            },
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::TicketRejected(reason) => AppError::TicketRejected {
                reason: reason.reason(),
            },
        }
    }
}

#[skip_serializing_none]
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: &'static str,
    message: Option<String>,
    reason: Option<&'static str>,
    session_id: Option<Uuid>,
    state: Option<Box<SessionView>>,
}

impl ErrorBody {
    fn new(error: &'static str, message: String) -> Self {
        Self {
            error,
            message: Some(message),
            reason: None,
            session_id: None,
            state: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let message = self.to_string();
        let (status, body) = match self {
            AppError::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("validation_error", message),
            ),
            AppError::Unauthorized(_) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody::new("unauthorized", message),
            ),
            AppError::TicketRejected { reason } => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    reason: Some(reason),
                    message: None,
                    ..ErrorBody::new("ticket_rejected", String::new())
                },
            ),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorBody::new("not_found", message)),
            AppError::Conflict { session_id, .. } => (
                StatusCode::CONFLICT,
                ErrorBody {
                    session_id,
                    ..ErrorBody::new(
                        if session_id.is_some() {
                            "conflict"
                        } else {
                            "invalid_state"
                        },
                        message,
                    )
                },
            ),
            AppError::Rejected { kind, state, .. } => (
                StatusCode::CONFLICT,
                ErrorBody {
                    session_id: Some(state.session_id),
                    state: Some(state),
                    ..ErrorBody::new(kind.code(), message)
                },
            ),
            AppError::InvalidBody { status, .. } => {
                (status, ErrorBody::new("invalid_body", message))
            }
            AppError::ServiceUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody::new("unavailable", message),
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("lifecycle transition already pending".into())
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
            ApplyError::StatusMismatch { expected, actual } => ServiceError::InvalidState(
                format!("status changed during transition (expected {expected:?}, got {actual:?})"),
            ),
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
