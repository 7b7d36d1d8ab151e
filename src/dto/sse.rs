use serde::Serialize;
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::live::{
    FoldedStateView, MutationResponse, PositionDto, ScoreEventView, SessionView,
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE `event:` name.
    pub event: Option<String>,
    /// SSE `data:` body.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// First event of every stream.
pub struct ConnectedEvent {
    /// Subscriber id.
    pub client_id: Uuid,
    /// `session/{id}`, `game/{id}` or `account/{id}`.
    pub scope: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Sent instead of a snapshot when nothing is live for the scope.
pub struct NoSessionEvent {
    /// Scope that has no live session.
    pub scope: String,
    /// Last known session for session scopes.
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Applied mutation pushed to viewers.
pub struct ScoreEventPayload {
    /// Session the event belongs to.
    pub session_id: Uuid,
    /// Appended event.
    pub event: ScoreEventView,
    /// Canonical result, same body the submitting device received.
    pub outcome: MutationResponse,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Lifecycle change pushed to viewers.
pub struct SessionStatusEvent {
    /// Session whose status changed.
    pub session: SessionView,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Position change pushed to viewers.
pub struct PositionChangedEvent {
    /// Session whose pointer moved.
    pub session_id: Uuid,
    /// New position.
    pub position: PositionDto,
    /// Folded state at the time of the move.
    pub state: FoldedStateView,
}
