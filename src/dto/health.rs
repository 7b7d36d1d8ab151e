use serde::Serialize;
use utoipa::ToSchema;

/// Overall backend status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Storage reachable.
    Ok,
    /// Running from memory only; finalization is unavailable.
    Degraded,
}

/// Body of `GET /healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok` or `degraded`.
    pub status: HealthStatus,
    /// Sessions currently holding a game or round.
    pub live_sessions: usize,
}

impl HealthResponse {
    /// Healthy response.
    pub fn ok(live_sessions: usize) -> Self {
        Self {
            status: HealthStatus::Ok,
            live_sessions,
        }
    }

    /// Degraded response.
    pub fn degraded(live_sessions: usize) -> Self {
        Self {
            status: HealthStatus::Degraded,
            live_sessions,
        }
    }
}
