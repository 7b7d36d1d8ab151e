use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::state::{
    lifecycle::{SessionLifecycle, SessionStatus},
    score::{Audit, LivePlay, MutationKind, Play, ScoreEvent, Scoreline},
    session::{Position, ScoringSession},
};

/// Persisted snapshot of a scoring session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Session identifier.
    pub id: Uuid,
    /// Game or round being scored.
    pub game_or_round_id: String,
    /// Owning tenant.
    pub account_id: String,
    /// Lifecycle status at the time of the write.
    pub status: SessionStatus,
    /// Current inning or hole.
    pub position: Position,
    /// User id of whoever started the session.
    pub started_by_id: String,
    /// Display name of whoever started the session.
    pub started_by_name: String,
    /// Start time.
    pub started_at: SystemTime,
    /// Last accepted mutation or transition.
    pub last_activity_at: SystemTime,
    /// Whether a finalize is waiting to be retried.
    #[serde(default)]
    pub finalize_requested: bool,
}

impl From<&ScoringSession> for SessionEntity {
    fn from(session: &ScoringSession) -> Self {
        Self {
            id: session.id,
            game_or_round_id: session.game_or_round_id.clone(),
            account_id: session.account_id.clone(),
            status: session.status(),
            position: session.position,
            started_by_id: session.started_by_id.clone(),
            started_by_name: session.started_by_name.clone(),
            started_at: session.started_at,
            last_activity_at: session.last_activity_at,
            finalize_requested: session.finalize_requested,
        }
    }
}

impl From<SessionEntity> for ScoringSession {
    fn from(entity: SessionEntity) -> Self {
        Self {
            id: entity.id,
            game_or_round_id: entity.game_or_round_id,
            account_id: entity.account_id,
            position: entity.position,
            started_by_id: entity.started_by_id,
            started_by_name: entity.started_by_name,
            started_at: entity.started_at,
            last_activity_at: entity.last_activity_at,
            lifecycle: SessionLifecycle::restore(entity.status),
            finalize_requested: entity.finalize_requested,
        }
    }
}

/// One entry of a session's event log as stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreEventEntity {
    /// Owning session.
    pub session_id: Uuid,
    /// Server-assigned event id.
    pub event_id: Uuid,
    /// Caller-assigned event id.
    pub client_event_id: String,
    /// Event kind.
    pub kind: MutationKind,
    /// Resolved target for updates and deletes.
    pub target_event_id: Option<Uuid>,
    /// Client sequence hint.
    pub sequence: u64,
    /// Authoritative sequence.
    pub server_sequence: u64,
    /// Play payload, absent for deletes.
    pub play: Option<Play>,
    /// Audit trail.
    pub audit: Audit,
    /// Server clock at acceptance.
    pub received_at: SystemTime,
}

impl ScoreEventEntity {
    /// Wrap an in-memory event for storage.
    pub fn from_event(session_id: Uuid, event: &ScoreEvent) -> Self {
        Self {
            session_id,
            event_id: event.event_id,
            client_event_id: event.client_event_id.clone(),
            kind: event.kind,
            target_event_id: event.target_event_id,
            sequence: event.sequence,
            server_sequence: event.server_sequence,
            play: event.play.clone(),
            audit: event.audit.clone(),
            received_at: event.received_at,
        }
    }
}

impl From<ScoreEventEntity> for ScoreEvent {
    fn from(entity: ScoreEventEntity) -> Self {
        Self {
            event_id: entity.event_id,
            client_event_id: entity.client_event_id,
            kind: entity.kind,
            target_event_id: entity.target_event_id,
            sequence: entity.sequence,
            server_sequence: entity.server_sequence,
            play: entity.play,
            audit: entity.audit,
            received_at: entity.received_at,
        }
    }
}

/// Permanent aggregate written once a session is finalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalRecordEntity {
    /// Key: the finalized session.
    pub session_id: Uuid,
    /// Game or round that was scored.
    pub game_or_round_id: String,
    /// Owning tenant.
    pub account_id: String,
    /// User id of whoever started the session.
    pub started_by_id: String,
    /// Display name of whoever started the session.
    pub started_by_name: String,
    /// Session start time.
    pub started_at: SystemTime,
    /// Finalization time.
    pub finalized_at: SystemTime,
    /// Position of the last live play, or the session position when empty.
    pub final_position: Position,
    /// Final score.
    pub final_score: Scoreline,
    /// Plays that survived corrections, in log order.
    pub live_plays: Vec<LivePlay>,
    /// Number of events in the log.
    pub event_count: u64,
    /// Highest server sequence.
    pub head_sequence: u64,
}
