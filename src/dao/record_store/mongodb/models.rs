use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::{
    dao::models::{FinalRecordEntity, ScoreEventEntity, SessionEntity},
    state::{
        lifecycle::SessionStatus,
        score::{Audit, LivePlay, MutationKind, Play, Scoreline},
        session::Position,
    },
};

pub const SESSION_COLLECTION_NAME: &str = "live_sessions";
pub const EVENT_COLLECTION_NAME: &str = "live_events";
pub const RECORD_COLLECTION_NAME: &str = "final_records";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    game_or_round_id: String,
    account_id: String,
    status: SessionStatus,
    position: Position,
    started_by_id: String,
    started_by_name: String,
    started_at: DateTime,
    last_activity_at: DateTime,
    #[serde(default)]
    finalize_requested: bool,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_or_round_id: value.game_or_round_id,
            account_id: value.account_id,
            status: value.status,
            position: value.position,
            started_by_id: value.started_by_id,
            started_by_name: value.started_by_name,
            started_at: DateTime::from_system_time(value.started_at),
            last_activity_at: DateTime::from_system_time(value.last_activity_at),
            finalize_requested: value.finalize_requested,
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(SESSION_COLLECTION_NAME, &value.id)?,
            game_or_round_id: value.game_or_round_id,
            account_id: value.account_id,
            status: value.status,
            position: value.position,
            started_by_id: value.started_by_id,
            started_by_name: value.started_by_name,
            started_at: value.started_at.to_system_time(),
            last_activity_at: value.last_activity_at.to_system_time(),
            finalize_requested: value.finalize_requested,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoEventDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    event_id: String,
    client_event_id: String,
    kind: MutationKind,
    target_event_id: Option<String>,
    sequence: i64,
    server_sequence: i64,
    play: Option<Play>,
    audit: Audit,
    received_at: DateTime,
}

impl From<ScoreEventEntity> for MongoEventDocument {
    fn from(value: ScoreEventEntity) -> Self {
        Self {
            id: event_doc_key(value.session_id, value.server_sequence),
            session_id: value.session_id.to_string(),
            event_id: value.event_id.to_string(),
            client_event_id: value.client_event_id,
            kind: value.kind,
            target_event_id: value.target_event_id.map(|id| id.to_string()),
            sequence: clamp_i64(value.sequence),
            server_sequence: clamp_i64(value.server_sequence),
            play: value.play,
            audit: value.audit,
            received_at: DateTime::from_system_time(value.received_at),
        }
    }
}

impl TryFrom<MongoEventDocument> for ScoreEventEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoEventDocument) -> MongoResult<Self> {
        let target_event_id = value
            .target_event_id
            .as_deref()
            .map(|id| parse_id(EVENT_COLLECTION_NAME, id))
            .transpose()?;
        Ok(Self {
            session_id: parse_id(EVENT_COLLECTION_NAME, &value.session_id)?,
            event_id: parse_id(EVENT_COLLECTION_NAME, &value.event_id)?,
            client_event_id: value.client_event_id,
            kind: value.kind,
            target_event_id,
            sequence: value.sequence.max(0) as u64,
            server_sequence: value.server_sequence.max(0) as u64,
            play: value.play,
            audit: value.audit,
            received_at: value.received_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoLivePlay {
    slot_id: String,
    event_id: String,
    play: Play,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRecordDocument {
    #[serde(rename = "_id")]
    id: String,
    game_or_round_id: String,
    account_id: String,
    started_by_id: String,
    started_by_name: String,
    started_at: DateTime,
    finalized_at: DateTime,
    final_position: Position,
    final_score: Scoreline,
    live_plays: Vec<MongoLivePlay>,
    event_count: i64,
    head_sequence: i64,
}

impl From<FinalRecordEntity> for MongoRecordDocument {
    fn from(value: FinalRecordEntity) -> Self {
        Self {
            id: value.session_id.to_string(),
            game_or_round_id: value.game_or_round_id,
            account_id: value.account_id,
            started_by_id: value.started_by_id,
            started_by_name: value.started_by_name,
            started_at: DateTime::from_system_time(value.started_at),
            finalized_at: DateTime::from_system_time(value.finalized_at),
            final_position: value.final_position,
            final_score: value.final_score,
            live_plays: value
                .live_plays
                .into_iter()
                .map(|slot| MongoLivePlay {
                    slot_id: slot.slot_id.to_string(),
                    event_id: slot.event_id.to_string(),
                    play: slot.play,
                })
                .collect(),
            event_count: clamp_i64(value.event_count),
            head_sequence: clamp_i64(value.head_sequence),
        }
    }
}

impl TryFrom<MongoRecordDocument> for FinalRecordEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoRecordDocument) -> MongoResult<Self> {
        let live_plays = value
            .live_plays
            .into_iter()
            .map(|slot| {
                Ok(LivePlay {
                    slot_id: parse_id(RECORD_COLLECTION_NAME, &slot.slot_id)?,
                    event_id: parse_id(RECORD_COLLECTION_NAME, &slot.event_id)?,
                    play: slot.play,
                })
            })
            .collect::<MongoResult<Vec<_>>>()?;

        Ok(Self {
            session_id: parse_id(RECORD_COLLECTION_NAME, &value.id)?,
            game_or_round_id: value.game_or_round_id,
            account_id: value.account_id,
            started_by_id: value.started_by_id,
            started_by_name: value.started_by_name,
            started_at: value.started_at.to_system_time(),
            finalized_at: value.finalized_at.to_system_time(),
            final_position: value.final_position,
            final_score: value.final_score,
            live_plays,
            event_count: value.event_count.max(0) as u64,
            head_sequence: value.head_sequence.max(0) as u64,
        })
    }
}

/// Event documents are keyed by session and sequence so replays overwrite themselves.
pub fn event_doc_key(session_id: Uuid, server_sequence: u64) -> String {
    format!("{session_id}:{server_sequence:020}")
}

pub fn doc_id(id: impl ToString) -> Document {
    doc! {"_id": id.to_string()}
}

fn parse_id(collection: &'static str, value: &str) -> MongoResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| MongoDaoError::InvalidId {
        collection,
        value: value.to_owned(),
    })
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_keys_sort_by_sequence() {
        let session = Uuid::new_v4();
        assert!(event_doc_key(session, 9) < event_doc_key(session, 10));
    }
}
