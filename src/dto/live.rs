//! Device-facing DTOs for live scoring. Every payload is camelCase JSON and
//! unknown fields are rejected.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    dao::models::FinalRecordEntity,
    dto::format_system_time,
    state::{
        lifecycle::SessionStatus,
        score::{
            Audit, Bases, FoldedState, LivePlay, Mutation, MutationInput, MutationKind,
            MutationOutcome, Play, ScoreEvent, Scoreline,
        },
        session::{Half, Position},
        store::SessionSlot,
    },
};

/// Half of an inning as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HalfDto {
    /// Visitors bat.
    Top,
    /// Home side bats.
    Bottom,
}

impl From<HalfDto> for Half {
    fn from(value: HalfDto) -> Self {
        match value {
            HalfDto::Top => Half::Top,
            HalfDto::Bottom => Half::Bottom,
        }
    }
}

impl From<Half> for HalfDto {
    fn from(value: Half) -> Self {
        match value {
            Half::Top => HalfDto::Top,
            Half::Bottom => HalfDto::Bottom,
        }
    }
}

/// Inning or hole pointer.
#[skip_serializing_none]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PositionDto {
    /// Inning or hole number, starting at 1.
    pub index: u32,
    /// Half, for sports that have one.
    pub half: Option<HalfDto>,
}

impl From<Position> for PositionDto {
    fn from(value: Position) -> Self {
        Self {
            index: value.index,
            half: value.half.map(Into::into),
        }
    }
}

/// Running score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ScorelineDto {
    /// Home side.
    pub home: u32,
    /// Visiting side.
    pub away: u32,
}

/// Occupied bases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct BasesDto {
    /// Runner on first.
    pub first: bool,
    /// Runner on second.
    pub second: bool,
    /// Runner on third.
    pub third: bool,
}

/// A scored play, used in requests and echoed back in views.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlayDto {
    /// Device-side play identifier.
    #[validate(length(min = 1, max = 128))]
    pub id: String,
    /// Inning or hole number.
    #[serde(alias = "inning", alias = "hole")]
    #[validate(range(min = 1))]
    pub position: u32,
    /// Half of the inning.
    #[serde(default)]
    pub half: Option<HalfDto>,
    /// Outs before the play.
    #[validate(range(max = 3))]
    pub outs_before: u8,
    /// Outs after the play.
    #[validate(range(max = 3))]
    pub outs_after: u8,
    /// Score after the play.
    pub score_after: ScorelineDto,
    /// Bases after the play.
    pub bases_after: BasesDto,
    /// Scorer notation.
    #[validate(length(max = 64))]
    pub notation: String,
    /// Human readable description.
    #[validate(length(max = 512))]
    pub summary: String,
    /// Who recorded the play.
    #[validate(length(min = 1))]
    pub created_by: String,
    /// Recording device.
    #[validate(length(min = 1))]
    pub device_id: String,
    /// Device clock, RFC 3339.
    #[validate(custom(function = "validate_rfc3339"))]
    pub created_at: String,
}

impl From<PlayDto> for Play {
    fn from(value: PlayDto) -> Self {
        Self {
            play_id: value.id,
            position: Position::new(value.position, value.half.map(Into::into)),
            outs_before: value.outs_before,
            outs_after: value.outs_after,
            score_after: Scoreline {
                home: value.score_after.home,
                away: value.score_after.away,
            },
            bases_after: value.bases_after.into(),
            notation: value.notation,
            summary: value.summary,
            created_by: value.created_by,
            device_id: value.device_id,
            created_at: value.created_at,
        }
    }
}

impl From<&Play> for PlayDto {
    fn from(value: &Play) -> Self {
        Self {
            id: value.play_id.clone(),
            position: value.position.index,
            half: value.position.half.map(Into::into),
            outs_before: value.outs_before,
            outs_after: value.outs_after,
            score_after: value.score_after.into(),
            bases_after: value.bases_after.into(),
            notation: value.notation.clone(),
            summary: value.summary.clone(),
            created_by: value.created_by.clone(),
            device_id: value.device_id.clone(),
            created_at: value.created_at.clone(),
        }
    }
}

impl From<Scoreline> for ScorelineDto {
    fn from(value: Scoreline) -> Self {
        Self {
            home: value.home,
            away: value.away,
        }
    }
}

impl From<Bases> for BasesDto {
    fn from(value: Bases) -> Self {
        Self {
            first: value.first,
            second: value.second,
            third: value.third,
        }
    }
}

impl From<BasesDto> for Bases {
    fn from(value: BasesDto) -> Self {
        Self {
            first: value.first,
            second: value.second,
            third: value.third,
        }
    }
}

/// Who submitted a mutation, from where and when.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditDto {
    /// Actor display name.
    #[validate(length(min = 1))]
    pub user_name: String,
    /// Originating device.
    #[validate(length(min = 1))]
    pub device_id: String,
    /// Client clock, RFC 3339.
    #[validate(custom(function = "validate_rfc3339"))]
    pub timestamp: String,
}

impl From<AuditDto> for Audit {
    fn from(value: AuditDto) -> Self {
        Self {
            user_name: value.user_name,
            device_id: value.device_id,
            timestamp: value.timestamp,
        }
    }
}

impl From<&Audit> for AuditDto {
    fn from(value: &Audit) -> Self {
        Self {
            user_name: value.user_name.clone(),
            device_id: value.device_id.clone(),
            timestamp: value.timestamp.clone(),
        }
    }
}

/// Mutation kind on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    /// New play.
    Create,
    /// Correction of an earlier play.
    Update,
    /// Removal of an earlier play.
    Delete,
}

impl From<MutationKind> for MutationType {
    fn from(value: MutationKind) -> Self {
        match value {
            MutationKind::Create => MutationType::Create,
            MutationKind::Update => MutationType::Update,
            MutationKind::Delete => MutationType::Delete,
        }
    }
}

/// Score mutation submitted by a scorekeeper device.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScoreMutationRequest {
    /// `create`, `update` or `delete`.
    #[serde(rename = "type")]
    pub kind: MutationType,
    /// Caller-assigned id; retries reuse it.
    #[validate(length(min = 1, max = 128))]
    pub client_event_id: String,
    /// Event being corrected or deleted.
    #[serde(default)]
    pub server_event_id: Option<Uuid>,
    /// Proposed sequence, normally head + 1.
    pub sequence: u64,
    /// Play payload, required unless deleting.
    #[serde(default)]
    #[validate(nested)]
    pub event: Option<PlayDto>,
    /// Audit trail.
    #[validate(nested)]
    pub audit: AuditDto,
}

/// Shape errors that field validation cannot express.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationShapeError {
    /// `event` missing on create or update.
    #[error("`event` is required for {0:?} mutations")]
    MissingEvent(MutationType),
    /// `event` sent with a delete.
    #[error("`event` must be omitted for delete mutations")]
    UnexpectedEvent,
    /// `serverEventId` missing on delete.
    #[error("`serverEventId` is required for delete mutations")]
    MissingTarget,
    /// `serverEventId` sent with a create.
    #[error("`serverEventId` must be omitted for create mutations")]
    UnexpectedTarget,
}

impl TryFrom<ScoreMutationRequest> for MutationInput {
    type Error = MutationShapeError;

    fn try_from(value: ScoreMutationRequest) -> Result<Self, Self::Error> {
        let mutation = match (value.kind, value.server_event_id, value.event) {
            (MutationType::Create, Some(_), _) => return Err(MutationShapeError::UnexpectedTarget),
            (MutationType::Create, None, Some(play)) => Mutation::Create { play: play.into() },
            (MutationType::Update, target, Some(play)) => Mutation::Update {
                target,
                play: play.into(),
            },
            (kind @ (MutationType::Create | MutationType::Update), _, None) => {
                return Err(MutationShapeError::MissingEvent(kind));
            }
            (MutationType::Delete, _, Some(_)) => return Err(MutationShapeError::UnexpectedEvent),
            (MutationType::Delete, None, None) => return Err(MutationShapeError::MissingTarget),
            (MutationType::Delete, Some(target), None) => Mutation::Delete { target },
        };

        Ok(Self {
            client_event_id: value.client_event_id,
            sequence: value.sequence,
            mutation,
            audit: value.audit.into(),
        })
    }
}

/// Slot of the folded state.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LivePlayView {
    /// Create event that opened the slot.
    pub slot_id: Uuid,
    /// Event whose play currently fills the slot.
    pub event_id: Uuid,
    /// Current play.
    pub play: PlayDto,
}

impl From<&LivePlay> for LivePlayView {
    fn from(value: &LivePlay) -> Self {
        Self {
            slot_id: value.slot_id,
            event_id: value.event_id,
            play: (&value.play).into(),
        }
    }
}

/// Materialized session state.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FoldedStateView {
    /// Position of the last live play.
    pub position: Option<PositionDto>,
    /// Current score.
    pub score: ScorelineDto,
    /// Current outs.
    pub outs: u8,
    /// Current bases.
    pub bases: BasesDto,
    /// Notation of the last live play.
    pub last_notation: Option<String>,
    /// Live plays in log order.
    pub live_plays: Vec<LivePlayView>,
    /// Highest applied server sequence.
    pub head_sequence: u64,
    /// Number of events in the log.
    pub event_count: u64,
}

impl From<&FoldedState> for FoldedStateView {
    fn from(value: &FoldedState) -> Self {
        Self {
            position: value.position.map(Into::into),
            score: value.score.into(),
            outs: value.outs,
            bases: value.bases.into(),
            last_notation: value.last_notation.clone(),
            live_plays: value.live_plays.iter().map(Into::into).collect(),
            head_sequence: value.head_sequence,
            event_count: value.event_count,
        }
    }
}

/// Canonical result of an applied mutation.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MutationResponse {
    /// Canonical event id.
    pub server_event_id: Uuid,
    /// Canonical sequence.
    pub server_sequence: u64,
    /// Kind of the applied event.
    #[serde(rename = "type")]
    pub kind: MutationType,
    /// Folded state right after the event.
    pub state: FoldedStateView,
}

impl From<&MutationOutcome> for MutationResponse {
    fn from(value: &MutationOutcome) -> Self {
        Self {
            server_event_id: value.server_event_id,
            server_sequence: value.server_sequence,
            kind: value.kind.into(),
            state: (&value.state).into(),
        }
    }
}

/// Session as returned by the API and embedded in rejections.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// Session id.
    pub session_id: Uuid,
    /// Game or round.
    pub game_or_round_id: String,
    /// Owning tenant.
    pub account_id: String,
    /// Lifecycle status.
    #[schema(value_type = String, example = "active")]
    pub status: SessionStatus,
    /// Current inning or hole.
    pub position: PositionDto,
    /// User id of the starter.
    pub started_by_id: String,
    /// Display name of the starter.
    pub started_by_name: String,
    /// RFC 3339 start time.
    pub started_at: String,
    /// RFC 3339 time of the last accepted change.
    pub last_activity_at: String,
    /// Whether a finalize is waiting to be retried.
    pub finalize_requested: bool,
    /// Folded state.
    pub state: FoldedStateView,
}

impl From<&SessionSlot> for SessionView {
    fn from(slot: &SessionSlot) -> Self {
        let session = &slot.session;
        Self {
            session_id: session.id,
            game_or_round_id: session.game_or_round_id.clone(),
            account_id: session.account_id.clone(),
            status: session.status(),
            position: session.position.into(),
            started_by_id: session.started_by_id.clone(),
            started_by_name: session.started_by_name.clone(),
            started_at: format_system_time(session.started_at),
            last_activity_at: format_system_time(session.last_activity_at),
            finalize_requested: session.finalize_requested,
            state: slot.fold().state().into(),
        }
    }
}

/// One entry of the event log.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEventView {
    /// Canonical event id.
    pub server_event_id: Uuid,
    /// Caller-assigned id.
    pub client_event_id: String,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: MutationType,
    /// Corrected or deleted event.
    pub target_event_id: Option<Uuid>,
    /// Client sequence hint.
    pub sequence: u64,
    /// Canonical sequence.
    pub server_sequence: u64,
    /// Play payload.
    pub event: Option<PlayDto>,
    /// Audit trail.
    pub audit: AuditDto,
    /// RFC 3339 server receive time.
    pub received_at: String,
}

impl From<&ScoreEvent> for ScoreEventView {
    fn from(value: &ScoreEvent) -> Self {
        Self {
            server_event_id: value.event_id,
            client_event_id: value.client_event_id.clone(),
            kind: value.kind.into(),
            target_event_id: value.target_event_id,
            sequence: value.sequence,
            server_sequence: value.server_sequence,
            event: value.play.as_ref().map(Into::into),
            audit: (&value.audit).into(),
            received_at: format_system_time(value.received_at),
        }
    }
}

/// Permanent record produced by finalization.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalRecordView {
    /// Finalized session.
    pub session_id: Uuid,
    /// Game or round.
    pub game_or_round_id: String,
    /// Owning tenant.
    pub account_id: String,
    /// User id of the starter.
    pub started_by_id: String,
    /// Display name of the starter.
    pub started_by_name: String,
    /// RFC 3339 start time.
    pub started_at: String,
    /// RFC 3339 finalization time.
    pub finalized_at: String,
    /// Final inning or hole.
    pub final_position: PositionDto,
    /// Final score.
    pub final_score: ScorelineDto,
    /// Surviving plays.
    pub live_plays: Vec<LivePlayView>,
    /// Number of events in the log.
    pub event_count: u64,
    /// Highest server sequence.
    pub head_sequence: u64,
}

impl From<&FinalRecordEntity> for FinalRecordView {
    fn from(value: &FinalRecordEntity) -> Self {
        Self {
            session_id: value.session_id,
            game_or_round_id: value.game_or_round_id.clone(),
            account_id: value.account_id.clone(),
            started_by_id: value.started_by_id.clone(),
            started_by_name: value.started_by_name.clone(),
            started_at: format_system_time(value.started_at),
            finalized_at: format_system_time(value.finalized_at),
            final_position: value.final_position.into(),
            final_score: value.final_score.into(),
            live_plays: value.live_plays.iter().map(Into::into).collect(),
            event_count: value.event_count,
            head_sequence: value.head_sequence,
        }
    }
}

/// Request to start a session.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StartSessionRequest {
    /// Game or round to score.
    #[validate(length(min = 1, max = 128))]
    pub game_or_round_id: String,
    /// Initial inning or hole, 1 when omitted.
    #[serde(default, alias = "inning", alias = "hole")]
    #[validate(range(min = 1))]
    pub position: Option<u32>,
    /// Initial half.
    #[serde(default)]
    pub half: Option<HalfDto>,
}

impl StartSessionRequest {
    /// Initial position, defaulting to the first inning or hole.
    pub fn initial_position(&self) -> Position {
        Position::new(self.position.unwrap_or(1), self.half.map(Into::into))
    }
}

/// Request to move the session pointer.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AdvancePositionRequest {
    /// Target inning or hole.
    #[serde(alias = "inning", alias = "hole")]
    #[validate(range(min = 1))]
    pub position: u32,
    /// Target half.
    #[serde(default)]
    pub half: Option<HalfDto>,
}

impl AdvancePositionRequest {
    /// Requested position.
    pub fn target(&self) -> Position {
        Position::new(self.position, self.half.map(Into::into))
    }
}

/// Lightweight probe answering whether a stream is worth opening.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusProbe {
    /// Whether a live session exists for the game or round.
    pub has_active_session: bool,
    /// Live session id.
    pub session_id: Option<Uuid>,
    /// Status of the live session.
    #[schema(value_type = Option<String>)]
    pub status: Option<SessionStatus>,
    /// Open streams on the game scope.
    pub viewer_count: Option<usize>,
}

fn validate_rfc3339(value: &str) -> Result<(), ValidationError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_ok() {
        return Ok(());
    }
    let mut err = ValidationError::new("rfc3339");
    err.message = Some(format!("`{value}` is not an RFC 3339 timestamp").into());
    Err(err)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn play_json() -> serde_json::Value {
        json!({
            "id": "play-1",
            "inning": 3,
            "half": "top",
            "outsBefore": 1,
            "outsAfter": 2,
            "scoreAfter": {"home": 1, "away": 0},
            "basesAfter": {"first": true, "second": false, "third": false},
            "notation": "6-3",
            "summary": "ground out",
            "createdBy": "Scorer",
            "deviceId": "ipad-1",
            "createdAt": "2026-05-01T18:00:00Z"
        })
    }

    fn audit_json() -> serde_json::Value {
        json!({"userName": "Scorer", "deviceId": "ipad-1", "timestamp": "2026-05-01T18:00:01Z"})
    }

    fn request(value: serde_json::Value) -> ScoreMutationRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn create_request_becomes_typed_mutation() {
        let req = request(json!({
            "type": "create",
            "clientEventId": "c-1",
            "sequence": 4,
            "event": play_json(),
            "audit": audit_json()
        }));
        assert!(req.validate().is_ok());

        let input = MutationInput::try_from(req).unwrap();
        assert_eq!(input.sequence, 4);
        let Mutation::Create { play } = input.mutation else {
            panic!("expected create");
        };
        assert_eq!(play.position, Position::new(3, Some(Half::Top)));
        assert_eq!(play.score_after.home, 1);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_value::<ScoreMutationRequest>(json!({
            "type": "create",
            "clientEventId": "c-1",
            "sequence": 4,
            "event": play_json(),
            "audit": audit_json(),
            "extra": true
        }));
        assert!(result.is_err());
    }

    #[test]
    fn too_many_outs_fail_validation() {
        let mut play = play_json();
        play["outsAfter"] = json!(4);
        let req = request(json!({
            "type": "create",
            "clientEventId": "c-1",
            "sequence": 0,
            "event": play,
            "audit": audit_json()
        }));
        assert!(req.validate().is_err());
    }

    #[test]
    fn empty_audit_and_bad_timestamp_fail_validation() {
        let req = request(json!({
            "type": "delete",
            "clientEventId": "c-2",
            "serverEventId": Uuid::new_v4(),
            "sequence": 0,
            "audit": {"userName": "", "deviceId": "ipad-1", "timestamp": "yesterday"}
        }));
        let errors = req.validate().unwrap_err();
        assert!(errors.errors().contains_key("audit"));
        let audit_errors = req.audit.validate().unwrap_err();
        assert!(audit_errors.field_errors().contains_key("user_name"));
        assert!(audit_errors.field_errors().contains_key("timestamp"));
    }

    #[test]
    fn shape_rules_per_kind() {
        let delete_without_target = request(json!({
            "type": "delete",
            "clientEventId": "c",
            "sequence": 0,
            "audit": audit_json()
        }));
        assert_eq!(
            MutationInput::try_from(delete_without_target).unwrap_err(),
            MutationShapeError::MissingTarget
        );

        let update_without_event = request(json!({
            "type": "update",
            "clientEventId": "c",
            "serverEventId": Uuid::new_v4(),
            "sequence": 0,
            "audit": audit_json()
        }));
        assert_eq!(
            MutationInput::try_from(update_without_event).unwrap_err(),
            MutationShapeError::MissingEvent(MutationType::Update)
        );

        let create_with_target = request(json!({
            "type": "create",
            "clientEventId": "c",
            "serverEventId": Uuid::new_v4(),
            "sequence": 0,
            "event": play_json(),
            "audit": audit_json()
        }));
        assert_eq!(
            MutationInput::try_from(create_with_target).unwrap_err(),
            MutationShapeError::UnexpectedTarget
        );
    }

    #[test]
    fn update_without_target_resolves_later() {
        let req = request(json!({
            "type": "update",
            "clientEventId": "c",
            "sequence": 2,
            "event": play_json(),
            "audit": audit_json()
        }));
        let input = MutationInput::try_from(req).unwrap();
        assert!(matches!(input.mutation, Mutation::Update { target: None, .. }));
    }

    #[test]
    fn start_request_defaults_to_first_position() {
        let req: StartSessionRequest =
            serde_json::from_value(json!({"gameOrRoundId": "g-1"})).unwrap();
        assert_eq!(req.initial_position(), Position::new(1, None));

        let hole: StartSessionRequest =
            serde_json::from_value(json!({"gameOrRoundId": "r-1", "hole": 10})).unwrap();
        assert_eq!(hole.initial_position().index, 10);
    }
}
