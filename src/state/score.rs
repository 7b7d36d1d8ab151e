//! Score events and the fold that turns an ordered event log into live state.

use std::{collections::HashMap, time::SystemTime};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::Position;

/// Kind of an appended score event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Opens a new play slot.
    Create,
    /// Replaces the play held by an existing slot.
    Update,
    /// Removes an existing slot.
    Delete,
}

/// Running score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scoreline {
    /// Home side.
    pub home: u32,
    /// Visiting side.
    pub away: u32,
}

/// Occupied bases after a play.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bases {
    /// Runner on first.
    pub first: bool,
    /// Runner on second.
    pub second: bool,
    /// Runner on third.
    pub third: bool,
}

/// One scored play as submitted by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Play {
    /// Device-side play identifier, stable across corrections.
    pub play_id: String,
    /// Where the play happened.
    pub position: Position,
    /// Outs before the play.
    pub outs_before: u8,
    /// Outs after the play.
    pub outs_after: u8,
    /// Score after the play.
    pub score_after: Scoreline,
    /// Bases after the play.
    pub bases_after: Bases,
    /// Scorer notation, e.g. `6-3`.
    pub notation: String,
    /// Human readable description.
    pub summary: String,
    /// Who recorded the play on the device.
    pub created_by: String,
    /// Recording device.
    pub device_id: String,
    /// Device clock, RFC 3339.
    pub created_at: String,
}

/// Audit trail attached to every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    /// Actor display name.
    pub user_name: String,
    /// Originating device.
    pub device_id: String,
    /// Client-observed timestamp, RFC 3339.
    pub timestamp: String,
}

/// Validated mutation, the only shape the ingestion pipeline accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Append a new play.
    Create {
        /// The play to add.
        play: Play,
    },
    /// Correct an earlier play. Without a target the latest live slot with the
    /// same `play_id` is corrected.
    Update {
        /// Event being corrected.
        target: Option<Uuid>,
        /// Replacement play.
        play: Play,
    },
    /// Remove an earlier play.
    Delete {
        /// Event being removed.
        target: Uuid,
    },
}

impl Mutation {
    /// Event kind produced by this mutation.
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Create { .. } => MutationKind::Create,
            Mutation::Update { .. } => MutationKind::Update,
            Mutation::Delete { .. } => MutationKind::Delete,
        }
    }
}

/// Mutation plus the envelope fields used for ordering and idempotency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationInput {
    /// Caller-assigned id used to detect retries.
    pub client_event_id: String,
    /// Proposed sequence, normally head + 1; advisory only.
    pub sequence: u64,
    /// What to do.
    pub mutation: Mutation,
    /// Who did it.
    pub audit: Audit,
}

/// Immutable entry of a session's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEvent {
    /// Server-assigned canonical id.
    pub event_id: Uuid,
    /// Caller-assigned id.
    pub client_event_id: String,
    /// Event kind.
    pub kind: MutationKind,
    /// Resolved target for updates and deletes.
    pub target_event_id: Option<Uuid>,
    /// Client sequence hint as submitted.
    pub sequence: u64,
    /// Authoritative, gap-free position in the log, starting at 1.
    pub server_sequence: u64,
    /// Play payload, absent for deletes.
    pub play: Option<Play>,
    /// Audit trail.
    pub audit: Audit,
    /// Server clock at acceptance.
    pub received_at: SystemTime,
}

/// A live slot of the folded state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivePlay {
    /// Id of the create event that opened the slot.
    pub slot_id: Uuid,
    /// Id of the event whose play currently fills the slot.
    pub event_id: Uuid,
    /// Current play.
    pub play: Play,
}

/// Materialized state derived from the event log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldedState {
    /// Position of the last live play.
    pub position: Option<Position>,
    /// Score after the last live play.
    pub score: Scoreline,
    /// Outs after the last live play.
    pub outs: u8,
    /// Bases after the last live play.
    pub bases: Bases,
    /// Notation of the last live play.
    pub last_notation: Option<String>,
    /// Live plays in log order.
    pub live_plays: Vec<LivePlay>,
    /// Highest applied server sequence, 0 when empty.
    pub head_sequence: u64,
    /// Number of events in the log, tombstones included.
    pub event_count: u64,
}

/// Fold result plus the lookup tables ingestion needs to resolve targets.
#[derive(Debug, Clone, Default)]
pub struct Fold {
    state: FoldedState,
    roots: HashMap<Uuid, Uuid>,
    slots: IndexMap<Uuid, LivePlay>,
}

impl Fold {
    /// Folded view.
    pub fn state(&self) -> &FoldedState {
        &self.state
    }

    /// Slot id that `event_id` belongs to, if that slot is still live.
    pub fn resolve(&self, event_id: Uuid) -> Option<Uuid> {
        self.roots
            .get(&event_id)
            .copied()
            .filter(|root| self.slots.contains_key(root))
    }

    /// Slot id of the most recent live slot holding `play_id`.
    pub fn find_by_play_id(&self, play_id: &str) -> Option<Uuid> {
        self.slots
            .values()
            .rev()
            .find(|slot| slot.play.play_id == play_id)
            .map(|slot| slot.slot_id)
    }
}

/// Reduce an event log into its current state.
///
/// Events are applied in `server_sequence` order whatever order they are
/// passed in. Events targeting a removed or unknown slot are skipped.
pub fn fold(events: &[ScoreEvent]) -> Fold {
    let mut ordered: Vec<&ScoreEvent> = events.iter().collect();
    ordered.sort_by_key(|event| event.server_sequence);

    let mut roots: HashMap<Uuid, Uuid> = HashMap::with_capacity(ordered.len());
    let mut slots: IndexMap<Uuid, LivePlay> = IndexMap::new();

    for event in &ordered {
        match (event.kind, event.play.as_ref()) {
            (MutationKind::Create, Some(play)) => {
                roots.insert(event.event_id, event.event_id);
                slots.insert(
                    event.event_id,
                    LivePlay {
                        slot_id: event.event_id,
                        event_id: event.event_id,
                        play: play.clone(),
                    },
                );
            }
            (MutationKind::Update, Some(play)) => {
                let Some(root) = event.target_event_id.and_then(|t| roots.get(&t).copied())
                else {
                    continue;
                };
                roots.insert(event.event_id, root);
                if let Some(slot) = slots.get_mut(&root) {
                    slot.event_id = event.event_id;
                    slot.play = play.clone();
                }
            }
            (MutationKind::Delete, _) => {
                let Some(root) = event.target_event_id.and_then(|t| roots.get(&t).copied())
                else {
                    continue;
                };
                roots.insert(event.event_id, root);
                slots.shift_remove(&root);
            }
            // create/update without a play never reach the log
            _ => {}
        }
    }

    let last = slots.values().last().map(|slot| &slot.play);
    let state = FoldedState {
        position: last.map(|play| play.position),
        score: last.map(|play| play.score_after).unwrap_or_default(),
        outs: last.map(|play| play.outs_after).unwrap_or_default(),
        bases: last.map(|play| play.bases_after).unwrap_or_default(),
        last_notation: last.map(|play| play.notation.clone()),
        live_plays: slots.values().cloned().collect(),
        head_sequence: ordered.last().map(|e| e.server_sequence).unwrap_or(0),
        event_count: ordered.len() as u64,
    };

    Fold {
        state,
        roots,
        slots,
    }
}

/// Result of an applied mutation, replayed verbatim on retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Canonical id of the appended event.
    pub server_event_id: Uuid,
    /// Canonical position of the appended event.
    pub server_sequence: u64,
    /// Kind of the appended event.
    pub kind: MutationKind,
    /// Folded state right after the event was applied.
    pub state: FoldedState,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::state::session::Half;

    pub(crate) fn play(play_id: &str, index: u32, home: u32, away: u32) -> Play {
        Play {
            play_id: play_id.into(),
            position: Position::new(index, Some(Half::Top)),
            outs_before: 0,
            outs_after: 1,
            score_after: Scoreline { home, away },
            bases_after: Bases::default(),
            notation: format!("K-{play_id}"),
            summary: "strikeout".into(),
            created_by: "scorer".into(),
            device_id: "device-a".into(),
            created_at: "2026-05-01T18:00:00Z".into(),
        }
    }

    pub(crate) fn audit() -> Audit {
        Audit {
            user_name: "Scorer".into(),
            device_id: "device-a".into(),
            timestamp: "2026-05-01T18:00:00Z".into(),
        }
    }

    fn event(
        seq: u64,
        kind: MutationKind,
        target: Option<Uuid>,
        play: Option<Play>,
    ) -> ScoreEvent {
        ScoreEvent {
            event_id: Uuid::new_v4(),
            client_event_id: format!("c-{seq}"),
            kind,
            target_event_id: target,
            sequence: seq,
            server_sequence: seq,
            play,
            audit: audit(),
            received_at: SystemTime::now(),
        }
    }

    #[test]
    fn empty_log_folds_to_default() {
        let folded = fold(&[]);
        assert_eq!(folded.state(), &FoldedState::default());
    }

    #[test]
    fn creates_accumulate_and_derive_from_last() {
        let a = event(1, MutationKind::Create, None, Some(play("p1", 1, 0, 0)));
        let b = event(2, MutationKind::Create, None, Some(play("p2", 2, 1, 0)));
        let folded = fold(&[a, b]);

        let state = folded.state();
        assert_eq!(state.live_plays.len(), 2);
        assert_eq!(state.score, Scoreline { home: 1, away: 0 });
        assert_eq!(state.position, Some(Position::new(2, Some(Half::Top))));
        assert_eq!(state.last_notation.as_deref(), Some("K-p2"));
        assert_eq!(state.head_sequence, 2);
    }

    #[test]
    fn update_replaces_slot_in_place() {
        let a = event(1, MutationKind::Create, None, Some(play("p1", 1, 0, 0)));
        let b = event(2, MutationKind::Create, None, Some(play("p2", 1, 0, 0)));
        let fix = event(
            3,
            MutationKind::Update,
            Some(a.event_id),
            Some(play("p1", 1, 2, 0)),
        );
        let fix_of_fix = event(
            4,
            MutationKind::Update,
            Some(fix.event_id),
            Some(play("p1", 1, 3, 0)),
        );
        let slot_a = a.event_id;
        let folded = fold(&[a, b, fix, fix_of_fix.clone()]);

        let state = folded.state();
        assert_eq!(state.live_plays.len(), 2);
        assert_eq!(state.live_plays[0].slot_id, slot_a);
        assert_eq!(state.live_plays[0].event_id, fix_of_fix.event_id);
        assert_eq!(state.live_plays[0].play.score_after.home, 3);
        // derived fields still come from the last slot
        assert_eq!(state.score.home, 0);
        assert_eq!(state.event_count, 4);
        assert_eq!(folded.resolve(fix_of_fix.event_id), Some(slot_a));
    }

    #[test]
    fn delete_removes_slot_and_later_targets_are_ignored() {
        let a = event(1, MutationKind::Create, None, Some(play("p1", 1, 1, 0)));
        let b = event(2, MutationKind::Create, None, Some(play("p2", 1, 2, 0)));
        let del = event(3, MutationKind::Delete, Some(b.event_id), None);
        let late = event(
            4,
            MutationKind::Update,
            Some(b.event_id),
            Some(play("p2", 1, 9, 9)),
        );
        let b_id = b.event_id;
        let folded = fold(&[a, b, del, late]);

        let state = folded.state();
        assert_eq!(state.live_plays.len(), 1);
        assert_eq!(state.score.home, 1);
        assert_eq!(folded.resolve(b_id), None);
        assert_eq!(state.head_sequence, 4);
    }

    #[test]
    fn fold_is_order_independent_of_input() {
        let a = event(1, MutationKind::Create, None, Some(play("p1", 1, 0, 0)));
        let b = event(2, MutationKind::Create, None, Some(play("p2", 2, 5, 4)));
        let forward = fold(&[a.clone(), b.clone()]);
        let backward = fold(&[b, a]);
        assert_eq!(forward.state(), backward.state());
    }

    #[test]
    fn find_by_play_id_picks_latest_live_slot() {
        let a = event(1, MutationKind::Create, None, Some(play("p1", 1, 0, 0)));
        let b = event(2, MutationKind::Create, None, Some(play("p1", 2, 0, 0)));
        let b_id = b.event_id;
        let folded = fold(&[a, b]);
        assert_eq!(folded.find_by_play_id("p1"), Some(b_id));
        assert_eq!(folded.find_by_play_id("missing"), None);
    }
}
