use std::time::SystemTime;

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::models::ScoreEventEntity,
    dto::live::SessionView,
    error::ServiceError,
    services::{
        session_service::{lookup, not_accepting},
        sse_events,
        storage_writer::PersistJob,
    },
    state::{
        SharedState,
        score::{Mutation, MutationInput, MutationKind, MutationOutcome, Play, ScoreEvent},
        session::Actor,
        store::SessionSlot,
    },
};

/// Result of a submission: the canonical outcome and whether it was newly applied.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Canonical outcome, identical across retries.
    pub outcome: MutationOutcome,
    /// `true` when the client event id had already been applied.
    pub replayed: bool,
}

impl Submission {
    /// Whether the applied event opened a new slot.
    pub fn is_create(&self) -> bool {
        self.outcome.kind == MutationKind::Create
    }
}

/// Apply one mutation to a session.
///
/// Everything runs under the session lock: idempotency lookup, state guard,
/// ordering check, append, refold and broadcast. Persistence is queued after.
pub async fn submit_mutation(
    state: &SharedState,
    session_id: Uuid,
    actor: &Actor,
    input: MutationInput,
) -> Result<Submission, ServiceError> {
    let handle = lookup(state, session_id, actor)?;
    let mut slot = handle.slot.lock().await;

    if let Some(outcome) = slot.applied(&input.client_event_id) {
        debug!(
            %session_id,
            client_event_id = %input.client_event_id,
            server_sequence = outcome.server_sequence,
            "replaying applied mutation"
        );
        return Ok(Submission {
            outcome: outcome.clone(),
            replayed: true,
        });
    }

    if !slot.session.accepts_mutations() {
        return Err(not_accepting(&slot));
    }

    let expected = slot.head_sequence() + 1;
    let tolerance = state.config().stale_sequence_tolerance();
    if input.sequence.saturating_add(tolerance) < expected {
        info!(
            %session_id,
            sequence = input.sequence,
            head = expected - 1,
            "stale mutation rejected"
        );
        return Err(ServiceError::stale(
            format!(
                "sequence {} is behind head {}; resync and retry",
                input.sequence,
                expected - 1
            ),
            SessionView::from(&*slot),
        ));
    }

    let (target_event_id, play) = resolve(state, &slot, &input.mutation)?;
    let event = ScoreEvent {
        event_id: Uuid::new_v4(),
        client_event_id: input.client_event_id,
        kind: input.mutation.kind(),
        target_event_id,
        sequence: input.sequence,
        server_sequence: expected,
        play,
        audit: input.audit,
        received_at: SystemTime::now(),
    };

    let outcome = slot.append(event.clone());
    info!(
        %session_id,
        server_sequence = outcome.server_sequence,
        kind = ?outcome.kind,
        device_id = %event.audit.device_id,
        "mutation applied"
    );

    sse_events::broadcast_score_event(state, &handle, &event, &outcome);
    state.enqueue_persist(PersistJob::AppendEvent(ScoreEventEntity::from_event(
        session_id, &event,
    )));
    state.enqueue_persist(PersistJob::session(&slot));

    Ok(Submission {
        outcome,
        replayed: false,
    })
}

/// Check the mutation against the current fold and return the target and play to log.
fn resolve(
    state: &SharedState,
    slot: &SessionSlot,
    mutation: &Mutation,
) -> Result<(Option<Uuid>, Option<Play>), ServiceError> {
    let fold = slot.fold();
    match mutation {
        Mutation::Create { play } => {
            let tolerance = state.config().position_correction_tolerance();
            if !play.position.is_reachable_from(&slot.session.position, tolerance) {
                return Err(ServiceError::invalid_state(
                    format!(
                        "play at position {} is behind the session position {}",
                        play.position.index, slot.session.position.index
                    ),
                    SessionView::from(slot),
                ));
            }
            Ok((None, Some(play.clone())))
        }
        Mutation::Update { target, play } => {
            let resolved = match target {
                Some(target) => fold.resolve(*target).map(|_| *target),
                None => fold.find_by_play_id(&play.play_id),
            };
            let Some(target) = resolved else {
                return Err(ServiceError::invalid_state(
                    format!("no live play to update for `{}`", play.play_id),
                    SessionView::from(slot),
                ));
            };
            Ok((Some(target), Some(play.clone())))
        }
        Mutation::Delete { target } => {
            if fold.resolve(*target).is_none() {
                return Err(ServiceError::invalid_state(
                    format!("event `{target}` is not a live play"),
                    SessionView::from(slot),
                ));
            }
            Ok((Some(*target), None))
        }
    }
}
