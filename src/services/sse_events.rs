use serde::Serialize;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::{
    dto::{
        live::{MutationResponse, ScoreEventView, SessionView},
        sse::{
            ConnectedEvent, NoSessionEvent, PositionChangedEvent, ScoreEventPayload, ServerEvent,
            SessionStatusEvent,
        },
    },
    state::{
        SharedState,
        score::{MutationOutcome, ScoreEvent},
        store::{SessionHandle, SessionSlot},
        tickets::StreamScope,
    },
};

pub(crate) const EVENT_CONNECTED: &str = "connected";
pub(crate) const EVENT_STATE: &str = "state";
pub(crate) const EVENT_NO_SESSION: &str = "no_session";
pub(crate) const EVENT_SESSION_STARTED: &str = "session_started";
pub(crate) const EVENT_SCORE_EVENT: &str = "score_event";
pub(crate) const EVENT_POSITION_CHANGED: &str = "position_changed";
pub(crate) const EVENT_SESSION_STATUS: &str = "session_status";

/// Every scope that follows a session.
pub fn scopes_of(handle: &SessionHandle) -> [StreamScope; 3] {
    [
        StreamScope::Session(handle.id),
        StreamScope::game(handle.account_id.as_str(), handle.game_or_round_id.as_str()),
        StreamScope::Account(handle.account_id.clone()),
    ]
}

/// First event of a stream.
pub fn connected_event(client_id: Uuid, scope: &StreamScope, degraded: bool) -> Option<ServerEvent> {
    build(
        EVENT_CONNECTED,
        &ConnectedEvent {
            client_id,
            scope: scope.to_string(),
            degraded,
        },
    )
}

/// Snapshot of a session, sent right after `connected`.
pub fn state_event(slot: &SessionSlot) -> Option<ServerEvent> {
    build(EVENT_STATE, &SessionView::from(slot))
}

/// Sent instead of a snapshot when the scope has nothing live.
pub fn no_session_event(scope: &StreamScope, session_id: Option<Uuid>) -> Option<ServerEvent> {
    build(
        EVENT_NO_SESSION,
        &NoSessionEvent {
            scope: scope.to_string(),
            session_id,
        },
    )
}

/// Announce a freshly started session.
pub fn broadcast_session_started(state: &SharedState, handle: &SessionHandle, slot: &SessionSlot) {
    let payload = SessionStatusEvent {
        session: SessionView::from(slot),
    };
    send_session_event(state, handle, EVENT_SESSION_STARTED, &payload);
}

/// Push an appended event together with the folded state it produced.
pub fn broadcast_score_event(
    state: &SharedState,
    handle: &SessionHandle,
    event: &ScoreEvent,
    outcome: &MutationOutcome,
) {
    let payload = ScoreEventPayload {
        session_id: handle.id,
        event: ScoreEventView::from(event),
        outcome: MutationResponse::from(outcome),
    };
    send_session_event(state, handle, EVENT_SCORE_EVENT, &payload);
}

/// Push the new position pointer.
pub fn broadcast_position_changed(state: &SharedState, handle: &SessionHandle, slot: &SessionSlot) {
    let payload = PositionChangedEvent {
        session_id: handle.id,
        position: slot.session.position.into(),
        state: slot.fold().state().into(),
    };
    send_session_event(state, handle, EVENT_POSITION_CHANGED, &payload);
}

/// Push a lifecycle change.
pub fn broadcast_session_status(state: &SharedState, handle: &SessionHandle, slot: &SessionSlot) {
    let payload = SessionStatusEvent {
        session: SessionView::from(slot),
    };
    send_session_event(state, handle, EVENT_SESSION_STATUS, &payload);
}

fn send_session_event(
    state: &SharedState,
    handle: &SessionHandle,
    event: &'static str,
    payload: &impl Serialize,
) {
    let Some(server_event) = build(event, payload) else {
        return;
    };
    for scope in scopes_of(handle) {
        let delivered = state.hub().publish(&scope, &server_event);
        trace!(event, %scope, delivered, "published");
    }
}

fn build(event: &str, payload: &impl Serialize) -> Option<ServerEvent> {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event, error = %err, "failed to serialize SSE payload");
            None
        }
    }
}
