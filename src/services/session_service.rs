use std::{sync::Arc, time::SystemTime};

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::FinalRecordEntity,
    dto::live::{
        FinalRecordView, ScoreEventView, SessionStatusProbe, SessionView, StartSessionRequest,
    },
    error::ServiceError,
    services::{sse_events, storage_writer::PersistJob},
    state::{
        SharedState,
        lifecycle::{LifecycleEvent, SessionStatus},
        session::{Actor, Position, ScoringSession},
        store::{SessionHandle, SessionSlot},
        tickets::StreamScope,
    },
};

/// Resolve a session visible to `actor`. Sessions of other tenants are reported as missing.
pub(crate) fn lookup(
    state: &SharedState,
    session_id: Uuid,
    actor: &Actor,
) -> Result<Arc<SessionHandle>, ServiceError> {
    state
        .sessions()
        .get(session_id)
        .filter(|handle| handle.account_id == actor.account_id)
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))
}

/// Rejection used whenever a session refuses a change.
pub(crate) fn not_accepting(slot: &SessionSlot) -> ServiceError {
    let session = &slot.session;
    let message = if session.lifecycle.pending().is_some() || session.finalize_requested {
        "session is being finalized".to_string()
    } else {
        format!("session is {:?}", session.status()).to_lowercase()
    };
    ServiceError::invalid_state(message, SessionView::from(slot))
}

/// Start a live session for a game or round.
pub async fn start_session(
    state: &SharedState,
    actor: &Actor,
    request: StartSessionRequest,
) -> Result<SessionView, ServiceError> {
    let session = ScoringSession::start(
        request.game_or_round_id.clone(),
        actor,
        request.initial_position(),
    );
    let handle = state
        .sessions()
        .insert_new(session)
        .map_err(|existing| ServiceError::Conflict {
            message: format!(
                "`{}` already has a live session",
                request.game_or_round_id
            ),
            session_id: existing,
        })?;

    let slot = handle.slot.lock().await;
    info!(
        session_id = %handle.id,
        game_or_round_id = %handle.game_or_round_id,
        started_by = %actor.user_id,
        "scoring session started"
    );
    sse_events::broadcast_session_started(state, &handle, &slot);
    state.enqueue_persist(PersistJob::session(&slot));
    Ok(SessionView::from(&*slot))
}

/// Current view of a session.
pub async fn get_session(
    state: &SharedState,
    session_id: Uuid,
    actor: &Actor,
) -> Result<SessionView, ServiceError> {
    let handle = lookup(state, session_id, actor)?;
    let slot = handle.slot.lock().await;
    Ok(SessionView::from(&*slot))
}

/// Event log of a session in server order.
pub async fn list_events(
    state: &SharedState,
    session_id: Uuid,
    actor: &Actor,
) -> Result<Vec<ScoreEventView>, ServiceError> {
    let handle = lookup(state, session_id, actor)?;
    let slot = handle.slot.lock().await;
    Ok(slot.events().iter().map(ScoreEventView::from).collect())
}

/// Move the position pointer. Backward moves beyond the correction tolerance are refused.
pub async fn advance_position(
    state: &SharedState,
    session_id: Uuid,
    actor: &Actor,
    target: Position,
) -> Result<SessionView, ServiceError> {
    let handle = lookup(state, session_id, actor)?;
    let mut slot = handle.slot.lock().await;
    if !slot.session.accepts_mutations() {
        return Err(not_accepting(&slot));
    }

    let tolerance = state.config().position_correction_tolerance();
    if !target.is_reachable_from(&slot.session.position, tolerance) {
        return Err(ServiceError::invalid_state(
            format!(
                "position {} is behind the current position {}",
                target.index, slot.session.position.index
            ),
            SessionView::from(&*slot),
        ));
    }

    slot.session.position = target;
    slot.session.touch();
    sse_events::broadcast_position_changed(state, &handle, &slot);
    state.enqueue_persist(PersistJob::session(&slot));
    Ok(SessionView::from(&*slot))
}

/// Suspend scoring.
pub async fn pause(
    state: &SharedState,
    session_id: Uuid,
    actor: &Actor,
) -> Result<SessionView, ServiceError> {
    apply_event(state, session_id, actor, LifecycleEvent::Pause).await
}

/// Resume a paused session.
pub async fn resume(
    state: &SharedState,
    session_id: Uuid,
    actor: &Actor,
) -> Result<SessionView, ServiceError> {
    apply_event(state, session_id, actor, LifecycleEvent::Resume).await
}

async fn apply_event(
    state: &SharedState,
    session_id: Uuid,
    actor: &Actor,
    event: LifecycleEvent,
) -> Result<SessionView, ServiceError> {
    let handle = lookup(state, session_id, actor)?;
    let mut slot = handle.slot.lock().await;
    if slot.session.finalize_requested {
        return Err(not_accepting(&slot));
    }

    match slot.session.lifecycle.transition(event) {
        Ok(status) => {
            slot.session.touch();
            info!(session_id = %handle.id, ?status, by = %actor.user_id, "session status changed");
            sse_events::broadcast_session_status(state, &handle, &slot);
            state.enqueue_persist(PersistJob::session(&slot));
            Ok(SessionView::from(&*slot))
        }
        Err(err) => Err(ServiceError::invalid_state(
            err.to_string(),
            SessionView::from(&*slot),
        )),
    }
}

/// Fold a session into its permanent record.
///
/// Repeated calls return the stored record. Sessions this process no longer
/// holds are answered from storage.
pub async fn finalize(
    state: &SharedState,
    session_id: Uuid,
    actor: &Actor,
) -> Result<FinalRecordView, ServiceError> {
    match lookup(state, session_id, actor) {
        Ok(handle) => {
            let record = finalize_handle(state, &handle).await?;
            Ok(FinalRecordView::from(&record))
        }
        Err(not_found) => {
            let store = state.require_record_store().await?;
            match store.find_record(session_id).await? {
                Some(record) if record.account_id == actor.account_id => {
                    Ok(FinalRecordView::from(&record))
                }
                _ => Err(not_found),
            }
        }
    }
}

/// Finalize a held session. Callers queue on the session's finalize gate.
///
/// On a storage failure the planned transition is rolled back and the session
/// is flagged so the sweeper retries it.
pub(crate) async fn finalize_handle(
    state: &SharedState,
    handle: &SessionHandle,
) -> Result<FinalRecordEntity, ServiceError> {
    let _gate = handle.finalize_gate.lock().await;

    let (plan_id, record) = {
        let mut slot = handle.slot.lock().await;
        if let Some(record) = &slot.final_record {
            return Ok(record.clone());
        }
        if slot.session.status() == SessionStatus::Finalized {
            drop(slot);
            let store = state.require_record_store().await?;
            return store.find_record(handle.id).await?.ok_or_else(|| {
                ServiceError::NotFound(format!("record of session `{}` not found", handle.id))
            });
        }

        let plan = match slot.session.lifecycle.plan(LifecycleEvent::Finalize) {
            Ok(plan) => plan,
            Err(err) => {
                return Err(ServiceError::invalid_state(
                    err.to_string(),
                    SessionView::from(&*slot),
                ));
            }
        };
        (plan.id, build_record(&slot))
    };

    let written = write_record(state, record).await;

    let mut slot = handle.slot.lock().await;
    match written {
        Ok(record) => {
            slot.session.lifecycle.apply(plan_id)?;
            slot.session.finalize_requested = false;
            slot.session.touch();
            slot.mark_ended();
            slot.final_record = Some(record.clone());
            state.sessions().release_game(handle);
            info!(
                session_id = %handle.id,
                event_count = record.event_count,
                head_sequence = record.head_sequence,
                "session finalized"
            );
            sse_events::broadcast_session_status(state, handle, &slot);
            state.enqueue_persist(PersistJob::session(&slot));
            Ok(record)
        }
        Err(err) => {
            slot.session.lifecycle.abort(plan_id)?;
            let first_failure = !slot.session.finalize_requested;
            slot.session.finalize_requested = true;
            warn!(session_id = %handle.id, error = %err, "finalize failed; sweeper will retry");
            if first_failure {
                sse_events::broadcast_session_status(state, handle, &slot);
                state.enqueue_persist(PersistJob::session(&slot));
            }
            Err(err)
        }
    }
}

async fn write_record(
    state: &SharedState,
    record: FinalRecordEntity,
) -> Result<FinalRecordEntity, ServiceError> {
    if state.is_degraded() {
        return Err(ServiceError::Degraded);
    }
    let store = state.require_record_store().await?;
    if let Some(existing) = store.find_record(record.session_id).await? {
        return Ok(existing);
    }
    if store.create_record(record.clone()).await? {
        return Ok(record);
    }
    // lost a race with another writer; theirs wins
    store.find_record(record.session_id).await?.ok_or_else(|| {
        ServiceError::InvalidState(format!(
            "record of session `{}` disappeared",
            record.session_id
        ))
    })
}

fn build_record(slot: &SessionSlot) -> FinalRecordEntity {
    let session = &slot.session;
    let folded = slot.fold().state();
    FinalRecordEntity {
        session_id: session.id,
        game_or_round_id: session.game_or_round_id.clone(),
        account_id: session.account_id.clone(),
        started_by_id: session.started_by_id.clone(),
        started_by_name: session.started_by_name.clone(),
        started_at: session.started_at,
        finalized_at: SystemTime::now(),
        final_position: folded.position.unwrap_or(session.position),
        final_score: folded.score,
        live_plays: folded.live_plays.clone(),
        event_count: folded.event_count,
        head_sequence: folded.head_sequence,
    }
}

/// Abandon a session whose lock the caller holds. Returns `false` when the
/// session is terminal or mid-transition.
pub(crate) fn mark_abandoned(
    state: &SharedState,
    handle: &SessionHandle,
    slot: &mut SessionSlot,
    reason: &'static str,
) -> bool {
    if slot.session.status().is_terminal() || slot.session.lifecycle.pending().is_some() {
        return false;
    }
    if let Err(err) = slot.session.lifecycle.transition(LifecycleEvent::Abandon) {
        warn!(session_id = %handle.id, error = %err, "abandon refused");
        return false;
    }
    slot.session.finalize_requested = false;
    slot.mark_ended();
    state.sessions().release_game(handle);
    info!(session_id = %handle.id, reason, "session abandoned");
    sse_events::broadcast_session_status(state, handle, slot);
    state.enqueue_persist(PersistJob::session(slot));
    true
}

/// Whether a game or round currently has a live session.
pub async fn status_probe(
    state: &SharedState,
    game_or_round_id: &str,
    actor: &Actor,
) -> SessionStatusProbe {
    let live = state
        .sessions()
        .live_for_game(&actor.account_id, game_or_round_id);

    let Some(handle) = live else {
        return SessionStatusProbe {
            has_active_session: false,
            session_id: None,
            status: None,
            viewer_count: None,
        };
    };

    let status = handle.slot.lock().await.session.status();
    let viewers = state
        .hub()
        .viewer_count(&StreamScope::game(actor.account_id.as_str(), game_or_round_id))
        + state.hub().viewer_count(&StreamScope::Session(handle.id));
    SessionStatusProbe {
        has_active_session: true,
        session_id: Some(handle.id),
        status: Some(status),
        viewer_count: Some(viewers),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::record_store::memory::MemoryRecordStore,
        services::storage_writer,
        state::{AppState, session::Half},
    };

    pub(crate) fn actor() -> Actor {
        Actor {
            user_id: "scorer-1".into(),
            display_name: "Scorer One".into(),
            account_id: "acct-1".into(),
        }
    }

    pub(crate) async fn state_with_store(config: AppConfig) -> (SharedState, MemoryRecordStore) {
        let state = AppState::new(config);
        let memory = MemoryRecordStore::new();
        storage_writer::spawn_with_store(&state, Arc::new(memory.clone())).await;
        (state, memory)
    }

    pub(crate) async fn start(state: &SharedState, game: &str) -> SessionView {
        let request = StartSessionRequest {
            game_or_round_id: game.into(),
            position: None,
            half: None,
        };
        start_session(state, &actor(), request).await.unwrap()
    }

    #[tokio::test]
    async fn second_start_for_a_live_game_conflicts() {
        let (state, _) = state_with_store(AppConfig::default()).await;
        let first = start(&state, "game-1").await;
        pause(&state, first.session_id, &actor()).await.unwrap();

        let request = StartSessionRequest {
            game_or_round_id: "game-1".into(),
            position: Some(2),
            half: None,
        };
        let err = start_session(&state, &actor(), request).await.unwrap_err();
        match err {
            ServiceError::Conflict { session_id, .. } => assert_eq!(session_id, first.session_id),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pausing_twice_is_invalid_state() {
        let (state, _) = state_with_store(AppConfig::default()).await;
        let view = start(&state, "game-1").await;
        let paused = pause(&state, view.session_id, &actor()).await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);

        let err = pause(&state, view.session_id, &actor()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Rejected { .. }));
        let resumed = resume(&state, view.session_id, &actor()).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn position_only_moves_forward_without_tolerance() {
        let (state, _) = state_with_store(AppConfig::default()).await;
        let id = start(&state, "game-1").await.session_id;

        let moved = advance_position(&state, id, &actor(), Position::new(3, Some(Half::Top)))
            .await
            .unwrap();
        assert_eq!(moved.position.index, 3);
        advance_position(&state, id, &actor(), Position::new(3, Some(Half::Top)))
            .await
            .unwrap();

        let err = advance_position(&state, id, &actor(), Position::new(2, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Rejected { .. }));
    }

    #[tokio::test]
    async fn position_moves_back_within_tolerance() {
        let config = AppConfig::parse(r#"{"position_correction_tolerance": 3}"#).unwrap();
        let (state, _) = state_with_store(config).await;
        let id = start(&state, "game-1").await.session_id;
        advance_position(&state, id, &actor(), Position::new(4, None))
            .await
            .unwrap();
        let moved = advance_position(&state, id, &actor(), Position::new(3, None))
            .await
            .unwrap();
        assert_eq!(moved.position.index, 3);
    }

    #[tokio::test]
    async fn concurrent_finalize_writes_one_record() {
        let (state, memory) = state_with_store(AppConfig::default()).await;
        let id = start(&state, "game-1").await.session_id;

        let who = actor();
        let (a, b) = tokio::join!(finalize(&state, id, &who), finalize(&state, id, &who));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.session_id, b.session_id);
        assert_eq!(a.finalized_at, b.finalized_at);
        assert_eq!(memory.record_count(), 1);

        let again = finalize(&state, id, &actor()).await.unwrap();
        assert_eq!(again.finalized_at, a.finalized_at);

        let view = get_session(&state, id, &actor()).await.unwrap();
        assert_eq!(view.status, SessionStatus::Finalized);
        // the game is free again
        start(&state, "game-1").await;
    }

    #[tokio::test]
    async fn failed_finalize_is_flagged_and_keeps_status() {
        let state = AppState::new(AppConfig::default());
        let id = start(&state, "game-1").await.session_id;

        let err = finalize(&state, id, &actor()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));

        let view = get_session(&state, id, &actor()).await.unwrap();
        assert_eq!(view.status, SessionStatus::Active);
        assert!(view.finalize_requested);
        assert!(pause(&state, id, &actor()).await.is_err());

        let memory = MemoryRecordStore::new();
        state.install_record_store(Arc::new(memory.clone())).await;
        let record = finalize(&state, id, &actor()).await.unwrap();
        assert_eq!(record.session_id, id);
        let view = get_session(&state, id, &actor()).await.unwrap();
        assert!(!view.finalize_requested);
    }

    #[tokio::test]
    async fn other_tenants_cannot_see_a_session() {
        let (state, _) = state_with_store(AppConfig::default()).await;
        let id = start(&state, "game-1").await.session_id;
        let stranger = Actor {
            account_id: "acct-2".into(),
            ..actor()
        };
        let err = get_session(&state, id, &stranger).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        let status = status_probe(&state, "game-1", &stranger).await;
        assert!(!status.has_active_session);
    }

    #[tokio::test]
    async fn tenants_score_the_same_game_id_independently() {
        let (state, _) = state_with_store(AppConfig::default()).await;
        let ours = start(&state, "game-1").await.session_id;
        let stranger = Actor {
            account_id: "acct-2".into(),
            ..actor()
        };
        let theirs = start_session(
            &state,
            &stranger,
            StartSessionRequest {
                game_or_round_id: "game-1".into(),
                position: None,
                half: None,
            },
        )
        .await
        .unwrap();

        assert_ne!(theirs.session_id, ours);
        let status = status_probe(&state, "game-1", &stranger).await;
        assert_eq!(status.session_id, Some(theirs.session_id));
    }

    #[tokio::test]
    async fn status_reports_live_session() {
        let (state, _) = state_with_store(AppConfig::default()).await;
        let id = start(&state, "game-1").await.session_id;
        let status = status_probe(&state, "game-1", &actor()).await;
        assert!(status.has_active_session);
        assert_eq!(status.session_id, Some(id));
        assert_eq!(status.viewer_count, Some(0));
    }
}
