use std::time::SystemTime;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{
    dao::models::SessionEntity,
    error::ServiceError,
    services::session_service::{finalize_handle, mark_abandoned},
    state::{
        SharedState,
        lifecycle::{LifecycleEvent, SessionStatus},
        score::ScoreEvent,
        session::ScoringSession,
        store::SessionSlot,
    },
};

/// Counters of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions recovered from storage and closed.
    pub recovered: usize,
    /// Sessions closed for inactivity.
    pub abandoned: usize,
    /// Pending finalizes that succeeded.
    pub finalized: usize,
    /// Pending finalizes that failed again.
    pub finalize_failures: usize,
    /// Ended sessions dropped from memory.
    pub evicted: usize,
}

/// Run [`sweep_once`] forever on the configured interval.
pub async fn run(state: SharedState) {
    let mut ticker = interval(state.config().sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let report = sweep_once(&state, SystemTime::now()).await;
        if report != SweepReport::default() {
            info!(?report, "sweep pass done");
        }
    }
}

/// One reconciliation pass: startup recovery (until it succeeds once),
/// inactivity abandonment, finalize retries, then eviction of sessions that
/// ended longer than the retention window ago.
pub async fn sweep_once(state: &SharedState, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();

    if !state.is_recovered() {
        match recover_after_restart(state).await {
            Ok(count) => report.recovered = count,
            Err(err) => warn!(error = %err, "startup recovery failed; retrying next pass"),
        }
    }

    report.abandoned = abandon_inactive(state, now).await;
    let (finalized, failures) = retry_finalize(state).await;
    report.finalized = finalized;
    report.finalize_failures = failures;
    report.evicted = evict_ended(state, now).await;
    report
}

/// Close every session storage still lists as running but this process does
/// not hold. Such sessions were orphaned by a restart.
///
/// Runs once; later calls return `Ok(0)`.
pub async fn recover_after_restart(state: &SharedState) -> Result<usize, ServiceError> {
    if state.is_recovered() {
        return Ok(0);
    }
    let store = state.require_record_store().await?;
    let sessions = store.list_sessions().await?;

    let mut recovered = 0;
    for entity in sessions {
        if entity.status.is_terminal() || state.sessions().contains(entity.id) {
            continue;
        }

        let events: Vec<ScoreEvent> = store
            .list_events(entity.id)
            .await?
            .into_iter()
            .map(ScoreEvent::from)
            .collect();
        let mut session = ScoringSession::from(entity);
        let previous = session.status();
        session.lifecycle.transition(LifecycleEvent::Abandon)?;
        session.finalize_requested = false;
        store.save_session(SessionEntity::from(&session)).await?;

        let session_id = session.id;
        state
            .sessions()
            .insert_recovered(SessionSlot::restore(session, events));
        info!(%session_id, ?previous, "orphaned session abandoned after restart");
        recovered += 1;
    }

    state.mark_recovered();
    Ok(recovered)
}

async fn abandon_inactive(state: &SharedState, now: SystemTime) -> usize {
    let threshold = state.config().inactivity_threshold();
    let mut abandoned = 0;
    for handle in state.sessions().handles() {
        let mut slot = handle.slot.lock().await;
        if slot.session.status() != SessionStatus::Active || slot.session.finalize_requested {
            continue;
        }
        let idle = now
            .duration_since(slot.session.last_activity_at)
            .unwrap_or_default();
        if idle < threshold {
            continue;
        }
        debug!(session_id = %handle.id, idle_secs = idle.as_secs(), "session inactive");
        if mark_abandoned(state, &handle, &mut slot, "inactivity") {
            abandoned += 1;
        }
    }
    abandoned
}

async fn retry_finalize(state: &SharedState) -> (usize, usize) {
    let mut pending = Vec::new();
    for handle in state.sessions().handles() {
        if handle.slot.lock().await.session.finalize_requested {
            pending.push(handle);
        }
    }

    let (mut finalized, mut failures) = (0, 0);
    for handle in pending {
        match finalize_handle(state, &handle).await {
            Ok(_) => finalized += 1,
            Err(err) => {
                failures += 1;
                warn!(session_id = %handle.id, error = %err, "finalize retry failed");
            }
        }
    }
    (finalized, failures)
}

/// Finalized sessions stay reachable through the stored record once evicted.
async fn evict_ended(state: &SharedState, now: SystemTime) -> usize {
    let retention = state.config().terminal_retention();
    let mut evicted = 0;
    for handle in state.sessions().handles() {
        let expired = handle.slot.lock().await.ended_before(now, retention);
        if expired && state.sessions().evict(handle.id) {
            debug!(session_id = %handle.id, "ended session evicted");
            evicted += 1;
        }
    }
    evicted
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::ScoreEventEntity,
            record_store::{RecordStore, memory::MemoryRecordStore},
        },
        error::RejectionKind,
        services::{
            ingest_service::submit_mutation,
            session_service::{
                self,
                tests::{actor, start, state_with_store},
            },
        },
        state::{
            AppState,
            score::{
                Mutation, MutationInput, MutationKind,
                tests::{audit, play},
            },
            session::Position,
        },
    };

    fn create_input(client: &str, sequence: u64) -> MutationInput {
        MutationInput {
            client_event_id: client.into(),
            sequence,
            mutation: Mutation::Create {
                play: play(client, 1, 1, 0),
            },
            audit: audit(),
        }
    }

    #[tokio::test]
    async fn orphaned_sessions_are_abandoned_on_restart() {
        let memory = MemoryRecordStore::new();
        let orphan = ScoringSession::start("game-1".into(), &actor(), Position::default());
        let orphan_id = orphan.id;
        memory
            .save_session(SessionEntity::from(&orphan))
            .await
            .unwrap();
        let event = ScoreEvent {
            event_id: uuid::Uuid::new_v4(),
            client_event_id: "c-1".into(),
            kind: MutationKind::Create,
            target_event_id: None,
            sequence: 1,
            server_sequence: 1,
            play: Some(play("p1", 1, 2, 0)),
            audit: audit(),
            received_at: SystemTime::now(),
        };
        memory
            .append_event(ScoreEventEntity::from_event(orphan_id, &event))
            .await
            .unwrap();

        let state = AppState::new(AppConfig::default());
        state.install_record_store(Arc::new(memory.clone())).await;
        let report = sweep_once(&state, SystemTime::now()).await;
        assert_eq!(report.recovered, 1);
        assert!(state.is_recovered());

        let stored = memory.session(orphan_id).unwrap();
        assert_eq!(stored.status, SessionStatus::Abandoned);

        let err = submit_mutation(&state, orphan_id, &actor(), create_input("c-2", 2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Rejected {
                kind: RejectionKind::InvalidState,
                ..
            }
        ));
        // replays still answer from the recovered log
        let replay = submit_mutation(&state, orphan_id, &actor(), create_input("c-1", 1))
            .await
            .unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.outcome.state.score.home, 2);

        // the game is free for a new session
        start(&state, "game-1").await;
        assert_eq!(sweep_once(&state, SystemTime::now()).await.recovered, 0);
    }

    #[tokio::test]
    async fn recovery_waits_for_storage() {
        let state = AppState::new(AppConfig::default());
        sweep_once(&state, SystemTime::now()).await;
        assert!(!state.is_recovered());
    }

    #[tokio::test]
    async fn idle_active_sessions_are_abandoned() {
        let (state, _) = state_with_store(AppConfig::default()).await;
        let idle = start(&state, "game-1").await.session_id;
        let paused = start(&state, "game-2").await.session_id;
        session_service::pause(&state, paused, &actor()).await.unwrap();

        let later = SystemTime::now() + Duration::from_secs(16 * 60);
        let report = sweep_once(&state, later).await;
        assert_eq!(report.abandoned, 1);

        let view = session_service::get_session(&state, idle, &actor())
            .await
            .unwrap();
        assert_eq!(view.status, SessionStatus::Abandoned);
        let view = session_service::get_session(&state, paused, &actor())
            .await
            .unwrap();
        assert_eq!(view.status, SessionStatus::Paused);
    }

    #[tokio::test]
    async fn recent_activity_keeps_a_session_alive() {
        let (state, _) = state_with_store(AppConfig::default()).await;
        let id = start(&state, "game-1").await.session_id;
        submit_mutation(&state, id, &actor(), create_input("c-1", 1))
            .await
            .unwrap();
        let report = sweep_once(&state, SystemTime::now() + Duration::from_secs(60)).await;
        assert_eq!(report.abandoned, 0);
    }

    #[tokio::test]
    async fn ended_sessions_leave_memory_after_retention() {
        let (state, memory) = state_with_store(AppConfig::default()).await;
        let mut finalized = Vec::new();
        for n in 0..50 {
            let id = start(&state, &format!("game-{n}")).await.session_id;
            session_service::finalize(&state, id, &actor()).await.unwrap();
            finalized.push(id);
        }
        let running = start(&state, "game-live").await.session_id;

        let report = sweep_once(&state, SystemTime::now()).await;
        assert_eq!(report.evicted, 0);
        assert_eq!(state.sessions().held_count(), 51);

        let month_later = SystemTime::now() + Duration::from_secs(30 * 24 * 3600);
        for _ in 0..3 {
            sweep_once(&state, month_later).await;
        }
        assert_eq!(state.sessions().held_count(), 1);
        assert_eq!(state.sessions().live_count(), 1);
        assert!(state.sessions().contains(running));

        // the permanent record still answers
        let record = session_service::finalize(&state, finalized[0], &actor())
            .await
            .unwrap();
        assert_eq!(record.session_id, finalized[0]);
        assert_eq!(memory.record_count(), 50);
    }

    #[tokio::test]
    async fn requested_finalize_is_retried() {
        let state = AppState::new(AppConfig::default());
        let id = start(&state, "game-1").await.session_id;
        assert!(session_service::finalize(&state, id, &actor()).await.is_err());

        let report = sweep_once(&state, SystemTime::now()).await;
        assert_eq!(report.finalize_failures, 1);

        let memory = MemoryRecordStore::new();
        state.install_record_store(Arc::new(memory.clone())).await;
        let report = sweep_once(&state, SystemTime::now()).await;
        assert_eq!(report.finalized, 1);
        assert_eq!(memory.record_count(), 1);

        let view = session_service::get_session(&state, id, &actor())
            .await
            .unwrap();
        assert_eq!(view.status, SessionStatus::Finalized);
    }
}
