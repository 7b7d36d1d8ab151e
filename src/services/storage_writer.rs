use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{ScoreEventEntity, SessionEntity},
        record_store::RecordStore,
        storage::StorageResult,
    },
    state::{SharedState, store::SessionSlot},
};

const INITIAL_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Write queued by the live path and executed by [`run`].
#[derive(Debug, Clone)]
pub enum PersistJob {
    /// Upsert a session snapshot.
    SaveSession(SessionEntity),
    /// Append one event of a session log.
    AppendEvent(ScoreEventEntity),
}

/// Entry of the writer queue. Session snapshots travel by id and are looked
/// up when the writer reaches them, so repeated saves share one entry.
#[derive(Debug)]
pub enum QueuedWrite {
    /// Write the newest pending snapshot of this session.
    Session(Uuid),
    /// Append this event.
    Event(ScoreEventEntity),
}

impl PersistJob {
    /// Snapshot of the session held by `slot`.
    pub fn session(slot: &SessionSlot) -> Self {
        PersistJob::SaveSession(SessionEntity::from(&slot.session))
    }

    fn session_id(&self) -> Uuid {
        match self {
            PersistJob::SaveSession(session) => session.id,
            PersistJob::AppendEvent(event) => event.session_id,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            PersistJob::SaveSession(_) => "save_session",
            PersistJob::AppendEvent(_) => "append_event",
        }
    }

    async fn execute(&self, store: &dyn RecordStore) -> StorageResult<()> {
        match self {
            PersistJob::SaveSession(session) => store.save_session(session.clone()).await,
            PersistJob::AppendEvent(event) => store.append_event(event.clone()).await,
        }
    }
}

/// Drain the persistence queue in order, holding each job until it is stored.
///
/// While no store is installed the writer parks on the degraded flag; a failing
/// write is retried with backoff before the next job is looked at.
pub async fn run(state: SharedState) {
    let Some(mut queue) = state.take_persist_queue().await else {
        warn!("storage writer already running");
        return;
    };

    while let Some(write) = queue.recv().await {
        let job = match write {
            QueuedWrite::Session(id) => match state.take_pending_snapshot(id) {
                Some(session) => PersistJob::SaveSession(session),
                None => continue,
            },
            QueuedWrite::Event(event) => PersistJob::AppendEvent(event),
        };
        write_with_retry(&state, &job).await;
    }
}

async fn write_with_retry(state: &SharedState, job: &PersistJob) {
    let mut delay = INITIAL_DELAY;
    loop {
        let Some(store) = state.record_store().await else {
            wait_for_store(state).await;
            continue;
        };

        match job.execute(store.as_ref()).await {
            Ok(()) => {
                debug!(session_id = %job.session_id(), job = job.label(), "persisted");
                return;
            }
            Err(err) => {
                warn!(
                    session_id = %job.session_id(),
                    job = job.label(),
                    error = %err,
                    "persistence failed; retrying"
                );
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

async fn wait_for_store(state: &SharedState) {
    let mut watcher = state.degraded_watcher();
    // the flag can flip back before the store handle is swapped in, so bound the wait
    let _ = timeout(MAX_DELAY, watcher.wait_for(|degraded| !*degraded)).await;
    sleep(INITIAL_DELAY).await;
}

/// Install `store` and start the writer.
#[cfg(test)]
pub(crate) async fn spawn_with_store(state: &SharedState, store: std::sync::Arc<dyn RecordStore>) {
    state.install_record_store(store).await;
    tokio::spawn(run(state.clone()));
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;
    use crate::{
        config::AppConfig,
        dao::record_store::memory::MemoryRecordStore,
        state::{
            AppState,
            score::{
                MutationKind, ScoreEvent,
                tests::{audit, play},
            },
            session::{Actor, Position, ScoringSession},
        },
    };

    fn session() -> ScoringSession {
        let actor = Actor {
            user_id: "u".into(),
            display_name: "U".into(),
            account_id: "acct".into(),
        };
        ScoringSession::start("g".into(), &actor, Position::default())
    }

    fn event(seq: u64) -> ScoreEvent {
        ScoreEvent {
            event_id: Uuid::new_v4(),
            client_event_id: format!("c-{seq}"),
            kind: MutationKind::Create,
            target_event_id: None,
            sequence: seq,
            server_sequence: seq,
            play: Some(play("p", 1, 0, 0)),
            audit: audit(),
            received_at: SystemTime::now(),
        }
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn queued_jobs_reach_the_store() {
        let state = AppState::new(AppConfig::default());
        let memory = MemoryRecordStore::new();
        spawn_with_store(&state, Arc::new(memory.clone())).await;

        let session = session();
        let id = session.id;
        state.enqueue_persist(PersistJob::SaveSession(SessionEntity::from(&session)));
        state.enqueue_persist(PersistJob::AppendEvent(ScoreEventEntity::from_event(
            id,
            &event(1),
        )));

        eventually(|| memory.session(id).is_some()).await;
        let store: Arc<dyn RecordStore> = Arc::new(memory.clone());
        let mut events = Vec::new();
        for _ in 0..200 {
            events = store.list_events(id).await.unwrap();
            if !events.is_empty() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn jobs_wait_while_the_store_is_offline() {
        let state = AppState::new(AppConfig::default());
        let memory = MemoryRecordStore::new();
        memory.set_offline(true);
        spawn_with_store(&state, Arc::new(memory.clone())).await;

        let session = session();
        let id = session.id;
        state.enqueue_persist(PersistJob::SaveSession(SessionEntity::from(&session)));
        sleep(Duration::from_millis(50)).await;
        assert!(memory.session(id).is_none());

        memory.set_offline(false);
        eventually(|| memory.session(id).is_some()).await;
    }

    #[tokio::test]
    async fn repeated_snapshots_share_one_queue_entry() {
        let state = AppState::new(AppConfig::default());
        let other = SessionEntity::from(&session());
        let session = session();
        let id = session.id;
        let mut entity = SessionEntity::from(&session);
        for secs in 1..=100 {
            entity.last_activity_at = UNIX_EPOCH + Duration::from_secs(secs);
            state.enqueue_persist(PersistJob::SaveSession(entity.clone()));
        }
        state.enqueue_persist(PersistJob::AppendEvent(ScoreEventEntity::from_event(
            id,
            &event(1),
        )));
        state.enqueue_persist(PersistJob::SaveSession(other));

        let mut queue = state.take_persist_queue().await.unwrap();
        let mut queued = Vec::new();
        while let Ok(write) = queue.try_recv() {
            queued.push(write);
        }
        assert_eq!(queued.len(), 3);
        assert!(matches!(queued[0], QueuedWrite::Session(queued_id) if queued_id == id));

        let pending = state.take_pending_snapshot(id).unwrap();
        assert_eq!(pending.last_activity_at, UNIX_EPOCH + Duration::from_secs(100));
        assert!(state.take_pending_snapshot(id).is_none());
    }

    #[tokio::test]
    async fn coalesced_snapshot_written_is_the_newest() {
        let state = AppState::new(AppConfig::default());
        let memory = MemoryRecordStore::new();
        memory.set_offline(true);
        spawn_with_store(&state, Arc::new(memory.clone())).await;

        let session = session();
        let id = session.id;
        let mut entity = SessionEntity::from(&session);
        for secs in 1..=20 {
            entity.last_activity_at = UNIX_EPOCH + Duration::from_secs(secs);
            state.enqueue_persist(PersistJob::SaveSession(entity.clone()));
        }

        memory.set_offline(false);
        eventually(|| {
            memory.session(id).is_some_and(|stored| {
                stored.last_activity_at == UNIX_EPOCH + Duration::from_secs(20)
            })
        })
        .await;
    }

    #[tokio::test]
    async fn second_writer_does_not_start() {
        let state = AppState::new(AppConfig::default());
        assert!(state.take_persist_queue().await.is_some());
        // returns immediately instead of waiting on a queue
        run(state).await;
    }
}
