use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use uuid::Uuid;

use super::RecordStore;
use crate::dao::{
    models::{FinalRecordEntity, ScoreEventEntity, SessionEntity},
    storage::{StorageError, StorageResult},
};

/// Process-local [`RecordStore`] used by tests and single-node demos.
///
/// Can be switched offline to exercise degraded paths.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: DashMap<Uuid, SessionEntity>,
    events: DashMap<(Uuid, u64), ScoreEventEntity>,
    records: DashMap<Uuid, FinalRecordEntity>,
    offline: AtomicBool,
}

impl MemoryRecordStore {
    /// Empty, online store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of permanent records written so far.
    pub fn record_count(&self) -> usize {
        self.inner.records.len()
    }

    /// Stored snapshot of one session.
    pub fn session(&self, id: Uuid) -> Option<SessionEntity> {
        self.inner.sessions.get(&id).map(|entry| entry.clone())
    }

    fn check(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(StorageError::Offline { backend: "memory" })
        } else {
            Ok(())
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            store.inner.sessions.insert(session.id, session);
            Ok(())
        })
    }

    fn list_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            Ok(store
                .inner
                .sessions
                .iter()
                .map(|entry| entry.value().clone())
                .collect())
        })
    }

    fn append_event(&self, event: ScoreEventEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            store
                .inner
                .events
                .entry((event.session_id, event.server_sequence))
                .or_insert(event);
            Ok(())
        })
    }

    fn list_events(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreEventEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            let mut events: Vec<ScoreEventEntity> = store
                .inner
                .events
                .iter()
                .filter(|entry| entry.key().0 == session_id)
                .map(|entry| entry.value().clone())
                .collect();
            events.sort_by_key(|event| event.server_sequence);
            Ok(events)
        })
    }

    fn create_record(&self, record: FinalRecordEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            match store.inner.records.entry(record.session_id) {
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(slot) => {
                    slot.insert(record);
                    Ok(true)
                }
            }
        })
    }

    fn find_record(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<FinalRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            Ok(store
                .inner
                .records
                .get(&session_id)
                .map(|entry| entry.clone()))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.health_check()
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::state::{
        score::{Scoreline, tests::audit},
        session::Position,
    };

    fn record(session_id: Uuid) -> FinalRecordEntity {
        FinalRecordEntity {
            session_id,
            game_or_round_id: "game-1".into(),
            account_id: "acct".into(),
            started_by_id: "u".into(),
            started_by_name: "U".into(),
            started_at: SystemTime::now(),
            finalized_at: SystemTime::now(),
            final_position: Position::default(),
            final_score: Scoreline::default(),
            live_plays: Vec::new(),
            event_count: 0,
            head_sequence: 0,
        }
    }

    #[tokio::test]
    async fn create_record_is_first_writer_wins() {
        let store = MemoryRecordStore::new();
        let id = Uuid::new_v4();
        assert!(store.create_record(record(id)).await.unwrap());
        assert!(!store.create_record(record(id)).await.unwrap());
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn events_are_listed_in_sequence_order() {
        let store = MemoryRecordStore::new();
        let session_id = Uuid::new_v4();
        for seq in [3_u64, 1, 2] {
            let event = ScoreEventEntity {
                session_id,
                event_id: Uuid::new_v4(),
                client_event_id: format!("c{seq}"),
                kind: crate::state::score::MutationKind::Create,
                target_event_id: None,
                sequence: seq,
                server_sequence: seq,
                play: None,
                audit: audit(),
                received_at: SystemTime::now(),
            };
            store.append_event(event).await.unwrap();
        }
        let listed: Vec<u64> = store
            .list_events(session_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.server_sequence)
            .collect();
        assert_eq!(listed, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryRecordStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.health_check().await,
            Err(StorageError::Offline { .. })
        ));
        assert!(store.list_sessions().await.is_err());
        store.set_offline(false);
        assert!(store.health_check().await.is_ok());
    }
}
