use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::doc,
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        EVENT_COLLECTION_NAME, MongoEventDocument, MongoRecordDocument, MongoSessionDocument,
        RECORD_COLLECTION_NAME, SESSION_COLLECTION_NAME, doc_id,
    },
};
use crate::dao::{
    models::{FinalRecordEntity, ScoreEventEntity, SessionEntity},
    record_store::RecordStore,
    storage::StorageResult,
};

const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed [`RecordStore`].
#[derive(Clone)]
pub struct MongoRecordStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    // kept alive alongside the database handle
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = establish_connection(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoRecordStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = establish_connection(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let sessions = self.sessions().await;
        let status_index = mongodb::IndexModel::builder()
            .keys(doc! {"status": 1, "game_or_round_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_status_idx".to_owned()))
                    .build(),
            )
            .build();
        sessions
            .create_index(status_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "status,game_or_round_id",
                source,
            })?;

        let events = self.events().await;
        let session_index = mongodb::IndexModel::builder()
            .keys(doc! {"session_id": 1, "server_sequence": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("event_session_seq_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        events
            .create_index(session_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: EVENT_COLLECTION_NAME,
                index: "session_id,server_sequence",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database()
            .await
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn events(&self) -> Collection<MongoEventDocument> {
        self.database()
            .await
            .collection::<MongoEventDocument>(EVENT_COLLECTION_NAME)
    }

    async fn records(&self) -> Collection<MongoRecordDocument> {
        self.database()
            .await
            .collection::<MongoRecordDocument>(RECORD_COLLECTION_NAME)
    }

    async fn save_session(&self, session: SessionEntity) -> MongoResult<()> {
        let id = session.id;
        let document: MongoSessionDocument = session.into();
        self.sessions()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;
        Ok(())
    }

    async fn list_sessions(&self) -> MongoResult<Vec<SessionEntity>> {
        let documents: Vec<MongoSessionDocument> = self
            .sessions()
            .await
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::ListSessions { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListSessions { source })?;

        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn append_event(&self, event: ScoreEventEntity) -> MongoResult<()> {
        let session_id = event.session_id;
        let server_sequence = event.server_sequence;
        let document: MongoEventDocument = event.into();
        let key = super::models::event_doc_key(session_id, server_sequence);
        self.events()
            .await
            .replace_one(doc_id(key), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::AppendEvent {
                session_id,
                server_sequence,
                source,
            })?;
        Ok(())
    }

    async fn list_events(&self, session_id: Uuid) -> MongoResult<Vec<ScoreEventEntity>> {
        let documents: Vec<MongoEventDocument> = self
            .events()
            .await
            .find(doc! {"session_id": session_id.to_string()})
            .sort(doc! {"server_sequence": 1})
            .await
            .map_err(|source| MongoDaoError::ListEvents { session_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListEvents { session_id, source })?;

        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn create_record(&self, record: FinalRecordEntity) -> MongoResult<bool> {
        let session_id = record.session_id;
        let document: MongoRecordDocument = record.into();
        match self.records().await.insert_one(&document).await {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(source) => Err(MongoDaoError::CreateRecord { session_id, source }),
        }
    }

    async fn find_record(&self, session_id: Uuid) -> MongoResult<Option<FinalRecordEntity>> {
        self.records()
            .await
            .find_one(doc_id(session_id))
            .await
            .map_err(|source| MongoDaoError::LoadRecord { session_id, source })?
            .map(TryInto::try_into)
            .transpose()
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

impl RecordStore for MongoRecordStore {
    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_session(session).await.map_err(Into::into) })
    }

    fn list_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_sessions().await.map_err(Into::into) })
    }

    fn append_event(&self, event: ScoreEventEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.append_event(event).await.map_err(Into::into) })
    }

    fn list_events(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreEventEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_events(session_id).await.map_err(Into::into) })
    }

    fn create_record(&self, record: FinalRecordEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.create_record(record).await.map_err(Into::into) })
    }

    fn find_record(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<FinalRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_record(session_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
