pub mod memory;

#[cfg(feature = "couch-store")]
pub mod couchdb;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::{env, sync::Arc};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{FinalRecordEntity, ScoreEventEntity, SessionEntity},
    storage::StorageResult,
};

use self::memory::MemoryRecordStore;

/// Abstraction over the persistence collaborator: sessions, their event logs
/// and the permanent records produced by finalization.
pub trait RecordStore: Send + Sync {
    /// Insert or replace a session snapshot.
    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// List every stored session snapshot.
    fn list_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;
    /// Store one event. Writing the same `(session_id, server_sequence)` twice is a no-op.
    fn append_event(&self, event: ScoreEventEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Events of one session ordered by server sequence.
    fn list_events(&self, session_id: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<ScoreEventEntity>>>;
    /// Create the permanent record. Returns `false` when a record already exists for the session.
    fn create_record(&self, record: FinalRecordEntity) -> BoxFuture<'static, StorageResult<bool>>;
    /// Load the permanent record of a session.
    fn find_record(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<FinalRecordEntity>>>;
    /// Cheap liveness probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed probe.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Backend selected through `STORE_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process memory.
    Memory,
    /// MongoDB, configured through `MONGO_URI` and `MONGO_DB`.
    #[cfg(feature = "mongo-store")]
    Mongo,
    /// CouchDB, configured through `COUCH_*` variables.
    #[cfg(feature = "couch-store")]
    Couch,
}

impl StoreBackend {
    /// Read the backend choice from the environment. Unknown values fall back to memory.
    pub fn from_env() -> Self {
        match env::var("STORE_BACKEND").ok().as_deref().map(str::trim) {
            #[cfg(feature = "mongo-store")]
            Some("mongo") | Some("mongodb") => StoreBackend::Mongo,
            #[cfg(feature = "couch-store")]
            Some("couch") | Some("couchdb") => StoreBackend::Couch,
            Some("memory") | Some("") | None => StoreBackend::Memory,
            Some(other) => {
                tracing::warn!(backend = other, "unknown STORE_BACKEND; using memory");
                StoreBackend::Memory
            }
        }
    }

    /// Short name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            #[cfg(feature = "mongo-store")]
            StoreBackend::Mongo => "mongo",
            #[cfg(feature = "couch-store")]
            StoreBackend::Couch => "couch",
        }
    }

    /// Build a store for this backend.
    pub async fn connect(self) -> StorageResult<Arc<dyn RecordStore>> {
        match self {
            StoreBackend::Memory => Ok(Arc::new(MemoryRecordStore::new())),
            #[cfg(feature = "mongo-store")]
            StoreBackend::Mongo => {
                let config = self::mongodb::MongoConfig::from_env().await?;
                let store = self::mongodb::MongoRecordStore::connect(config).await?;
                Ok(Arc::new(store))
            }
            #[cfg(feature = "couch-store")]
            StoreBackend::Couch => {
                let config = self::couchdb::CouchConfig::from_env()?;
                let store = self::couchdb::CouchRecordStore::connect(config).await?;
                Ok(Arc::new(store))
            }
        }
    }
}
