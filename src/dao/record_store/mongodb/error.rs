use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures raised by the MongoDB record store.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// Required environment variable is missing.
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// Connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    /// Client options were rejected.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    /// Server never answered the first ping.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    /// Health probe failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    /// Index creation failed.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    /// Session upsert failed.
    #[error("failed to save session `{id}`")]
    SaveSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    /// Session listing failed.
    #[error("failed to list sessions")]
    ListSessions {
        #[source]
        source: MongoError,
    },
    /// Event write failed.
    #[error("failed to append event {server_sequence} of session `{session_id}`")]
    AppendEvent {
        session_id: Uuid,
        server_sequence: u64,
        #[source]
        source: MongoError,
    },
    /// Event listing failed.
    #[error("failed to list events of session `{session_id}`")]
    ListEvents {
        session_id: Uuid,
        #[source]
        source: MongoError,
    },
    /// Record insert failed.
    #[error("failed to create final record of session `{session_id}`")]
    CreateRecord {
        session_id: Uuid,
        #[source]
        source: MongoError,
    },
    /// Record lookup failed.
    #[error("failed to load final record of session `{session_id}`")]
    LoadRecord {
        session_id: Uuid,
        #[source]
        source: MongoError,
    },
    /// A stored id could not be parsed back.
    #[error("invalid identifier `{value}` in collection `{collection}`")]
    InvalidId {
        collection: &'static str,
        value: String,
    },
}
