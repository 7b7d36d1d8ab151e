use reqwest::StatusCode;
use thiserror::Error;
use uuid::Uuid;

pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Transport-level failure of a single CouchDB call.
#[derive(Debug, Error)]
pub enum CouchRequestError {
    #[error("request to `{path}` could not be sent")]
    Send {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("`{path}` answered {status}")]
    Status { path: String, status: StatusCode },
    #[error("`{path}` returned an unreadable body")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("document listed under `{path}` does not match the expected shape")]
    Shape {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures raised by the CouchDB record store, named after the operation.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to build the CouchDB HTTP client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    #[error("database `{database}` is not usable")]
    Database {
        database: String,
        #[source]
        source: CouchRequestError,
    },
    #[error("failed to save session `{id}`")]
    SaveSession {
        id: Uuid,
        #[source]
        source: CouchRequestError,
    },
    #[error("failed to list sessions")]
    ListSessions {
        #[source]
        source: CouchRequestError,
    },
    #[error("failed to append event {server_sequence} of session `{session_id}`")]
    AppendEvent {
        session_id: Uuid,
        server_sequence: u64,
        #[source]
        source: CouchRequestError,
    },
    #[error("failed to list events of session `{session_id}`")]
    ListEvents {
        session_id: Uuid,
        #[source]
        source: CouchRequestError,
    },
    #[error("failed to create final record of session `{session_id}`")]
    CreateRecord {
        session_id: Uuid,
        #[source]
        source: CouchRequestError,
    },
    #[error("failed to load final record of session `{session_id}`")]
    LoadRecord {
        session_id: Uuid,
        #[source]
        source: CouchRequestError,
    },
}
