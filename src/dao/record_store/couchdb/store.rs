use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchRequestError, CouchResult},
    models::{
        AllDocsResponse, CouchDocument, END_SUFFIX, SESSION_PREFIX, event_doc_id, event_prefix,
        record_doc_id, session_doc_id,
    },
};
use crate::dao::{
    models::{FinalRecordEntity, ScoreEventEntity, SessionEntity},
    record_store::RecordStore,
    storage::StorageResult,
};

type RequestResult<T> = Result<T, CouchRequestError>;

/// Outcome of a create-only PUT.
enum Put {
    Written,
    AlreadyExists,
}

/// CouchDB-backed [`RecordStore`]. Every entity is one document whose id
/// encodes its kind, so listing a session's events is a key-range scan.
#[derive(Clone)]
pub struct CouchRecordStore {
    inner: Arc<CouchInner>,
}

struct CouchInner {
    client: Client,
    config: CouchConfig,
}

impl CouchInner {
    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/{}", self.config.base_url, self.config.database)
        } else {
            format!("{}/{}/{}", self.config.base_url, self.config.database, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.config.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    async fn send(&self, method: Method, path: &str) -> RequestResult<reqwest::Response> {
        self.request(method, path)
            .send()
            .await
            .map_err(|source| CouchRequestError::Send {
                path: path.to_owned(),
                source,
            })
    }

    /// HEAD the database and create it on 404.
    async fn ensure_database(&self) -> RequestResult<()> {
        match self.send(Method::HEAD, "").await?.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                let status = self.send(Method::PUT, "").await?.status();
                // 412: created concurrently by another instance
                if status.is_success() || status == StatusCode::PRECONDITION_FAILED {
                    Ok(())
                } else {
                    Err(CouchRequestError::Status {
                        path: self.config.database.clone(),
                        status,
                    })
                }
            }
            status => Err(CouchRequestError::Status {
                path: self.config.database.clone(),
                status,
            }),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, doc_id: &str) -> RequestResult<Option<T>> {
        let response = self.send(Method::GET, doc_id).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response.json::<T>().await.map(Some).map_err(
                |source| CouchRequestError::Decode {
                    path: doc_id.to_owned(),
                    source,
                },
            ),
            status => Err(CouchRequestError::Status {
                path: doc_id.to_owned(),
                status,
            }),
        }
    }

    async fn put<T: Serialize>(&self, document: &CouchDocument<T>) -> RequestResult<Put> {
        let response = self
            .request(Method::PUT, &document.id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchRequestError::Send {
                path: document.id.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(Put::AlreadyExists),
            status if status.is_success() => Ok(Put::Written),
            status => Err(CouchRequestError::Status {
                path: document.id.clone(),
                status,
            }),
        }
    }

    /// Replace a mutable document, carrying its current revision forward.
    async fn replace<T>(&self, mut document: CouchDocument<T>) -> RequestResult<()>
    where
        T: Serialize + DeserializeOwned,
    {
        document.rev = self
            .fetch::<CouchDocument<T>>(&document.id)
            .await?
            .and_then(|existing| existing.rev);
        self.put(&document).await.map(|_| ())
    }

    async fn scan<T: DeserializeOwned>(&self, prefix: &str) -> RequestResult<Vec<T>> {
        const ALL_DOCS: &str = "_all_docs";
        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&[
                ("include_docs", "true".to_owned()),
                ("startkey", format!("\"{prefix}\"")),
                ("endkey", format!("\"{prefix}{END_SUFFIX}\"")),
            ])
            .send()
            .await
            .map_err(|source| CouchRequestError::Send {
                path: ALL_DOCS.to_owned(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchRequestError::Status {
                path: ALL_DOCS.to_owned(),
                status: response.status(),
            });
        }

        let page = response
            .json::<AllDocsResponse>()
            .await
            .map_err(|source| CouchRequestError::Decode {
                path: ALL_DOCS.to_owned(),
                source,
            })?;

        page.rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| {
                serde_json::from_value::<CouchDocument<T>>(doc)
                    .map(|doc| doc.body)
                    .map_err(|source| CouchRequestError::Shape {
                        path: prefix.to_owned(),
                        source,
                    })
            })
            .collect()
    }
}

impl CouchRecordStore {
    /// Build the HTTP client and make sure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;
        let inner = Arc::new(CouchInner { client, config });
        inner
            .ensure_database()
            .await
            .map_err(|source| CouchDaoError::Database {
                database: inner.config.database.clone(),
                source,
            })?;
        Ok(Self { inner })
    }

    fn database_error(&self, source: CouchRequestError) -> CouchDaoError {
        CouchDaoError::Database {
            database: self.inner.config.database.clone(),
            source,
        }
    }
}

impl RecordStore for CouchRecordStore {
    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let id = session.id;
            inner
                .replace(CouchDocument::new(session_doc_id(id), session))
                .await
                .map_err(|source| CouchDaoError::SaveSession { id, source })?;
            Ok(())
        })
    }

    fn list_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .scan::<SessionEntity>(SESSION_PREFIX)
                .await
                .map_err(|source| CouchDaoError::ListSessions { source })?)
        })
    }

    fn append_event(&self, event: ScoreEventEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let session_id = event.session_id;
            let server_sequence = event.server_sequence;
            let document = CouchDocument::new(event_doc_id(session_id, server_sequence), event);
            // events never change, so a conflict is a replayed write
            inner
                .put(&document)
                .await
                .map_err(|source| CouchDaoError::AppendEvent {
                    session_id,
                    server_sequence,
                    source,
                })?;
            Ok(())
        })
    }

    fn list_events(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreEventEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .scan::<ScoreEventEntity>(&event_prefix(session_id))
                .await
                .map_err(|source| CouchDaoError::ListEvents { session_id, source })?)
        })
    }

    fn create_record(&self, record: FinalRecordEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let session_id = record.session_id;
            let document = CouchDocument::new(record_doc_id(session_id), record);
            let put = inner
                .put(&document)
                .await
                .map_err(|source| CouchDaoError::CreateRecord { session_id, source })?;
            Ok(matches!(put, Put::Written))
        })
    }

    fn find_record(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<FinalRecordEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let document = inner
                .fetch::<CouchDocument<FinalRecordEntity>>(&record_doc_id(session_id))
                .await
                .map_err(|source| CouchDaoError::LoadRecord { session_id, source })?;
            Ok(document.map(|document| document.body))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let status = store
                .inner
                .send(Method::HEAD, "")
                .await
                .map_err(|err| store.database_error(err))?
                .status();
            if status.is_success() {
                Ok(())
            } else {
                Err(store
                    .database_error(CouchRequestError::Status {
                        path: store.inner.config.database.clone(),
                        status,
                    })
                    .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .inner
                .ensure_database()
                .await
                .map_err(|err| store.database_error(err))?;
            Ok(())
        })
    }
}
