pub mod hub;
pub mod lifecycle;
pub mod score;
pub mod session;
pub mod store;
pub mod tickets;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tracing::warn;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{models::SessionEntity, record_store::RecordStore},
    error::ServiceError,
    services::storage_writer::{PersistJob, QueuedWrite},
};

pub use self::lifecycle::{AbortError, ApplyError, PlanError};
use self::{hub::BroadcastHub, store::SessionStore, tickets::TicketBroker};

/// Shared handle passed to every handler and background task.
pub type SharedState = Arc<AppState>;

/// Central application state: live sessions, tickets, subscribers and the
/// record store handle.
pub struct AppState {
    config: AppConfig,
    record_store: RwLock<Option<Arc<dyn RecordStore>>>,
    degraded: watch::Sender<bool>,
    sessions: SessionStore,
    tickets: TicketBroker,
    hub: BroadcastHub,
    persist_tx: mpsc::UnboundedSender<QueuedWrite>,
    persist_rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedWrite>>>,
    // newest unwritten snapshot per session; at most one queue entry points at each
    pending_snapshots: DashMap<Uuid, SessionEntity>,
    recovered: AtomicBool,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a record store is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tickets: TicketBroker::new(config.ticket_ttl()),
            hub: BroadcastHub::new(config.subscriber_buffer()),
            config,
            record_store: RwLock::new(None),
            degraded: degraded_tx,
            sessions: SessionStore::new(),
            persist_tx,
            persist_rx: Mutex::new(Some(persist_rx)),
            pending_snapshots: DashMap::new(),
            recovered: AtomicBool::new(false),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Live sessions.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Stream ticket broker.
    pub fn tickets(&self) -> &TicketBroker {
        &self.tickets
    }

    /// Subscriber registry.
    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Obtain a handle to the current record store, if one is installed.
    pub async fn record_store(&self) -> Option<Arc<dyn RecordStore>> {
        let guard = self.record_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current record store or [`ServiceError::Degraded`].
    pub async fn require_record_store(&self) -> Result<Arc<dyn RecordStore>, ServiceError> {
        self.record_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new record store implementation and leave degraded mode.
    pub async fn install_record_store(&self, store: Arc<dyn RecordStore>) {
        {
            let mut guard = self.record_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current record store and enter degraded mode.
    pub async fn clear_record_store(&self) {
        {
            let mut guard = self.record_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Queue a write for the background storage writer.
    ///
    /// Events are queued one by one. Session snapshots coalesce: while a
    /// snapshot of the same session is still waiting, the newer one replaces
    /// it instead of taking another queue entry.
    pub fn enqueue_persist(&self, job: PersistJob) {
        let write = match job {
            PersistJob::SaveSession(session) => {
                let id = session.id;
                if self.pending_snapshots.insert(id, session).is_some() {
                    return;
                }
                QueuedWrite::Session(id)
            }
            PersistJob::AppendEvent(event) => QueuedWrite::Event(event),
        };
        if self.persist_tx.send(write).is_err() {
            warn!("storage writer is gone; dropping persistence job");
        }
    }

    /// Claim the newest waiting snapshot of `id`.
    pub fn take_pending_snapshot(&self, id: Uuid) -> Option<SessionEntity> {
        self.pending_snapshots.remove(&id).map(|(_, session)| session)
    }

    /// Hand the persistence queue to the writer task. Only the first caller gets it.
    pub async fn take_persist_queue(&self) -> Option<mpsc::UnboundedReceiver<QueuedWrite>> {
        self.persist_rx.lock().await.take()
    }

    /// Record that startup recovery completed.
    pub fn mark_recovered(&self) {
        self.recovered.store(true, Ordering::SeqCst);
    }

    /// Whether startup recovery already ran.
    pub fn is_recovered(&self) -> bool {
        self.recovered.load(Ordering::SeqCst)
    }
}
