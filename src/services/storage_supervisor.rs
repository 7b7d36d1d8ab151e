use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{record_store::RecordStore, storage::StorageError},
    services::sweeper,
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Reconnect to the record store and keep the shared state in degraded mode while it is unavailable.
///
/// The first time a store is installed, orphaned sessions left by a previous
/// process are recovered right away instead of waiting for the next sweep.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RecordStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_record_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                match sweeper::recover_after_restart(&state).await {
                    Ok(0) => {}
                    Ok(recovered) => info!(recovered, "orphaned sessions recovered"),
                    Err(err) => warn!(error = %err, "startup recovery failed; sweeper will retry"),
                }

                loop {
                    match store.health_check().await {
                        Ok(()) => {
                            if state.is_degraded() {
                                info!("storage healthy again; leaving degraded mode");
                                state.update_degraded(false);
                            }
                            sleep(HEALTH_POLL_INTERVAL).await;
                        }
                        Err(_) => {
                            let mut attempt = 0;
                            let mut reconnect_delay = INITIAL_DELAY;
                            let mut reconnected = false;

                            while attempt < MAX_RECONNECT_ATTEMPTS {
                                match store.try_reconnect().await {
                                    Ok(()) => {
                                        info!(
                                            "storage reconnection succeeded after health check failure"
                                        );
                                        reconnected = true;
                                        break;
                                    }
                                    Err(reconnect_err) => {
                                        if attempt == 0 {
                                            warn!(
                                                attempt, error = %reconnect_err,
                                                "storage reconnect first attempt failed; entering degraded mode"
                                            );
                                            state.update_degraded(true);
                                        } else {
                                            warn!(attempt, error = %reconnect_err, "storage reconnect attempt failed");
                                        };
                                        attempt += 1;
                                        sleep(reconnect_delay).await;
                                        reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                                    }
                                }
                            }

                            if reconnected {
                                state.update_degraded(false);
                                sleep(HEALTH_POLL_INTERVAL).await;
                                continue;
                            } else {
                                warn!(
                                    "exhausted storage reconnect attempts; staying in degraded mode"
                                );
                                state.clear_record_store().await;
                                break;
                            }
                        }
                    }
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::{models::SessionEntity, record_store::memory::MemoryRecordStore},
        services::session_service::tests::actor,
        state::{
            AppState,
            lifecycle::SessionStatus,
            session::{Position, ScoringSession},
        },
    };

    #[tokio::test]
    async fn installing_a_store_recovers_orphans() {
        let memory = MemoryRecordStore::new();
        let orphan = ScoringSession::start("game-1".into(), &actor(), Position::default());
        memory
            .save_session(SessionEntity::from(&orphan))
            .await
            .unwrap();

        let state = AppState::new(AppConfig::default());
        assert!(state.is_degraded());
        let store = memory.clone();
        tokio::spawn(run(state.clone(), move || {
            let store = store.clone();
            async move { Ok(Arc::new(store) as Arc<dyn RecordStore>) }
        }));

        for _ in 0..200 {
            if state.is_recovered() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(state.is_recovered());
        assert!(!state.is_degraded());
        assert_eq!(
            memory.session(orphan.id).unwrap().status,
            SessionStatus::Abandoned
        );
    }
}
