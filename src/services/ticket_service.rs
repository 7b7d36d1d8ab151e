use std::time::Instant;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::{
    dto::ticket::{IssueTicketRequest, TicketResponse},
    error::ServiceError,
    state::{SharedState, session::Actor, tickets::StreamScope},
};

/// Issue a single-use stream ticket for a scope the actor may watch.
pub fn issue_ticket(
    state: &SharedState,
    actor: &Actor,
    request: &IssueTicketRequest,
) -> Result<TicketResponse, ServiceError> {
    let scope = request
        .scope
        .resolve(&actor.account_id)
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    authorize(state, actor, &scope)?;

    let issued = state.tickets().issue(actor.user_id.clone(), scope.clone());
    info!(%scope, user_id = %actor.user_id, "stream ticket issued");
    Ok(TicketResponse {
        ticket: issued.ticket,
        expires_in: issued.expires_in.as_secs(),
    })
}

fn authorize(state: &SharedState, actor: &Actor, scope: &StreamScope) -> Result<(), ServiceError> {
    let owner = match scope {
        StreamScope::Account(account_id) => Some(account_id.clone()),
        StreamScope::Session(id) => state
            .sessions()
            .get(*id)
            .map(|handle| handle.account_id.clone()),
        StreamScope::Game { account_id, .. } => Some(account_id.clone()),
    };

    match owner {
        Some(owner) if owner != actor.account_id => Err(ServiceError::Unauthorized(format!(
            "{scope} belongs to another account"
        ))),
        _ => Ok(()),
    }
}

/// Periodically drop expired tickets.
pub async fn run_gc(state: SharedState) {
    let mut ticker = interval(state.config().ticket_gc_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let purged = state.tickets().purge_expired(Instant::now());
        if purged > 0 {
            debug!(purged, remaining = state.tickets().len(), "expired tickets purged");
        }
    }
}
