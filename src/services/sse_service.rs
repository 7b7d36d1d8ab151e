use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::sse::ServerEvent,
    error::ServiceError,
    services::sse_events,
    state::{
        SharedState,
        hub::Subscription,
        tickets::{Redeemed, ScopeAddress, StreamScope},
    },
};

/// Redeem `ticket` for the scope named by `address` and register a subscriber.
///
/// The scope itself, tenant included, comes from the ticket.
///
/// The subscriber's queue starts with `connected` followed by a snapshot
/// (`state`, once per live session) or `no_session`. For session and game
/// scopes the snapshot is taken and the subscriber registered under the
/// session lock, so every later event is newer than the snapshot.
pub async fn open_stream(
    state: &SharedState,
    address: ScopeAddress,
    ticket: &str,
) -> Result<Subscription, ServiceError> {
    let Redeemed { user_id, scope } =
        state.tickets().redeem(ticket, &address).map_err(|reason| {
            warn!(%address, reason = reason.reason(), "stream ticket rejected");
            ServiceError::TicketRejected(reason)
        })?;

    let client_id = Uuid::new_v4();
    let mut initial: Vec<ServerEvent> =
        sse_events::connected_event(client_id, &scope, state.is_degraded())
            .into_iter()
            .collect();

    let handle = match &scope {
        StreamScope::Session(id) => state.sessions().get(*id),
        StreamScope::Game {
            account_id,
            game_or_round_id,
        } => state.sessions().live_for_game(account_id, game_or_round_id),
        StreamScope::Account(account_id) => {
            let handles = state.sessions().live_for_account(account_id);
            if handles.is_empty() {
                initial.extend(sse_events::no_session_event(&scope, None));
            }
            for handle in handles {
                let slot = handle.slot.lock().await;
                initial.extend(sse_events::state_event(&slot));
            }
            let subscription = state.hub().subscribe(scope, client_id, user_id, initial);
            log_opened(&subscription);
            return Ok(subscription);
        }
    };

    let subscription = match handle {
        Some(handle) => {
            let slot = handle.slot.lock().await;
            initial.extend(sse_events::state_event(&slot));
            state.hub().subscribe(scope, client_id, user_id, initial)
        }
        None => {
            let last_known = match &scope {
                StreamScope::Session(id) => Some(*id),
                _ => None,
            };
            initial.extend(sse_events::no_session_event(&scope, last_known));
            state.hub().subscribe(scope, client_id, user_id, initial)
        }
    };
    log_opened(&subscription);
    Ok(subscription)
}

fn log_opened(subscription: &Subscription) {
    info!(
        client_id = %subscription.client_id,
        scope = %subscription.scope,
        "stream opened"
    );
}

/// Convert a subscription into an SSE response, forwarding events and
/// unregistering the subscriber once the client disconnects.
pub fn to_sse_stream(
    state: SharedState,
    subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let Subscription {
        client_id,
        scope,
        mut receiver,
    } = subscription;
    let keep_alive = state.config().keep_alive();

    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                next = receiver.recv() => {
                    // `None`: the hub dropped this subscriber for lagging
                    let Some(payload) = next else { break };
                    if tx.send(Ok(to_event(payload))).await.is_err() {
                        break;
                    }
                }
            }
        }

        state.hub().unsubscribe(&scope, client_id);
        info!(%client_id, %scope, "stream disconnected");
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(keep_alive)
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}
