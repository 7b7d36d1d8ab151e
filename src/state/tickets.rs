//! Short-lived, single-use tickets that authorize one stream handshake.

use std::{
    fmt,
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use rand::{Rng, distr::Alphanumeric};
use thiserror::Error;
use uuid::Uuid;

const TICKET_LEN: usize = 48;

/// Kind of feed, as named in stream paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// One session.
    Session,
    /// The live session of a game or round.
    Game,
    /// Every live session of a tenant.
    Account,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamKind::Session => "session",
            StreamKind::Game => "game",
            StreamKind::Account => "account",
        })
    }
}

/// Feed a ticket grants access to.
///
/// Game and round ids are only unique within a tenant, so a game scope
/// carries the owning account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamScope {
    /// One session, whatever its status.
    Session(Uuid),
    /// Whichever session of the account is live for a game or round.
    Game {
        /// Tenant the game belongs to.
        account_id: String,
        /// Game or round identifier.
        game_or_round_id: String,
    },
    /// Every live session of a tenant.
    Account(String),
}

impl StreamScope {
    /// Game scope inside one tenant.
    pub fn game(account_id: impl Into<String>, game_or_round_id: impl Into<String>) -> Self {
        StreamScope::Game {
            account_id: account_id.into(),
            game_or_round_id: game_or_round_id.into(),
        }
    }

    /// Scope kind.
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamScope::Session(_) => StreamKind::Session,
            StreamScope::Game { .. } => StreamKind::Game,
            StreamScope::Account(_) => StreamKind::Account,
        }
    }

    /// How a stream path names this scope.
    pub fn address(&self) -> ScopeAddress {
        let id = match self {
            StreamScope::Session(id) => id.to_string(),
            StreamScope::Game {
                game_or_round_id, ..
            } => game_or_round_id.clone(),
            StreamScope::Account(id) => id.clone(),
        };
        ScopeAddress {
            kind: self.kind(),
            id,
        }
    }
}

impl fmt::Display for StreamScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.address(), f)
    }
}

/// Scope as named by a stream request: kind and raw id, without the tenant.
///
/// The full [`StreamScope`] comes from the redeemed ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeAddress {
    /// Scope kind.
    pub kind: StreamKind,
    /// Session id, game or round id, or account id.
    pub id: String,
}

impl fmt::Display for ScopeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Why a redemption failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RedeemError {
    /// Unknown or already purged ticket.
    #[error("ticket not found")]
    NotFound,
    /// Ticket was redeemed before.
    #[error("ticket already used")]
    AlreadyUsed,
    /// Ticket lifetime is over.
    #[error("ticket expired")]
    Expired,
    /// Ticket was issued for another feed.
    #[error("ticket scope mismatch")]
    ScopeMismatch,
}

impl RedeemError {
    /// Stable reason code sent to clients.
    pub fn reason(self) -> &'static str {
        match self {
            RedeemError::NotFound => "not_found",
            RedeemError::AlreadyUsed => "already_used",
            RedeemError::Expired => "expired",
            RedeemError::ScopeMismatch => "scope_mismatch",
        }
    }
}

#[derive(Debug, Clone)]
struct Ticket {
    user_id: String,
    scope: StreamScope,
    created_at: Instant,
    expires_at: Instant,
    used: bool,
}

/// Successful redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redeemed {
    /// User the ticket was issued to.
    pub user_id: String,
    /// Scope recorded at issue time.
    pub scope: StreamScope,
}

/// Result of [`TicketBroker::issue`].
#[derive(Debug, Clone)]
pub struct IssuedTicket {
    /// Opaque token to pass as `?ticket=`.
    pub ticket: String,
    /// Lifetime of the token.
    pub expires_in: Duration,
}

/// Registry of outstanding tickets, held in process memory only.
pub struct TicketBroker {
    tickets: DashMap<String, Ticket>,
    ttl: Duration,
}

impl TicketBroker {
    /// Broker issuing tickets valid for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            tickets: DashMap::new(),
            ttl,
        }
    }

    /// Issue a ticket bound to exactly one scope.
    pub fn issue(&self, user_id: impl Into<String>, scope: StreamScope) -> IssuedTicket {
        let now = Instant::now();
        let ticket = loop {
            let candidate: String = rand::rng()
                .sample_iter(&Alphanumeric)
                .take(TICKET_LEN)
                .map(char::from)
                .collect();
            match self.tickets.entry(candidate.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(Ticket {
                        user_id: user_id.into(),
                        scope,
                        created_at: now,
                        expires_at: now + self.ttl,
                        used: false,
                    });
                    break candidate;
                }
            }
        };

        IssuedTicket {
            ticket,
            expires_in: self.ttl,
        }
    }

    /// Redeem a ticket for the scope named by `address`.
    pub fn redeem(&self, ticket: &str, address: &ScopeAddress) -> Result<Redeemed, RedeemError> {
        self.redeem_at(ticket, address, Instant::now())
    }

    /// [`TicketBroker::redeem`] against an explicit clock.
    ///
    /// Every attempt on a live ticket consumes it, including one with the
    /// wrong scope.
    pub fn redeem_at(
        &self,
        ticket: &str,
        address: &ScopeAddress,
        now: Instant,
    ) -> Result<Redeemed, RedeemError> {
        let mut entry = self.tickets.get_mut(ticket).ok_or(RedeemError::NotFound)?;

        if entry.used {
            return Err(RedeemError::AlreadyUsed);
        }

        if now >= entry.expires_at {
            drop(entry);
            self.tickets.remove(ticket);
            return Err(RedeemError::Expired);
        }

        entry.used = true;

        if entry.scope.address() != *address {
            return Err(RedeemError::ScopeMismatch);
        }

        tracing::debug!(
            scope = %entry.scope,
            age_ms = now.duration_since(entry.created_at).as_millis() as u64,
            "ticket redeemed"
        );
        Ok(Redeemed {
            user_id: entry.user_id.clone(),
            scope: entry.scope.clone(),
        })
    }

    /// Drop expired tickets, returning how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.tickets.len();
        self.tickets.retain(|_, ticket| now < ticket.expires_at);
        before.saturating_sub(self.tickets.len())
    }

    /// Outstanding tickets, used or not.
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Whether no ticket is outstanding.
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> TicketBroker {
        TicketBroker::new(Duration::from_secs(30))
    }

    fn game(id: &str) -> StreamScope {
        StreamScope::game("acct", id)
    }

    #[test]
    fn ticket_is_48_alphanumeric_chars() {
        let issued = broker().issue("u", game("g"));
        assert_eq!(issued.ticket.len(), 48);
        assert!(issued.ticket.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(issued.expires_in, Duration::from_secs(30));
    }

    #[test]
    fn ticket_redeems_once() {
        let broker = broker();
        let scope = StreamScope::Session(Uuid::new_v4());
        let issued = broker.issue("user-1", scope.clone());

        let redeemed = broker.redeem(&issued.ticket, &scope.address()).unwrap();
        assert_eq!(redeemed.user_id, "user-1");
        assert_eq!(redeemed.scope, scope);
        assert_eq!(
            broker
                .redeem(&issued.ticket, &scope.address())
                .unwrap_err(),
            RedeemError::AlreadyUsed
        );
    }

    #[test]
    fn game_redemption_restores_the_issuing_tenant() {
        let broker = broker();
        let issued = broker.issue("u", StreamScope::game("acct-2", "g"));
        let address = ScopeAddress {
            kind: StreamKind::Game,
            id: "g".into(),
        };

        let redeemed = broker.redeem(&issued.ticket, &address).unwrap();
        assert_eq!(redeemed.scope, StreamScope::game("acct-2", "g"));
        assert_ne!(redeemed.scope, StreamScope::game("acct-1", "g"));
    }

    #[test]
    fn unknown_ticket_is_not_found() {
        assert_eq!(
            broker()
                .redeem("nope", &StreamScope::Account("a".into()).address())
                .unwrap_err(),
            RedeemError::NotFound
        );
    }

    #[test]
    fn expired_ticket_is_rejected_and_removed() {
        let broker = broker();
        let scope = game("g");
        let issued = broker.issue("u", scope.clone());
        let later = Instant::now() + Duration::from_secs(31);

        assert_eq!(
            broker
                .redeem_at(&issued.ticket, &scope.address(), later)
                .unwrap_err(),
            RedeemError::Expired
        );
        assert!(broker.is_empty());
    }

    #[test]
    fn scope_mismatch_burns_the_ticket() {
        let broker = broker();
        let issued = broker.issue("u", game("g-1"));

        assert_eq!(
            broker
                .redeem(&issued.ticket, &game("g-2").address())
                .unwrap_err(),
            RedeemError::ScopeMismatch
        );
        assert_eq!(
            broker
                .redeem(&issued.ticket, &game("g-1").address())
                .unwrap_err(),
            RedeemError::AlreadyUsed
        );
    }

    #[test]
    fn purge_drops_only_expired() {
        let broker = TicketBroker::new(Duration::from_secs(10));
        broker.issue("a", game("g"));
        broker.issue("b", game("g"));

        assert_eq!(broker.purge_expired(Instant::now()), 0);
        assert_eq!(
            broker.purge_expired(Instant::now() + Duration::from_secs(11)),
            2
        );
        assert!(broker.is_empty());
    }
}
