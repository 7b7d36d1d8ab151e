use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::state::tickets::{ScopeAddress, StreamKind, StreamScope};

/// Kind of feed a ticket opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// One session.
    Session,
    /// The live session of a game or round.
    Game,
    /// Every live session of an account.
    Account,
}

/// Feed a ticket is requested for.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScopeDto {
    /// Scope kind.
    pub kind: ScopeKind,
    /// Session id, game or round id, or account id.
    #[validate(length(min = 1, max = 128))]
    pub id: String,
}

/// Body of `POST /live/tickets`.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IssueTicketRequest {
    /// Requested scope.
    #[validate(nested)]
    pub scope: ScopeDto,
}

/// Issued ticket.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    /// Opaque single-use token.
    pub ticket: String,
    /// Seconds before the ticket expires.
    pub expires_in: u64,
}

/// Query string of the stream endpoint.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct StreamQuery {
    /// Ticket obtained from `POST /live/tickets`.
    pub ticket: String,
}

/// A scope id that does not parse for its kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{0}` is not a valid session id")]
pub struct InvalidScopeId(pub String);

impl From<ScopeKind> for StreamKind {
    fn from(kind: ScopeKind) -> Self {
        match kind {
            ScopeKind::Session => StreamKind::Session,
            ScopeKind::Game => StreamKind::Game,
            ScopeKind::Account => StreamKind::Account,
        }
    }
}

/// Address named by a stream path. Session ids must be UUIDs.
pub fn parse_address(kind: ScopeKind, id: &str) -> Result<ScopeAddress, InvalidScopeId> {
    let id = match kind {
        ScopeKind::Session => Uuid::parse_str(id)
            .map_err(|_| InvalidScopeId(id.to_owned()))?
            .to_string(),
        ScopeKind::Game | ScopeKind::Account => id.to_owned(),
    };
    Ok(ScopeAddress {
        kind: kind.into(),
        id,
    })
}

impl ScopeDto {
    /// Scope requested from within `account_id`. A game id always names a
    /// game of the requesting tenant.
    pub fn resolve(&self, account_id: &str) -> Result<StreamScope, InvalidScopeId> {
        match self.kind {
            ScopeKind::Session => Uuid::parse_str(&self.id)
                .map(StreamScope::Session)
                .map_err(|_| InvalidScopeId(self.id.clone())),
            ScopeKind::Game => Ok(StreamScope::game(account_id, self.id.as_str())),
            ScopeKind::Account => Ok(StreamScope::Account(self.id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dto(kind: ScopeKind, id: &str) -> ScopeDto {
        ScopeDto {
            kind,
            id: id.into(),
        }
    }

    #[test]
    fn session_scope_needs_a_uuid() {
        assert!(dto(ScopeKind::Session, "nope").resolve("acct").is_err());
        assert!(parse_address(ScopeKind::Session, "nope").is_err());
        let id = Uuid::new_v4();
        assert_eq!(
            dto(ScopeKind::Session, &id.to_string())
                .resolve("acct")
                .unwrap(),
            StreamScope::Session(id)
        );
    }

    #[test]
    fn game_scope_lands_in_the_requesting_tenant() {
        let scope = dto(ScopeKind::Game, "g").resolve("acct-7").unwrap();
        assert_eq!(scope, StreamScope::game("acct-7", "g"));
        assert_eq!(
            parse_address(ScopeKind::Game, "g").unwrap(),
            scope.address()
        );
    }

    #[test]
    fn session_address_is_canonical() {
        let id = Uuid::new_v4();
        let upper = id.to_string().to_uppercase();
        assert_eq!(
            parse_address(ScopeKind::Session, &upper).unwrap(),
            StreamScope::Session(id).address()
        );
    }

    #[test]
    fn scope_kind_parses_from_path_segment() {
        let kind: ScopeKind = serde_json::from_str("\"account\"").unwrap();
        assert_eq!(kind, ScopeKind::Account);
    }
}
