use std::{cmp::Ordering, time::SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lifecycle::{SessionLifecycle, SessionStatus};

/// Half of an inning. Sports without halves (golf) leave it unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Half {
    /// Visiting side bats.
    Top,
    /// Home side bats.
    Bottom,
}

/// Inning or hole pointer of a session.
///
/// Positions are totally ordered by `index` first, then by half with an unset
/// half sorting before `Top` and `Top` before `Bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Inning or hole number, starting at 1.
    pub index: u32,
    /// Half of the inning, when the sport has one.
    pub half: Option<Half>,
}

impl Position {
    /// Build a position from its parts.
    pub fn new(index: u32, half: Option<Half>) -> Self {
        Self { index, half }
    }

    /// Linear rank of the position, three steps per index.
    pub fn ordinal(&self) -> u64 {
        let half = match self.half {
            None => 0,
            Some(Half::Top) => 1,
            Some(Half::Bottom) => 2,
        };
        u64::from(self.index) * 3 + half
    }

    /// Whether moving from `current` to `self` stays within `tolerance` backward steps.
    pub fn is_reachable_from(&self, current: &Position, tolerance: u64) -> bool {
        self.ordinal().saturating_add(tolerance) >= current.ordinal()
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new(1, None)
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordinal().cmp(&other.ordinal())
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Authenticated caller identity forwarded by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// Stable user identifier.
    pub user_id: String,
    /// Human readable name shown in audits.
    pub display_name: String,
    /// Tenant the user belongs to.
    pub account_id: String,
}

/// In-memory record of one live scoring session.
#[derive(Debug, Clone)]
pub struct ScoringSession {
    /// Session identifier.
    pub id: Uuid,
    /// Game or round being scored.
    pub game_or_round_id: String,
    /// Owning tenant.
    pub account_id: String,
    /// Current inning or hole.
    pub position: Position,
    /// User id of whoever started the session.
    pub started_by_id: String,
    /// Display name of whoever started the session.
    pub started_by_name: String,
    /// Wall clock start time.
    pub started_at: SystemTime,
    /// Last accepted mutation or transition.
    pub last_activity_at: SystemTime,
    /// Lifecycle state machine.
    pub lifecycle: SessionLifecycle,
    /// Set while a failed finalize waits for the sweeper to retry it.
    pub finalize_requested: bool,
}

impl ScoringSession {
    /// Start a new active session.
    pub fn start(game_or_round_id: String, actor: &Actor, position: Position) -> Self {
        let now = SystemTime::now();
        Self {
            id: Uuid::new_v4(),
            game_or_round_id,
            account_id: actor.account_id.clone(),
            position,
            started_by_id: actor.user_id.clone(),
            started_by_name: actor.display_name.clone(),
            started_at: now,
            last_activity_at: now,
            lifecycle: SessionLifecycle::new(),
            finalize_requested: false,
        }
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SessionStatus {
        self.lifecycle.status()
    }

    /// Whether ingestion and position changes are currently allowed.
    pub fn accepts_mutations(&self) -> bool {
        self.status() == SessionStatus::Active
            && self.lifecycle.pending().is_none()
            && !self.finalize_requested
    }

    /// Refresh the inactivity clock.
    pub fn touch(&mut self) {
        self.last_activity_at = SystemTime::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_order_by_index_then_half() {
        let inning_two = Position::new(2, None);
        let top_two = Position::new(2, Some(Half::Top));
        let bottom_two = Position::new(2, Some(Half::Bottom));
        let top_three = Position::new(3, Some(Half::Top));

        assert!(inning_two < top_two);
        assert!(top_two < bottom_two);
        assert!(bottom_two < top_three);
    }

    #[test]
    fn backward_moves_respect_tolerance() {
        let current = Position::new(4, Some(Half::Bottom));
        let previous = Position::new(4, Some(Half::Top));

        assert!(current.is_reachable_from(&current, 0));
        assert!(!previous.is_reachable_from(&current, 0));
        assert!(previous.is_reachable_from(&current, 1));
        assert!(Position::new(7, None).is_reachable_from(&current, 0));
    }

    #[test]
    fn new_session_accepts_mutations() {
        let actor = Actor {
            user_id: "u-1".into(),
            display_name: "Scorer".into(),
            account_id: "acct".into(),
        };
        let mut session = ScoringSession::start("game-1".into(), &actor, Position::default());
        assert!(session.accepts_mutations());

        session.finalize_requested = true;
        assert!(!session.accepts_mutations());
    }
}
